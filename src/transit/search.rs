//! Query token normalization for stop description search.
//!
//! Stop descriptions use the transit authority's abbreviations
//! ("Opp Blk 790", "Choa Chu Kang Stn"), so query words are mapped onto
//! the same abbreviations before lookup.

/// Returns the published abbreviation for a lowercase word.
pub fn abbreviation(word: &str) -> Option<&'static str> {
    let abbr = match word {
        "academy" => "acad",
        "aerospace" => "a'space",
        "after" => "aft",
        "and" => "&",
        "apartments" => "apts",
        "association" => "assn",
        "avenue" => "ave",
        "before" => "bef",
        "between" => "bet",
        "block" => "blk",
        "building" => "bldg",
        "bukit" => "bt",
        "carpark" => "cp",
        "cemetery" => "cemy",
        "centre" => "ctr",
        "children" => "child",
        "christian" => "chr",
        "church" => "ch",
        "college" => "coll",
        "commonwealth" => "c'wealth",
        "company" => "co",
        "complex" => "cplx",
        "corporation" => "corp",
        "court" => "ct",
        "crescent" | "cresent" => "cres",
        "environment" => "env",
        "drive" => "dr",
        "estate" => "est",
        "garden" => "gdn",
        "gardens" => "gdns",
        "heights" => "hts",
        "hospital" => "hosp",
        "house" => "hse",
        "inspection" => "insp",
        "interchange" => "int",
        "international" => "intl",
        "kampong" => "kg",
        "jalan" => "jln",
        "library" => "lib",
        "link" => "lk",
        "lorong" => "lor",
        "market" => "mkt",
        "methodist" => "meth",
        "metropolitan" => "met",
        "mosque" => "mque",
        "north" => "nth",
        "opposite" => "opp",
        "park" => "pk",
        "place" => "pl",
        "plant" => "plt",
        "playground" => "p/g",
        "primary" => "pr",
        "reclamation" => "reclam",
        "reservoir" => "resvr",
        "road" => "rd",
        "saint" => "st.",
        "school" => "sch",
        "schoolhouse" => "s/h",
        "secondary" => "sec",
        "serangoon" => "s'goon",
        "service" => "svc",
        "services" => "svcs",
        "singapore" => "s'pore",
        "square" | "squre" => "sq",
        "station" => "stn",
        "tanjong" => "tg",
        "temple" => "tp",
        "temporary" => "temp",
        "terminal" => "ter",
        "terrace" => "terr",
        "tower" => "twr",
        "towers" => "twrs",
        "townhouse" | "townhouses" => "townhse",
        "walk" => "wk",
        "water" => "wtr",
        "woodlands" => "w'lands",
        _ => return None,
    };
    Some(abbr)
}

/// Lowercase the query words and replace each known word with its
/// abbreviation.
///
/// Words are mapped one at a time because descriptions are indexed one word
/// at a time. Blank tokens are discarded.
pub fn normalize_query<S: AsRef<str>>(tokens: &[S]) -> Vec<String> {
    tokens
        .iter()
        .flat_map(|t| t.as_ref().split_whitespace())
        .map(|word| {
            let word = word.to_lowercase();
            abbreviation(&word).map(str::to_string).unwrap_or(word)
        })
        .collect()
}

/// Split a stop description into lowercase index tokens.
pub fn description_tokens(description: &str) -> impl Iterator<Item = String> + '_ {
    description.split_whitespace().map(str::to_lowercase)
}
