use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::models::StopRecord;
use crate::transit::dataset::DatasetError;
use crate::transit::search::{description_tokens, normalize_query};

/// Immutable stop lookup by code, plus a word index over descriptions.
#[derive(Debug, Default)]
pub struct StopRegistry {
    by_code: HashMap<String, Arc<StopRecord>>,
    /// Lowercase description token → codes of stops containing it.
    tokens: HashMap<String, HashSet<String>>,
}

impl StopRegistry {
    /// Index a stop list. Stop codes must be unique.
    pub fn build(stops: &[Arc<StopRecord>]) -> Result<Self, DatasetError> {
        let mut by_code = HashMap::with_capacity(stops.len());
        let mut tokens: HashMap<String, HashSet<String>> = HashMap::new();

        for stop in stops {
            if by_code.insert(stop.code.clone(), Arc::clone(stop)).is_some() {
                return Err(DatasetError::DuplicateStop(stop.code.clone()));
            }
            for token in description_tokens(&stop.description) {
                tokens.entry(token).or_default().insert(stop.code.clone());
            }
        }

        Ok(StopRegistry { by_code, tokens })
    }

    pub fn get(&self, code: &str) -> Option<Arc<StopRecord>> {
        self.by_code.get(code).cloned()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.by_code.contains_key(code)
    }

    pub fn len(&self) -> usize {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_code.is_empty()
    }

    /// Stops whose description contains every query word.
    ///
    /// Query words are lowercased and abbreviated the way descriptions are
    /// written before matching. Results are ordered by stop code.
    pub fn search_by_tokens<S: AsRef<str>>(&self, query: &[S]) -> Vec<Arc<StopRecord>> {
        let words = normalize_query(query);
        let mut postings = Vec::with_capacity(words.len());
        for word in &words {
            match self.tokens.get(word) {
                Some(codes) => postings.push(codes),
                None => return Vec::new(),
            }
        }

        // Intersect starting from the rarest word
        postings.sort_by_key(|codes| codes.len());
        let Some((first, rest)) = postings.split_first() else {
            return Vec::new();
        };

        let mut matches: Vec<Arc<StopRecord>> = first
            .iter()
            .filter(|code| rest.iter().all(|codes| codes.contains(*code)))
            .filter_map(|code| self.get(code))
            .collect();
        matches.sort_by(|a, b| a.code.cmp(&b.code));
        matches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop(code: &str, description: &str) -> Arc<StopRecord> {
        Arc::new(StopRecord {
            code: code.to_string(),
            road_name: "Test Rd".to_string(),
            description: description.to_string(),
            latitude: 1.3,
            longitude: 103.8,
        })
    }

    fn registry() -> StopRegistry {
        StopRegistry::build(&[
            stop("45029", "Opp Heavy Veh Pk"),
            stop("45359", "Blk 790"),
            stop("44539", "Lot 1/Choa Chu Kang Stn"),
            stop("44009", "Choa Chu Kang Int"),
            stop("59009", "Yishun Int"),
            stop("46119", "Marsiling CC"),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup_by_code() {
        let reg = registry();
        assert_eq!(reg.len(), 6);
        assert_eq!(reg.get("45359").unwrap().description, "Blk 790");
        assert!(reg.get("99999").is_none());
        assert!(reg.contains("59009"));
    }

    #[test]
    fn test_duplicate_code_rejected() {
        let err = StopRegistry::build(&[stop("10009", "A"), stop("10009", "B")]).unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateStop(code) if code == "10009"));
    }

    #[test]
    fn test_empty_registry() {
        let reg = StopRegistry::build(&[]).unwrap();
        assert!(reg.is_empty());
        assert!(reg.search_by_tokens(&["int"]).is_empty());
    }

    #[test]
    fn test_search_single_token() {
        let reg = registry();
        let codes: Vec<String> = reg
            .search_by_tokens(&["Interchange"])
            .iter()
            .map(|s| s.code.clone())
            .collect();
        assert_eq!(codes, vec!["44009", "59009"]);
    }

    #[test]
    fn test_search_intersection() {
        let reg = registry();
        let result = reg.search_by_tokens(&["yishun", "int"]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].code, "59009");
    }

    #[test]
    fn test_search_unknown_token_gives_empty() {
        let reg = registry();
        assert!(reg.search_by_tokens(&["yishun", "nowhere"]).is_empty());
    }

    #[test]
    fn test_search_empty_query() {
        let reg = registry();
        assert!(reg.search_by_tokens::<&str>(&[]).is_empty());
        assert!(reg.search_by_tokens(&["   "]).is_empty());
    }

    #[test]
    fn test_search_abbreviated_query() {
        let reg = registry();
        let result = reg.search_by_tokens(&["Opposite", "heavy"]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].code, "45029");
    }

    #[test]
    fn test_search_multi_word_place_name() {
        let reg = registry();
        let codes: Vec<String> = reg
            .search_by_tokens(&["choa", "chu", "kang"])
            .iter()
            .map(|s| s.code.clone())
            .collect();
        assert_eq!(codes, vec!["44009"]);

        let result = reg.search_by_tokens(&["Choa Chu Kang Interchange"]);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].code, "44009");
    }
}
