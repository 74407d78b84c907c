use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::models::{RouteSegment, ServiceArrival, StopRecord};
use crate::transit::Dataset;

/// DataMall API root.
pub const DATAMALL_BASE_URL: &str = "https://datamall2.mytransport.sg/ltaodataservice";

/// Environment variable holding the DataMall account key.
pub const ACCOUNT_KEY_VAR: &str = "ACCOUNT_KEY";

/// The paged endpoints return at most this many records per request.
const PAGE_SIZE: usize = 500;

/// Minimum interval between logging the same error source.
const ERROR_LOG_INTERVAL_SECS: u64 = 300;

/// Backoff tracking for an upstream source.
struct BackoffState {
    failures: u32,
    retry_after: Instant,
}

#[derive(Default)]
struct ClientState {
    backoff: HashMap<String, BackoffState>,
    last_error_log: HashMap<String, Instant>,
}

#[derive(Deserialize)]
struct ArrivalResponse {
    #[serde(rename = "Services", default)]
    services: Vec<ServiceArrival>,
}

#[derive(Deserialize)]
struct PagedResponse<T> {
    value: Vec<T>,
}

/// LTA DataMall client with per-source exponential backoff.
///
/// Errors are returned, never panicked on. While a source is backing off,
/// calls to it fail immediately with `UpstreamError::Backoff`.
pub struct DataMallClient {
    http: Client,
    account_key: String,
    base_url: String,
    state: Mutex<ClientState>,
}

impl DataMallClient {
    pub fn new(account_key: impl Into<String>) -> Result<Self, UpstreamError> {
        let http = Client::builder()
            .user_agent("SG-BusArrival-Rust/1.0")
            .gzip(true)
            .pool_max_idle_per_host(4)
            .timeout(Duration::from_secs(12))
            .build()
            .map_err(|e| UpstreamError::Http(format!("failed to create HTTP client: {}", e)))?;

        Ok(DataMallClient {
            http,
            account_key: account_key.into(),
            base_url: DATAMALL_BASE_URL.to_string(),
            state: Mutex::new(ClientState::default()),
        })
    }

    /// Build a client with the account key from `ACCOUNT_KEY`.
    pub fn from_env() -> Result<Self, UpstreamError> {
        let key = std::env::var(ACCOUNT_KEY_VAR).map_err(|_| UpstreamError::MissingAccountKey)?;
        Self::new(key)
    }

    /// Live arrivals for every service calling at a stop.
    ///
    /// Backoff is tracked per stop, so one failing stop does not block
    /// lookups for the others.
    pub async fn fetch_arrivals(&self, stop_code: &str) -> Result<Vec<ServiceArrival>, UpstreamError> {
        let source = arrivals_source(stop_code);
        let url = format!("{}/v3/BusArrival", self.base_url);
        let result = self
            .get_json::<ArrivalResponse>(&source, &url, &[("BusStopCode", stop_code)])
            .await
            .map(|r| r.services);
        if let Ok(ref services) = result {
            debug!("[DATAMALL] Stop {}: {} services", stop_code, services.len());
        }
        result
    }

    /// Every stop, following `$skip` pagination until an empty or short page.
    pub async fn fetch_all_stops(&self) -> Result<Vec<StopRecord>, UpstreamError> {
        self.fetch_all_pages("BusStops").await
    }

    /// Every route segment, following `$skip` pagination.
    pub async fn fetch_all_routes(&self) -> Result<Vec<RouteSegment>, UpstreamError> {
        self.fetch_all_pages("BusRoutes").await
    }

    /// Fetch both tables.
    pub async fn fetch_dataset(&self) -> Result<Dataset, UpstreamError> {
        let stops = self.fetch_all_stops().await?;
        let routes = self.fetch_all_routes().await?;
        info!(
            "[DATAMALL] Fetched dataset: {} stops, {} route segments",
            stops.len(),
            routes.len()
        );
        Ok(Dataset::new(stops, routes))
    }

    async fn fetch_all_pages<T: DeserializeOwned>(&self, endpoint: &str) -> Result<Vec<T>, UpstreamError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut all = Vec::new();
        loop {
            let skip = all.len().to_string();
            let page: PagedResponse<T> = self.get_json(endpoint, &url, &[("$skip", skip.as_str())]).await?;
            if page.value.is_empty() {
                break;
            }
            let short_page = page.value.len() < PAGE_SIZE;
            all.extend(page.value);
            if short_page {
                break;
            }
        }
        Ok(all)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        source: &str,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, UpstreamError> {
        if !self.should_fetch(source) {
            return Err(UpstreamError::Backoff(source.to_string()));
        }

        let result = self.send::<T>(url, query).await;
        match result {
            Ok(_) => self.record_success(source),
            Err(ref e) => {
                self.log_error(source, &format!("Error fetching {}: {}", source, e));
                self.record_failure(source);
            }
        }
        result
    }

    async fn send<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T, UpstreamError> {
        let response = self
            .http
            .get(url)
            .header("AccountKey", &self.account_key)
            .header("accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| UpstreamError::Http(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ClientState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn should_fetch(&self, source: &str) -> bool {
        match self.lock_state().backoff.get(source) {
            Some(state) => Instant::now() >= state.retry_after,
            None => true,
        }
    }

    fn record_success(&self, source: &str) {
        self.lock_state().backoff.remove(source);
    }

    fn record_failure(&self, source: &str) {
        let mut state = self.lock_state();
        let failures = state
            .backoff
            .get(source)
            .map(|s| s.failures + 1)
            .unwrap_or(1);
        state.backoff.insert(
            source.to_string(),
            BackoffState {
                failures,
                retry_after: Instant::now() + backoff_delay(failures),
            },
        );
    }

    fn log_error(&self, source: &str, msg: &str) {
        let mut state = self.lock_state();
        let now = Instant::now();
        let should_log = match state.last_error_log.get(source) {
            Some(last) => last.elapsed().as_secs() >= ERROR_LOG_INTERVAL_SECS,
            None => true,
        };
        if should_log {
            warn!("[DATAMALL] {}", msg);
            state.last_error_log.insert(source.to_string(), now);
        }
    }
}

fn arrivals_source(stop_code: &str) -> String {
    format!("arrivals:{}", stop_code)
}

/// Exponential backoff: 15s, 30s, 60s, 120s, 240s, max 300s.
fn backoff_delay(failures: u32) -> Duration {
    let secs = (15 * (1u64 << (failures.max(1) - 1).min(5))).min(300);
    Duration::from_secs(secs)
}

/// Upstream call failures.
#[derive(Debug, Clone, PartialEq)]
pub enum UpstreamError {
    Http(String),
    Status(u16),
    Decode(String),
    Backoff(String),
    MissingAccountKey,
}

impl std::fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpstreamError::Http(msg) => write!(f, "HTTP error: {}", msg),
            UpstreamError::Status(code) => write!(f, "Upstream returned status {}", code),
            UpstreamError::Decode(msg) => write!(f, "Response decode error: {}", msg),
            UpstreamError::Backoff(source) => {
                write!(f, "Upstream source '{}' is backing off after failures", source)
            }
            UpstreamError::MissingAccountKey => {
                write!(f, "{} environment variable is not set", ACCOUNT_KEY_VAR)
            }
        }
    }
}

impl std::error::Error for UpstreamError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_schedule() {
        assert_eq!(backoff_delay(1), Duration::from_secs(15));
        assert_eq!(backoff_delay(2), Duration::from_secs(30));
        assert_eq!(backoff_delay(5), Duration::from_secs(240));
        assert_eq!(backoff_delay(6), Duration::from_secs(300));
        assert_eq!(backoff_delay(40), Duration::from_secs(300));
    }

    #[test]
    fn test_client_creation() {
        let client = DataMallClient::new("key").unwrap();
        assert!(client.lock_state().backoff.is_empty());
        assert_eq!(client.base_url, DATAMALL_BASE_URL);
    }

    #[test]
    fn test_backoff_logic() {
        let client = DataMallClient::new("key").unwrap();
        assert!(client.should_fetch("test"));

        client.record_failure("test");
        // After failure, should be in backoff
        assert!(!client.should_fetch("test"));
        assert!(client.should_fetch("other"));

        client.record_success("test");
        assert!(client.should_fetch("test"));
    }

    #[tokio::test]
    async fn test_arrival_backoff_is_per_stop() {
        let client = DataMallClient::new("key").unwrap();
        client.record_failure(&arrivals_source("44009"));

        let err = client.fetch_arrivals("44009").await.unwrap_err();
        assert_eq!(err, UpstreamError::Backoff("arrivals:44009".to_string()));
        assert!(client.should_fetch(&arrivals_source("45029")));
    }

    #[test]
    fn test_failures_accumulate() {
        let client = DataMallClient::new("key").unwrap();
        client.record_failure("arrivals");
        client.record_failure("arrivals");
        assert_eq!(client.lock_state().backoff["arrivals"].failures, 2);
    }

    #[test]
    fn test_parse_arrival_response() {
        let json = r#"{
            "odata.metadata": "https://datamall2.mytransport.sg/ltaodataservice/v3/BusArrival",
            "BusStopCode": "83139",
            "Services": [
                {"ServiceNo": "15", "Operator": "GAS",
                 "NextBus": {"OriginCode": "77009", "DestinationCode": "77009",
                             "EstimatedArrival": "2024-11-26T22:04:48+08:00",
                             "Monitored": 1, "Latitude": "1.3154", "Longitude": "103.9059",
                             "VisitNumber": "1", "Load": "SEA", "Feature": "WAB", "Type": "SD"},
                 "NextBus2": {"EstimatedArrival": ""},
                 "NextBus3": {"EstimatedArrival": ""}}
            ]
        }"#;
        let parsed: ArrivalResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.services.len(), 1);
        assert_eq!(parsed.services[0].service_number, "15");
        assert_eq!(parsed.services[0].next_bus.bus_type, "SD");
        assert_eq!(parsed.services[0].next_bus.load, "SEA");
    }

    #[test]
    fn test_parse_paged_response() {
        let json = r#"{"odata.metadata": "x", "value": [
            {"BusStopCode": "01012", "RoadName": "Victoria St", "Description": "Hotel Grand Pacific",
             "Latitude": 1.29684825487647, "Longitude": 103.85253591654006}
        ]}"#;
        let parsed: PagedResponse<StopRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.value[0].code, "01012");
    }
}
