use std::sync::Arc;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{Config, DatasetSource};
use crate::datamall::{ArrivalService, DataMallClient, UpstreamError};
use crate::transit::{Dataset, DatasetError, RefreshError, RefreshOutcome, TransitService};

/// Shared application state, handed to the web server and background tasks.
pub struct AppState {
    pub config: Config,
    pub transit: Arc<TransitService>,
    pub arrivals: ArrivalService,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: Config, transit: TransitService, client: DataMallClient) -> Self {
        let arrivals = ArrivalService::new(client, config.cache_ttl(), config.cache_item_limit());
        AppState {
            config,
            transit: Arc::new(transit),
            arrivals,
            shutdown: CancellationToken::new(),
        }
    }

    /// Fetch a dataset from the configured source and refresh the live
    /// snapshot with it.
    ///
    /// The refresh slot is claimed before fetching and held until the swap,
    /// so a second caller fails fast instead of fetching again. File reads
    /// and index builds run on the blocking pool.
    pub async fn reload_dataset(&self) -> Result<RefreshOutcome, ReloadError> {
        let guard = self.transit.try_begin_refresh().map_err(ReloadError::Refresh)?;

        let transit = Arc::clone(&self.transit);
        let outcome = match self.config.dataset.source {
            DatasetSource::Files => {
                let stops_path = self.config.dataset.stops_path.clone();
                let routes_path = self.config.dataset.routes_path.clone();
                joined(
                    tokio::task::spawn_blocking(move || {
                        let dataset = Dataset::load(&stops_path, &routes_path)?;
                        transit.apply_refresh(&guard, &dataset)
                    })
                    .await,
                )?
            }
            DatasetSource::Upstream => {
                let dataset = self.arrivals.client().fetch_dataset().await?;
                joined(
                    tokio::task::spawn_blocking(move || transit.apply_refresh(&guard, &dataset)).await,
                )?
            }
        };

        if let RefreshOutcome::Replaced { stops, routes } = outcome {
            info!("[REFRESH] Reloaded from {:?}: {} stops, {} routes", self.config.dataset.source, stops, routes);
        }
        Ok(outcome)
    }
}

/// Load the startup dataset from the configured source.
pub async fn load_initial_dataset(config: &Config, client: &DataMallClient) -> Result<Dataset, ReloadError> {
    match config.dataset.source {
        DatasetSource::Files => {
            let stops_path = config.dataset.stops_path.clone();
            let routes_path = config.dataset.routes_path.clone();
            tokio::task::spawn_blocking(move || Dataset::load(&stops_path, &routes_path))
                .await
                .map_err(|e| ReloadError::Task(e.to_string()))?
                .map_err(ReloadError::from)
        }
        DatasetSource::Upstream => Ok(client.fetch_dataset().await?),
    }
}

fn joined<T>(result: Result<Result<T, RefreshError>, JoinError>) -> Result<T, ReloadError> {
    result
        .map_err(|e| ReloadError::Task(e.to_string()))?
        .map_err(ReloadError::Refresh)
}

/// Why a reload from the configured source failed.
#[derive(Debug)]
pub enum ReloadError {
    Refresh(RefreshError),
    Upstream(UpstreamError),
    Task(String),
}

impl ReloadError {
    pub fn is_in_progress(&self) -> bool {
        matches!(self, ReloadError::Refresh(RefreshError::InProgress))
    }
}

impl std::fmt::Display for ReloadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReloadError::Refresh(e) => write!(f, "{}", e),
            ReloadError::Upstream(e) => write!(f, "Dataset fetch failed: {}", e),
            ReloadError::Task(msg) => write!(f, "Reload task failed: {}", msg),
        }
    }
}

impl std::error::Error for ReloadError {}

impl From<UpstreamError> for ReloadError {
    fn from(e: UpstreamError) -> Self {
        ReloadError::Upstream(e)
    }
}

impl From<DatasetError> for ReloadError {
    fn from(e: DatasetError) -> Self {
        ReloadError::Refresh(RefreshError::Dataset(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const STOPS: &str = r#"[
        {"BusStopCode": "45029", "RoadName": "Woodlands Rd", "Description": "Opp Blk 5", "Latitude": 1.3942, "Longitude": 103.7464},
        {"BusStopCode": "45359", "RoadName": "Woodlands Rd", "Description": "Bef Bt Panjang Rd", "Latitude": 1.3950, "Longitude": 103.7477}
    ]"#;
    const ROUTES: &str = r#"{"checksum": "x", "bus_routes": [
        {"ServiceNo": "67", "Direction": 1, "StopSequence": 1, "BusStopCode": "45029"},
        {"ServiceNo": "67", "Direction": 1, "StopSequence": 2, "BusStopCode": "45359"}
    ]}"#;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("bus-arrival-{}-{}", name, std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn files_state(dir: &std::path::Path) -> AppState {
        std::fs::write(dir.join("stops.json"), STOPS).unwrap();
        std::fs::write(dir.join("routes.json"), ROUTES).unwrap();
        let config = Config::from_json(&format!(
            r#"{{"dataset": {{"stops_path": "{}", "routes_path": "{}"}}}}"#,
            dir.join("stops.json").display(),
            dir.join("routes.json").display()
        ))
        .unwrap();
        AppState::new(config, TransitService::empty(), DataMallClient::new("key").unwrap())
    }

    #[tokio::test]
    async fn test_reload_from_files() {
        let dir = scratch_dir("reload");
        let state = files_state(&dir);
        assert_eq!(state.transit.snapshot().stop_count(), 0);

        let outcome = state.reload_dataset().await.unwrap();
        assert_eq!(outcome, RefreshOutcome::Replaced { stops: 2, routes: 1 });
        assert!(state.transit.stop_by_code("45359").is_some());

        // Same files again: checksum matches, nothing rebuilt
        assert_eq!(state.reload_dataset().await.unwrap(), RefreshOutcome::Unchanged);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_reload_bad_file_keeps_snapshot() {
        let dir = scratch_dir("bad");
        let state = files_state(&dir);
        state.reload_dataset().await.unwrap();
        let before = state.transit.snapshot().checksum().to_string();

        std::fs::write(dir.join("stops.json"), r#"[{"BusStopCode": "45029"}]"#).unwrap();
        let err = state.reload_dataset().await.unwrap_err();
        assert!(matches!(err, ReloadError::Refresh(RefreshError::Dataset(DatasetError::Parse(_)))));
        assert!(!err.is_in_progress());
        assert_eq!(state.transit.snapshot().checksum(), before);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_reload_rejected_while_slot_held() {
        let dir = scratch_dir("held");
        let state = files_state(&dir);
        let guard = state.transit.try_begin_refresh().unwrap();

        let err = state.reload_dataset().await.unwrap_err();
        assert!(err.is_in_progress());
        assert_eq!(state.transit.snapshot().stop_count(), 0);

        drop(guard);
        assert!(state.reload_dataset().await.is_ok());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_concurrent_reloads_fetch_once() {
        let dir = scratch_dir("concurrent");
        let state = files_state(&dir);

        let (a, b) = tokio::join!(state.reload_dataset(), state.reload_dataset());
        let in_progress = [a.as_ref().err(), b.as_ref().err()]
            .into_iter()
            .flatten()
            .filter(|e| e.is_in_progress())
            .count();
        assert_eq!(in_progress, 1);
        assert!(a.is_ok() || b.is_ok());
        assert_eq!(state.transit.snapshot().stop_count(), 2);
        assert!(!state.transit.is_refreshing());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[tokio::test]
    async fn test_initial_load_missing_files() {
        let dir = scratch_dir("missing");
        let config = Config::from_json(&format!(
            r#"{{"dataset": {{"stops_path": "{}", "routes_path": "{}"}}}}"#,
            dir.join("nope.json").display(),
            dir.join("nope2.json").display()
        ))
        .unwrap();
        let client = DataMallClient::new("key").unwrap();
        let err = load_initial_dataset(&config, &client).await.unwrap_err();
        assert!(matches!(err, ReloadError::Refresh(RefreshError::Dataset(DatasetError::Io(_)))));
        std::fs::remove_dir_all(&dir).ok();
    }
}
