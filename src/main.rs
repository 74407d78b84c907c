use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::signal;
use tracing::{error, info, warn};

use bus_arrival::config::{Config, DatasetSource};
use bus_arrival::datamall::DataMallClient;
use bus_arrival::state::load_initial_dataset;
use bus_arrival::transit::{RefreshOutcome, TransitService};
use bus_arrival::{web, AppState};

/// How often dataset file mtimes are checked.
const FILE_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    // Initialize tracing (structured logging)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("bus_arrival=info")),
        )
        .init();

    info!("SG Bus Arrival starting");

    let config_path = find_config_path();
    info!("Config file: {}", config_path.display());

    let config = match Config::load(&config_path) {
        Ok(cfg) => {
            info!(
                "Config loaded: source {:?}, cache {}s/{} items, bind {}",
                cfg.dataset.source, cfg.cache.ttl_seconds, cfg.cache.item_limit, cfg.server.bind
            );
            cfg
        }
        Err(e) => {
            error!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    // A missing key only fails arrival lookups
    let client = match DataMallClient::from_env() {
        Ok(c) => c,
        Err(e) => {
            warn!("{}; arrival lookups will fail", e);
            match DataMallClient::new("") {
                Ok(c) => c,
                Err(e) => {
                    error!("{}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    let dataset = match load_initial_dataset(&config, &client).await {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to load dataset: {}", e);
            std::process::exit(1);
        }
    };
    let transit = match TransitService::new(&dataset) {
        Ok(t) => t,
        Err(e) => {
            error!("Invalid dataset: {}", e);
            std::process::exit(1);
        }
    };
    drop(dataset);

    let state = Arc::new(AppState::new(config, transit, client));

    let refresh_handle = tokio::spawn(refresh_task(Arc::clone(&state)));
    let web_handle = tokio::spawn(web::server::run(Arc::clone(&state)));

    info!("All tasks started");

    tokio::select! {
        _ = shutdown_signal() => info!("Shutdown signal received"),
        _ = state.shutdown.cancelled() => warn!("Shutting down after a task failure"),
    }

    state.shutdown.cancel();
    let _ = refresh_handle.await;
    let _ = web_handle.await;

    info!("Shutdown complete");
}

/// Find the config.json file (check CWD, then parent directory).
fn find_config_path() -> PathBuf {
    let candidates = [PathBuf::from("config.json"), PathBuf::from("../config.json")];
    for path in &candidates {
        if path.exists() {
            return path.clone();
        }
    }
    PathBuf::from("config.json")
}

/// Background refresh: file mtime polling or periodic upstream refetch.
async fn refresh_task(state: Arc<AppState>) {
    let source = state.config.dataset.source;
    let period = match source {
        DatasetSource::Files => FILE_POLL_INTERVAL,
        DatasetSource::Upstream => state.config.refresh_interval(),
    };
    let mut interval = tokio::time::interval(period);
    // The first tick completes immediately and the startup load just ran
    interval.tick().await;

    let mut last_mtimes = dataset_mtimes(&state);
    info!("[REFRESH] Background refresh task started ({:?}, every {}s)", source, period.as_secs());

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                info!("[REFRESH] Shutting down");
                break;
            }
            _ = interval.tick() => {
                if source == DatasetSource::Files {
                    let current = dataset_mtimes(&state);
                    if current == last_mtimes {
                        continue;
                    }
                    info!("[REFRESH] Dataset files changed, reloading...");
                    last_mtimes = current;
                }

                match state.reload_dataset().await {
                    Ok(RefreshOutcome::Unchanged) => {}
                    Ok(RefreshOutcome::Replaced { .. }) => {
                        info!("[REFRESH] {} stops now live", state.transit.snapshot().stop_count());
                    }
                    Err(e) => warn!("[REFRESH] Reload failed: {}", e),
                }
            }
        }
    }
}

fn dataset_mtimes(state: &AppState) -> (Option<SystemTime>, Option<SystemTime>) {
    let mtime = |path: &PathBuf| std::fs::metadata(path).and_then(|m| m.modified()).ok();
    (
        mtime(&state.config.dataset.stops_path),
        mtime(&state.config.dataset.routes_path),
    )
}

/// Wait for SIGTERM or SIGINT (Ctrl-C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl-C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
