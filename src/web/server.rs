use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::info;

use crate::AppState;

use super::handlers;

/// Build the API router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    Router::new()
        .route("/api/stops/nearest", get(handlers::nearest_stops))
        .route("/api/stops/search", get(handlers::search_stops))
        .route("/api/stops/{code}", get(handlers::get_stop))
        .route("/api/routes/{service}/{direction}", get(handlers::route_stops))
        .route("/api/arrivals/{code}", get(handlers::get_arrivals))
        .route("/api/status", get(handlers::get_status))
        .route("/api/refresh", post(handlers::refresh))
        // Middleware
        .layer(DefaultBodyLimit::max(4096))
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(cors)
        .with_state(state)
}

/// Run the axum web server on the configured bind address.
pub async fn run(state: Arc<AppState>) {
    let bind = state.config.server.bind.clone();
    let app = router(Arc::clone(&state));

    let listener = match tokio::net::TcpListener::bind(&bind).await {
        Ok(l) => {
            info!("[WEB] Server listening on http://{}", bind);
            l
        }
        Err(e) => {
            tracing::error!("[WEB] Failed to bind {}: {}", bind, e);
            state.shutdown.cancel();
            return;
        }
    };

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .ok();

    info!("[WEB] Server stopped");
}
