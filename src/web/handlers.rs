use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::models::{Coordinate, Direction, StopRecord};
use crate::state::ReloadError;
use crate::transit::{RefreshError, RefreshOutcome};
use crate::AppState;

#[derive(Deserialize)]
pub struct NearestParams {
    lat: Option<f64>,
    lon: Option<f64>,
    k: Option<usize>,
}

#[derive(Deserialize)]
pub struct SearchParams {
    q: Option<String>,
}

/// GET /api/stops/nearest?lat&lon&k: nearest stops with distances.
pub async fn nearest_stops(
    State(state): State<Arc<AppState>>,
    Query(params): Query<NearestParams>,
) -> impl IntoResponse {
    let (Some(lat), Some(lon)) = (params.lat, params.lon) else {
        return failure(StatusCode::BAD_REQUEST, "lat and lon are required".to_string());
    };
    let origin = Coordinate::new(lat, lon);
    if !origin.is_finite() || lat.abs() > 90.0 || lon.abs() > 180.0 {
        return failure(StatusCode::BAD_REQUEST, format!("Invalid coordinate ({}, {})", lat, lon));
    }

    let limits = &state.config.query;
    let k = params.k.unwrap_or(limits.default_nearest).min(limits.max_nearest);

    let stops: Vec<serde_json::Value> = state
        .transit
        .snapshot()
        .nearest(origin, k)
        .iter()
        .map(|n| {
            let mut stop = stop_json(&n.stop);
            stop["distance_m"] = json!(n.distance_m.round());
            stop
        })
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "origin": { "latitude": lat, "longitude": lon },
            "count": stops.len(),
            "stops": stops,
        })),
    )
}

/// GET /api/stops/search?q=: stops whose description has every query word.
pub async fn search_stops(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> impl IntoResponse {
    let query = params.q.unwrap_or_default();
    let words: Vec<&str> = query.split_whitespace().collect();
    let stops: Vec<serde_json::Value> = state
        .transit
        .search_stops_by_tokens(&words)
        .iter()
        .map(|s| stop_json(s))
        .collect();

    Json(json!({
        "success": true,
        "query": query,
        "total": stops.len(),
        "stops": stops,
    }))
}

/// GET /api/stops/{code}: one stop by code.
pub async fn get_stop(State(state): State<Arc<AppState>>, Path(code): Path<String>) -> impl IntoResponse {
    match state.transit.stop_by_code(&code) {
        Some(stop) => (
            StatusCode::OK,
            Json(json!({ "success": true, "stop": stop_json(&stop) })),
        ),
        None => failure(StatusCode::NOT_FOUND, format!("Stop '{}' not found", code)),
    }
}

/// GET /api/routes/{service}/{direction}: stops along a route in order.
pub async fn route_stops(
    State(state): State<Arc<AppState>>,
    Path((service, direction)): Path<(String, u8)>,
) -> impl IntoResponse {
    let Ok(dir) = Direction::try_from(direction) else {
        return failure(
            StatusCode::BAD_REQUEST,
            format!("Direction must be 1 or 2, got {}", direction),
        );
    };

    match state.transit.route_stops(&service, dir) {
        Some(stops) => {
            let stops: Vec<serde_json::Value> = stops.iter().map(|s| stop_json(s)).collect();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "service": service.trim().to_uppercase(),
                    "direction": dir.as_u8(),
                    "stops": stops,
                })),
            )
        }
        None => failure(StatusCode::NOT_FOUND, format!("Service '{}' not found", service)),
    }
}

/// GET /api/arrivals/{code}: next buses at a stop, cached briefly.
pub async fn get_arrivals(State(state): State<Arc<AppState>>, Path(code): Path<String>) -> impl IntoResponse {
    let Some(stop) = state.transit.stop_by_code(&code) else {
        return failure(StatusCode::NOT_FOUND, format!("Stop '{}' not found", code));
    };

    match state.arrivals.arrivals(&stop.code).await {
        Ok(services) => {
            let now = chrono::Utc::now();
            let services: Vec<serde_json::Value> = services
                .iter()
                .map(|s| {
                    json!({
                        "service": s.service_number,
                        "operator": s.operator,
                        "minutes": s.minutes_until(now),
                        "load": s.next_bus.load,
                        "type": s.next_bus.bus_type,
                    })
                })
                .collect();
            (
                StatusCode::OK,
                Json(json!({
                    "success": true,
                    "stop": stop_json(&stop),
                    "services": services,
                })),
            )
        }
        Err(e) => {
            warn!("[WEB] Arrivals for {} failed: {}", stop.code, e);
            failure(StatusCode::BAD_GATEWAY, format!("Arrival lookup failed: {}", e))
        }
    }
}

/// GET /api/status: dataset and cache status.
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let snapshot = state.transit.snapshot();
    let cache = state.arrivals.cache();

    Json(json!({
        "success": true,
        "status": {
            "stops": snapshot.stop_count(),
            "routes": snapshot.route_count(),
            "checksum": snapshot.checksum(),
            "loaded_at": snapshot.loaded_at().to_rfc3339(),
            "refreshing": state.transit.is_refreshing(),
            "source": format!("{:?}", state.config.dataset.source).to_lowercase(),
            "cache_entries": cache.len(),
            "cache_capacity": cache.capacity(),
        }
    }))
}

/// POST /api/refresh: reload the dataset from the configured source.
pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    info!("[WEB] Refresh requested");

    match state.reload_dataset().await {
        Ok(RefreshOutcome::Replaced { stops, routes }) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "changed": true,
                "stops": stops,
                "routes": routes,
            })),
        ),
        Ok(RefreshOutcome::Unchanged) => (
            StatusCode::OK,
            Json(json!({ "success": true, "changed": false })),
        ),
        Err(e) => {
            warn!("[WEB] Refresh failed: {}", e);
            let status = match e {
                ReloadError::Refresh(RefreshError::InProgress) => StatusCode::CONFLICT,
                ReloadError::Refresh(RefreshError::Dataset(_)) => StatusCode::UNPROCESSABLE_ENTITY,
                ReloadError::Upstream(_) => StatusCode::BAD_GATEWAY,
                ReloadError::Task(_) => StatusCode::INTERNAL_SERVER_ERROR,
            };
            failure(status, e.to_string())
        }
    }
}

// -- Helper functions --

fn failure(status: StatusCode, message: String) -> (StatusCode, Json<serde_json::Value>) {
    (status, Json(json!({ "success": false, "error": message })))
}

fn stop_json(stop: &StopRecord) -> serde_json::Value {
    json!({
        "code": stop.code,
        "road_name": stop.road_name,
        "description": stop.description,
        "latitude": stop.latitude,
        "longitude": stop.longitude,
    })
}
