//! sensorhub-ingest library - HTTP surface over the telemetry core
//!
//! Handlers only translate between HTTP and `sensorhub_common`; tenant
//! scoping, validation, migration and alerting all live in the library.

use axum::Router;
use sensorhub_common::Ingestor;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub ingestor: Ingestor,
    /// Deadline applied when a request does not send `X-Deadline-Ms`
    pub default_deadline_ms: u64,
}

impl AppState {
    pub fn new(ingestor: Ingestor, default_deadline_ms: u64) -> Self {
        Self {
            ingestor,
            default_deadline_ms,
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::{get, post};

    let api = Router::new()
        .route("/api/readings", post(api::ingest_reading))
        .route("/api/readings/batch", post(api::ingest_batch))
        .route("/api/readings/:id", get(api::get_reading))
        .route("/api/asset-sensors/:id/readings", get(api::list_asset_sensor_readings))
        .route(
            "/api/sensor-types",
            post(api::register_sensor_type).get(api::list_sensor_types),
        )
        .route("/api/sensor-types/:id", get(api::get_sensor_type))
        .route("/api/sensor-types/:id/fields", get(api::get_active_fields))
        .route(
            "/api/thresholds",
            post(api::create_threshold).get(api::list_thresholds),
        )
        .route(
            "/api/thresholds/:id",
            get(api::get_threshold)
                .put(api::update_threshold)
                .delete(api::deactivate_threshold),
        )
        .route("/api/alerts", get(api::list_alerts))
        .route("/api/alerts/:id", get(api::get_alert))
        .route("/api/alerts/:id/resolve", post(api::resolve_alert));

    Router::new()
        .merge(api)
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
