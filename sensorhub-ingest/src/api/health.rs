//! Liveness check; needs no tenant context

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the database cannot be read
    pub status: &'static str,
    pub module: &'static str,
    pub version: &'static str,
    /// Entries in the reading-column migration log
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_migrations: Option<usize>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let schema_migrations = match state.ingestor.migrator().applied_migrations().await {
        Ok(log) => Some(log.len()),
        Err(e) => {
            warn!("Health check could not read migration log: {}", e);
            None
        }
    };

    Json(HealthResponse {
        status: if schema_migrations.is_some() { "ok" } else { "degraded" },
        module: "sensorhub-ingest",
        version: env!("CARGO_PKG_VERSION"),
        schema_migrations,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
