//! Alert queries and manual resolution

use axum::{
    extract::{Path, Query, State},
    Json,
};
use sensorhub_common::alerts::AlertFilter;
use sensorhub_common::db::models::Alert;
use uuid::Uuid;

use super::context::RequestContext;
use crate::error::ApiResult;
use crate::AppState;

/// GET /api/alerts
pub async fn list_alerts(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(filter): Query<AlertFilter>,
) -> ApiResult<Json<Vec<Alert>>> {
    Ok(Json(state.ingestor.alerts().list(&ctx.scope, &filter).await?))
}

/// GET /api/alerts/:id
pub async fn get_alert(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Alert>> {
    Ok(Json(state.ingestor.alerts().get(&ctx.scope, id).await?))
}

/// POST /api/alerts/:id/resolve
pub async fn resolve_alert(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Alert>> {
    ctx.require_write()?;
    Ok(Json(state.ingestor.alerts().resolve(&ctx.scope, id).await?))
}
