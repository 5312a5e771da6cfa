//! Threshold management

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sensorhub_common::db::models::{Threshold, ThresholdInput};
use sensorhub_common::thresholds::ThresholdFilter;
use uuid::Uuid;

use super::context::RequestContext;
use crate::error::ApiResult;
use crate::AppState;

/// POST /api/thresholds
pub async fn create_threshold(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(input): Json<ThresholdInput>,
) -> ApiResult<(StatusCode, Json<Threshold>)> {
    ctx.require_write()?;
    let threshold = state.ingestor.thresholds().create(&ctx.scope, &input).await?;
    Ok((StatusCode::CREATED, Json(threshold)))
}

/// GET /api/thresholds
pub async fn list_thresholds(
    State(state): State<AppState>,
    ctx: RequestContext,
    Query(filter): Query<ThresholdFilter>,
) -> ApiResult<Json<Vec<Threshold>>> {
    Ok(Json(state.ingestor.thresholds().list(&ctx.scope, &filter).await?))
}

/// GET /api/thresholds/:id
pub async fn get_threshold(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Threshold>> {
    Ok(Json(state.ingestor.thresholds().get(&ctx.scope, id).await?))
}

/// PUT /api/thresholds/:id
pub async fn update_threshold(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
    Json(input): Json<ThresholdInput>,
) -> ApiResult<Json<Threshold>> {
    ctx.require_write()?;
    Ok(Json(state.ingestor.thresholds().update(&ctx.scope, id, &input).await?))
}

/// DELETE /api/thresholds/:id
///
/// Deactivates rather than deletes, so alert history keeps its threshold.
/// Open alerts raised by the threshold are resolved.
pub async fn deactivate_threshold(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Threshold>> {
    ctx.require_write()?;
    Ok(Json(state.ingestor.thresholds().deactivate(&ctx.scope, id).await?))
}
