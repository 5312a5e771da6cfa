//! Reading ingestion and lookup

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sensorhub_common::db::models::{ReadingInput, SensorReading};
use sensorhub_common::ingest::{BatchOutcome, IngestOutcome};
use serde::Deserialize;
use uuid::Uuid;

use super::context::RequestContext;
use crate::error::ApiResult;
use crate::AppState;

const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 1000;

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub readings: Vec<ReadingInput>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
}

/// POST /api/readings
pub async fn ingest_reading(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(input): Json<ReadingInput>,
) -> ApiResult<(StatusCode, Json<IngestOutcome>)> {
    ctx.require_write()?;
    let outcome = state.ingestor.ingest(&ctx.scope, input, ctx.deadline).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /api/readings/batch
pub async fn ingest_batch(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<BatchRequest>,
) -> ApiResult<(StatusCode, Json<BatchOutcome>)> {
    ctx.require_write()?;
    let outcome = state
        .ingestor
        .ingest_batch(&ctx.scope, request.readings, ctx.deadline)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// GET /api/readings/:id
pub async fn get_reading(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SensorReading>> {
    Ok(Json(state.ingestor.readings().get(&ctx.scope, id).await?))
}

/// GET /api/asset-sensors/:id/readings
pub async fn list_asset_sensor_readings(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(asset_sensor_id): Path<Uuid>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<SensorReading>>> {
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    let readings = state
        .ingestor
        .readings()
        .list_for_asset_sensor(&ctx.scope, asset_sensor_id, limit)
        .await?;
    Ok(Json(readings))
}
