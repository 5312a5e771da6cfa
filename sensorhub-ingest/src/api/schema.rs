//! Sensor schema registration and inspection

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use sensorhub_common::db::models::{MeasurementField, SensorSchemaDefinition, SensorType};
use sensorhub_common::registry::RegisteredSchema;
use uuid::Uuid;

use super::context::RequestContext;
use crate::error::ApiResult;
use crate::AppState;

/// POST /api/sensor-types
///
/// Registers a sensor type with its measurement types and fields in one go.
/// Storage columns are created lazily by the first reading.
pub async fn register_sensor_type(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(definition): Json<SensorSchemaDefinition>,
) -> ApiResult<(StatusCode, Json<RegisteredSchema>)> {
    ctx.require_write()?;
    let registered = state
        .ingestor
        .registry()
        .register_sensor_schema(&ctx.scope, &definition)
        .await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

/// GET /api/sensor-types
pub async fn list_sensor_types(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> ApiResult<Json<Vec<SensorType>>> {
    Ok(Json(state.ingestor.registry().list_sensor_types(&ctx.scope).await?))
}

/// GET /api/sensor-types/:id
pub async fn get_sensor_type(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<SensorType>> {
    Ok(Json(state.ingestor.registry().get_sensor_type(&ctx.scope, id).await?))
}

/// GET /api/sensor-types/:id/fields
///
/// Active fields in validation order.
pub async fn get_active_fields(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<MeasurementField>>> {
    Ok(Json(state.ingestor.registry().active_fields_for(&ctx.scope, id).await?))
}
