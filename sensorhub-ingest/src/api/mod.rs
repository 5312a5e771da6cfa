//! HTTP API handlers for sensorhub-ingest

pub mod alerts;
pub mod context;
pub mod health;
pub mod readings;
pub mod schema;
pub mod thresholds;

pub use alerts::{get_alert, list_alerts, resolve_alert};
pub use context::RequestContext;
pub use health::health_routes;
pub use readings::{get_reading, ingest_batch, ingest_reading, list_asset_sensor_readings};
pub use schema::{get_active_fields, get_sensor_type, list_sensor_types, register_sensor_type};
pub use thresholds::{create_threshold, deactivate_threshold, get_threshold, list_thresholds, update_threshold};
