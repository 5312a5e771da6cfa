//! Database models

use crate::values::{DataType, FieldValue};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// A class of physical device (manufacturer/model)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorType {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub description: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create/update payload for a sensor type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorTypeInput {
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Named grouping of fields reported by a sensor type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementType {
    pub id: Uuid,
    pub tenant_id: String,
    pub sensor_type_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    /// Free-form, never interpreted by validation
    pub properties_schema: Value,
    /// UI display configuration, never interpreted by validation
    pub ui_config: Value,
    pub version: i64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementTypeInput {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub properties_schema: Option<Value>,
    #[serde(default)]
    pub ui_config: Option<Value>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// One value within a measurement type
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeasurementField {
    pub id: Uuid,
    pub tenant_id: String,
    pub measurement_type_id: Uuid,
    /// Storage-stable identifier; also the reading-table column name
    pub name: String,
    pub label: String,
    pub data_type: DataType,
    pub required: bool,
    pub unit: Option<String>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub position: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub name: String,
    pub label: String,
    pub data_type: DataType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Full schema of a sensor type, registered in one transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorSchemaDefinition {
    #[serde(flatten)]
    pub sensor_type: SensorTypeInput,
    #[serde(default)]
    pub measurement_types: Vec<MeasurementTypeDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementTypeDefinition {
    #[serde(flatten)]
    pub measurement_type: MeasurementTypeInput,
    pub fields: Vec<FieldDefinition>,
}

/// Incoming reading before validation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadingInput {
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub asset_sensor_id: Uuid,
    pub sensor_type_id: Uuid,
    #[serde(default)]
    pub mac_address: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub reading_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

/// Validated, persisted reading
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub id: Uuid,
    pub tenant_id: String,
    pub asset_sensor_id: Uuid,
    pub sensor_type_id: Uuid,
    pub mac_address: Option<String>,
    pub location: Option<String>,
    pub reading_time: DateTime<Utc>,
    pub values: BTreeMap<String, FieldValue>,
}

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(Error::InvalidInput(format!("Unknown severity: {}", other))),
        }
    }
}

/// What a threshold applies to. An asset-sensor id makes it asset-sensor scoped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdScope {
    #[serde(default)]
    pub asset_sensor_id: Option<Uuid>,
    #[serde(default)]
    pub sensor_type_id: Option<Uuid>,
}

impl ThresholdScope {
    pub fn asset_sensor(asset_sensor_id: Uuid) -> Self {
        Self {
            asset_sensor_id: Some(asset_sensor_id),
            sensor_type_id: None,
        }
    }

    pub fn sensor_type(sensor_type_id: Uuid) -> Self {
        Self {
            asset_sensor_id: None,
            sensor_type_id: Some(sensor_type_id),
        }
    }

    pub fn is_asset_sensor(&self) -> bool {
        self.asset_sensor_id.is_some()
    }
}

/// Breach rule for one field
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Threshold {
    pub id: Uuid,
    pub tenant_id: String,
    pub scope: ThresholdScope,
    pub field_name: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub severity: Severity,
    pub alert_message: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Threshold {
    /// True when `value` lies outside the configured bounds
    pub fn is_breached_by(&self, value: f64) -> bool {
        self.min.map(|min| value < min).unwrap_or(false)
            || self.max.map(|max| value > max).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdInput {
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub scope: ThresholdScope,
    pub field_name: String,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
    pub severity: Severity,
    #[serde(default)]
    pub alert_message: Option<String>,
}

/// Stateful record of a threshold breach
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub id: Uuid,
    pub tenant_id: String,
    pub asset_sensor_id: Uuid,
    pub threshold_id: Uuid,
    pub field_name: String,
    pub severity: Severity,
    pub trigger_value: f64,
    pub threshold_min: Option<f64>,
    pub threshold_max: Option<f64>,
    pub message: String,
    pub resolved: bool,
    pub alert_time: DateTime<Utc>,
    pub resolved_time: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}
