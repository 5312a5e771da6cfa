//! Validation Engine
//!
//! Checks a raw reading payload against the active field definitions of its
//! sensor type and coerces every declared value to its [`FieldValue`].
//!
//! Policy:
//! - every violation is collected, nothing fails fast
//! - bounds are inclusive
//! - JSON `null` counts as absent
//! - undeclared payload keys are dropped and reported, never rejected
//! - a sensor type with no active fields accepts the payload unvalidated and
//!   records a diagnostic

use crate::db::models::MeasurementField;
use crate::registry::SchemaRegistry;
use crate::scope::Scope;
use crate::values::{coerce, FieldValue};
use crate::Result;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// Outcome of validating one payload
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationReport {
    /// True when `violations` is empty
    pub accepted: bool,
    pub violations: Vec<String>,
    /// Non-fatal notes (no schema declared, dropped fields)
    pub diagnostics: Vec<String>,
    /// Coerced values of declared fields present in the payload
    pub values: BTreeMap<String, FieldValue>,
    /// Payload keys not declared for the sensor type
    pub dropped_fields: Vec<String>,
}

/// Validate `payload` against `fields`
pub fn validate_fields(fields: &[MeasurementField], payload: &Map<String, Value>) -> ValidationReport {
    let mut report = ValidationReport::default();

    if fields.is_empty() {
        report.accepted = true;
        report
            .diagnostics
            .push("no active fields declared for sensor type; payload accepted unvalidated".to_string());
        return report;
    }

    for field in fields {
        let raw = match payload.get(&field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    report.violations.push(format!("missing required field {}", field.name));
                }
                continue;
            }
            Some(raw) => raw,
        };

        let Some(value) = coerce(field.data_type, raw) else {
            report
                .violations
                .push(format!("{}: wrong type, expected {}", field.name, field.data_type));
            continue;
        };

        if let Some(number) = value.as_f64() {
            if let Some(violation) = range_violation(field, number) {
                report.violations.push(violation);
                continue;
            }
        }

        report.values.insert(field.name.clone(), value);
    }

    let mut dropped: Vec<String> = payload
        .keys()
        .filter(|key| !fields.iter().any(|f| &f.name == *key))
        .cloned()
        .collect();
    dropped.sort();

    if !dropped.is_empty() {
        report
            .diagnostics
            .push(format!("undeclared fields dropped: {}", dropped.join(", ")));
    }
    report.dropped_fields = dropped;
    report.accepted = report.violations.is_empty();
    report
}

fn range_violation(field: &MeasurementField, value: f64) -> Option<String> {
    let below = field.min.map(|min| value < min).unwrap_or(false);
    let above = field.max.map(|max| value > max).unwrap_or(false);

    if !below && !above {
        return None;
    }

    let min = field.min.map(|v| v.to_string()).unwrap_or_else(|| "-inf".to_string());
    let max = field.max.map(|v| v.to_string()).unwrap_or_else(|| "inf".to_string());
    Some(format!("{} out of range [{}, {}]: {}", field.name, min, max, value))
}

/// Registry-backed validator
#[derive(Clone)]
pub struct Validator {
    registry: SchemaRegistry,
}

impl Validator {
    pub fn new(registry: SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Fetch the sensor type's active fields and validate `payload` against them
    ///
    /// Returns the fields alongside the report so callers can migrate storage
    /// without a second registry lookup.
    pub async fn validate(
        &self,
        scope: &Scope,
        sensor_type_id: Uuid,
        payload: &Map<String, Value>,
    ) -> Result<(Vec<MeasurementField>, ValidationReport)> {
        let fields = self.registry.active_fields_for(scope, sensor_type_id).await?;
        let report = validate_fields(&fields, payload);

        if fields.is_empty() {
            warn!(
                sensor_type_id = %sensor_type_id,
                "No active fields declared; reading accepted without validation"
            );
        } else if !report.dropped_fields.is_empty() {
            warn!(
                sensor_type_id = %sensor_type_id,
                dropped = ?report.dropped_fields,
                "Undeclared reading fields dropped"
            );
        }

        debug!(
            sensor_type_id = %sensor_type_id,
            accepted = report.accepted,
            violations = report.violations.len(),
            "Validated reading"
        );

        Ok((fields, report))
    }
}
