//! Alert Lifecycle Manager
//!
//! State machine per (asset sensor, threshold):
//!
//! ```text
//! Normal --breach--> Active --breach--> Active (updated in place)
//!                      |
//!                      +--value back in range--> Resolved (terminal)
//! ```
//!
//! The partial unique index `uq_alerts_active` allows one unresolved alert
//! per pair. A breach is a single upsert against that index and a recovery is
//! a single conditional UPDATE, so the invariant holds across processes.
//! Inside one process evaluation is additionally serialized per asset sensor
//! with [`AlertManager::serialized`].
//!
//! Readings older than the current alert state are stale: they neither
//! refresh nor resolve an alert, and never reopen a pair resolved later.

use crate::db::models::{Alert, SensorReading, Severity, Threshold};
use crate::scope::{Scope, ScopedQuery};
use crate::uuid_utils::{generate, parse_stored};
use crate::{time, Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

const ALERT_COLUMNS: &str = "id, tenant_id, asset_sensor_id, threshold_id, field_name, severity, trigger_value, \
     threshold_min, threshold_max, message, resolved, alert_time, resolved_time";

/// Default and maximum page size for [`AlertManager::list`]
const DEFAULT_LIST_LIMIT: u32 = 100;
const MAX_LIST_LIMIT: u32 = 1000;

/// State change caused by one reading
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "transition", content = "alert", rename_all = "snake_case")]
pub enum AlertTransition {
    Created(Alert),
    Updated(Alert),
    Resolved(Alert),
}

impl AlertTransition {
    pub fn alert(&self) -> &Alert {
        match self {
            AlertTransition::Created(a) | AlertTransition::Updated(a) | AlertTransition::Resolved(a) => a,
        }
    }
}

/// Optional filters for [`AlertManager::list`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertFilter {
    pub asset_sensor_id: Option<Uuid>,
    pub threshold_id: Option<Uuid>,
    pub resolved: Option<bool>,
    pub severity: Option<Severity>,
    pub limit: Option<u32>,
}

/// Async mutex per key, dropped from the map once unused
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    /// Run `work` holding the lock for `key`
    ///
    /// The map entry is released when the returned future completes or is
    /// dropped, whichever comes first.
    async fn with_lock<F: Future>(&self, key: Uuid, work: F) -> F::Output {
        let entry = KeyEntry {
            locks: self,
            key,
            handle: self.handle(key),
        };
        let _held = entry.handle.lock().await;
        work.await
    }

    fn handle(&self, key: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        locks.entry(key).or_default().clone()
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}

/// One caller's claim on a key; removes the map entry when it is the last one
struct KeyEntry<'a> {
    locks: &'a KeyedLocks,
    key: Uuid,
    handle: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for KeyEntry<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Only the map and this handle left: nobody holds or waits
        let unused = Arc::strong_count(&self.handle) == 2
            && locks.get(&self.key).is_some_and(|h| Arc::ptr_eq(h, &self.handle));
        if unused {
            locks.remove(&self.key);
        }
    }
}

#[derive(Clone)]
pub struct AlertManager {
    pool: SqlitePool,
    key_locks: Arc<KeyedLocks>,
}

impl AlertManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            key_locks: Arc::new(KeyedLocks::default()),
        }
    }

    /// Run `work` with evaluation for `asset_sensor_id` serialized in this process
    pub async fn serialized<F: Future>(&self, asset_sensor_id: Uuid, work: F) -> F::Output {
        self.key_locks.with_lock(asset_sensor_id, work).await
    }

    /// Apply `reading` to every threshold in `thresholds` on `conn`
    ///
    /// Callers pass the transaction that stored the reading, so a failed
    /// evaluation rolls the reading back with it. Thresholds whose field is
    /// absent from the reading, or not numeric, cause no transition.
    pub async fn evaluate(
        &self,
        conn: &mut SqliteConnection,
        reading: &SensorReading,
        thresholds: &[Threshold],
    ) -> Result<Vec<AlertTransition>> {
        let mut transitions = Vec::new();

        for threshold in thresholds {
            let Some(value) = reading.values.get(&threshold.field_name).and_then(|v| v.as_f64()) else {
                continue;
            };

            let transition = if threshold.is_breached_by(value) {
                record_breach(conn, reading, threshold, value).await?
            } else {
                record_recovery(conn, reading, threshold, value).await?
            };

            match &transition {
                Some(t) => info!(
                    asset_sensor_id = %reading.asset_sensor_id,
                    threshold_id = %threshold.id,
                    alert_id = %t.alert().id,
                    "Alert {}: {}",
                    transition_name(t),
                    t.alert().message
                ),
                None => debug!(
                    asset_sensor_id = %reading.asset_sensor_id,
                    threshold_id = %threshold.id,
                    value,
                    "No alert transition"
                ),
            }
            transitions.extend(transition);
        }

        Ok(transitions)
    }

    pub async fn get(&self, scope: &Scope, id: Uuid) -> Result<Alert> {
        let mut conn = self.pool.acquire().await?;
        fetch_alert(&mut conn, scope, id).await
    }

    /// Alerts newest first
    pub async fn list(&self, scope: &Scope, filter: &AlertFilter) -> Result<Vec<Alert>> {
        let mut q = ScopedQuery::new(scope, &format!("SELECT {} FROM alerts", ALERT_COLUMNS), "tenant_id");
        if let Some(asset_sensor_id) = filter.asset_sensor_id {
            q.and_eq("asset_sensor_id", asset_sensor_id.to_string());
        }
        if let Some(threshold_id) = filter.threshold_id {
            q.and_eq("threshold_id", threshold_id.to_string());
        }
        if let Some(resolved) = filter.resolved {
            q.and_eq("resolved", resolved);
        }
        if let Some(severity) = filter.severity {
            q.and_eq("severity", severity.as_str());
        }
        let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
        q.push(" ORDER BY alert_time DESC, id LIMIT ");
        q.push_bind(i64::from(limit));

        let rows = q.build().fetch_all(&self.pool).await?;
        rows.iter().map(alert_from_row).collect()
    }

    /// Resolve an alert by hand; an already resolved alert is returned unchanged
    pub async fn resolve(&self, scope: &Scope, id: Uuid) -> Result<Alert> {
        let mut conn = self.pool.acquire().await?;
        let alert = fetch_alert(&mut conn, scope, id).await?;
        if alert.resolved {
            return Ok(alert);
        }

        sqlx::query("UPDATE alerts SET resolved = 1, resolved_time = ?, message = ? WHERE id = ? AND resolved = 0")
            .bind(time::to_storage(&time::now()))
            .bind(format!("{} alert resolved manually", alert.field_name))
            .bind(id.to_string())
            .execute(&mut *conn)
            .await?;

        info!(alert_id = %id, asset_sensor_id = %alert.asset_sensor_id, "Alert resolved manually");
        fetch_alert(&mut conn, scope, id).await
    }
}

fn transition_name(transition: &AlertTransition) -> &'static str {
    match transition {
        AlertTransition::Created(_) => "created",
        AlertTransition::Updated(_) => "updated",
        AlertTransition::Resolved(_) => "resolved",
    }
}

fn breach_message(threshold: &Threshold, value: f64) -> String {
    if let Some(custom) = threshold.alert_message.as_deref().filter(|m| !m.trim().is_empty()) {
        return custom.to_string();
    }
    match (threshold.min, threshold.max) {
        (Some(min), _) if value < min => {
            format!("{} value {} is below minimum {}", threshold.field_name, value, min)
        }
        (_, Some(max)) => format!("{} value {} is above maximum {}", threshold.field_name, value, max),
        _ => format!("{} value {} is out of range", threshold.field_name, value),
    }
}

/// Create the active alert or refresh it in place
async fn record_breach(
    conn: &mut SqliteConnection,
    reading: &SensorReading,
    threshold: &Threshold,
    value: f64,
) -> Result<Option<AlertTransition>> {
    let reading_time = time::to_storage(&reading.reading_time);

    // A pair resolved by a newer reading is not reopened by an older one
    let resolved_later: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS(
            SELECT 1 FROM alerts
            WHERE asset_sensor_id = ? AND threshold_id = ? AND resolved = 1 AND resolved_time > ?
        )
        "#,
    )
    .bind(reading.asset_sensor_id.to_string())
    .bind(threshold.id.to_string())
    .bind(&reading_time)
    .fetch_one(&mut *conn)
    .await?;
    if resolved_later {
        return Ok(None);
    }

    let new_id = generate();
    let id: Option<String> = sqlx::query_scalar(
        r#"
        INSERT INTO alerts (
            id, tenant_id, asset_sensor_id, threshold_id, field_name, severity, trigger_value,
            threshold_min, threshold_max, message, resolved, alert_time
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?)
        ON CONFLICT (asset_sensor_id, threshold_id) WHERE resolved = 0
        DO UPDATE SET
            trigger_value = excluded.trigger_value,
            threshold_min = excluded.threshold_min,
            threshold_max = excluded.threshold_max,
            message = excluded.message,
            alert_time = excluded.alert_time
        WHERE excluded.alert_time >= alerts.alert_time
        RETURNING id
        "#,
    )
    .bind(new_id.to_string())
    .bind(&reading.tenant_id)
    .bind(reading.asset_sensor_id.to_string())
    .bind(threshold.id.to_string())
    .bind(&threshold.field_name)
    .bind(threshold.severity.as_str())
    .bind(value)
    .bind(threshold.min)
    .bind(threshold.max)
    .bind(breach_message(threshold, value))
    .bind(&reading_time)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(id) = id else {
        return Ok(None);
    };
    let id = parse_stored(&id)?;
    let alert = fetch_alert(conn, &Scope::unrestricted(), id).await?;

    Ok(Some(if id == new_id {
        AlertTransition::Created(alert)
    } else {
        AlertTransition::Updated(alert)
    }))
}

/// Resolve the active alert, if any, when the value is back in range
async fn record_recovery(
    conn: &mut SqliteConnection,
    reading: &SensorReading,
    threshold: &Threshold,
    value: f64,
) -> Result<Option<AlertTransition>> {
    let reading_time = time::to_storage(&reading.reading_time);

    let id: Option<String> = sqlx::query_scalar(
        r#"
        UPDATE alerts SET resolved = 1, resolved_time = ?, message = ?
        WHERE asset_sensor_id = ? AND threshold_id = ? AND resolved = 0 AND alert_time <= ?
        RETURNING id
        "#,
    )
    .bind(&reading_time)
    .bind(format!("{} returned to normal ({})", threshold.field_name, value))
    .bind(reading.asset_sensor_id.to_string())
    .bind(threshold.id.to_string())
    .bind(&reading_time)
    .fetch_optional(&mut *conn)
    .await?;

    match id {
        Some(id) => {
            let alert = fetch_alert(conn, &Scope::unrestricted(), parse_stored(&id)?).await?;
            Ok(Some(AlertTransition::Resolved(alert)))
        }
        None => Ok(None),
    }
}

async fn fetch_alert(conn: &mut SqliteConnection, scope: &Scope, id: Uuid) -> Result<Alert> {
    let mut q = ScopedQuery::new(scope, &format!("SELECT {} FROM alerts", ALERT_COLUMNS), "tenant_id");
    q.and_eq("id", id.to_string());

    match q.build().fetch_optional(&mut *conn).await? {
        Some(row) => alert_from_row(&row),
        None => Err(Error::NotFoundOrAccessDenied(format!("alert {}", id))),
    }
}

fn alert_from_row(row: &SqliteRow) -> Result<Alert> {
    Ok(Alert {
        id: parse_stored(&row.try_get::<String, _>("id")?)?,
        tenant_id: row.try_get("tenant_id")?,
        asset_sensor_id: parse_stored(&row.try_get::<String, _>("asset_sensor_id")?)?,
        threshold_id: parse_stored(&row.try_get::<String, _>("threshold_id")?)?,
        field_name: row.try_get("field_name")?,
        severity: row.try_get::<String, _>("severity")?.parse()?,
        trigger_value: row.try_get("trigger_value")?,
        threshold_min: row.try_get("threshold_min")?,
        threshold_max: row.try_get("threshold_max")?,
        message: row.try_get("message")?,
        resolved: row.try_get("resolved")?,
        alert_time: time::from_storage(&row.try_get::<String, _>("alert_time")?)?,
        resolved_time: time::from_storage_opt(row.try_get("resolved_time")?)?,
    })
}
