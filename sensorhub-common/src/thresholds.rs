//! Threshold Store
//!
//! A threshold applies either to one asset sensor or to every asset sensor of
//! a sensor type. At most one active threshold exists per (scope, field,
//! severity); the partial unique indexes on `thresholds` back that rule.

use crate::db::models::{Severity, Threshold, ThresholdInput, ThresholdScope};
use crate::scope::{Scope, ScopedQuery};
use crate::uuid_utils::{generate, parse_stored, parse_stored_opt};
use crate::{time, Error, Result};
use serde::Deserialize;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

const THRESHOLD_COLUMNS: &str = "id, tenant_id, asset_sensor_id, sensor_type_id, field_name, min_value, \
     max_value, severity, alert_message, is_active, created_at, updated_at";

/// Optional filters for [`ThresholdStore::list`]
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ThresholdFilter {
    pub asset_sensor_id: Option<Uuid>,
    pub sensor_type_id: Option<Uuid>,
    pub field_name: Option<String>,
    /// `None` lists active and inactive thresholds
    pub active: Option<bool>,
}

#[derive(Clone)]
pub struct ThresholdStore {
    pool: SqlitePool,
}

impl ThresholdStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, scope: &Scope, input: &ThresholdInput) -> Result<Threshold> {
        validate_input(input)?;
        let tenant_id = scope.tenant_for_write(input.tenant_id.as_deref())?;
        let mut conn = self.pool.acquire().await?;

        if let Some(sensor_type_id) = input.scope.sensor_type_id {
            let known: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM sensor_types WHERE id = ? AND tenant_id = ?)",
            )
            .bind(sensor_type_id.to_string())
            .bind(&tenant_id)
            .fetch_one(&mut *conn)
            .await?;
            if !known {
                return Err(Error::SchemaNotFound(format!("sensor type {}", sensor_type_id)));
            }
        }

        ensure_no_duplicate(&mut conn, &tenant_id, &input.scope, &input.field_name, input.severity, None).await?;

        let now = time::now();
        let threshold = Threshold {
            id: generate(),
            tenant_id,
            scope: input.scope.clone(),
            field_name: input.field_name.trim().to_string(),
            min: input.min,
            max: input.max,
            severity: input.severity,
            alert_message: input.alert_message.clone(),
            is_active: true,
            created_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO thresholds (
                id, tenant_id, asset_sensor_id, sensor_type_id, field_name, min_value, max_value,
                severity, alert_message, is_active, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
        )
        .bind(threshold.id.to_string())
        .bind(&threshold.tenant_id)
        .bind(threshold.scope.asset_sensor_id.map(|id| id.to_string()))
        .bind(threshold.scope.sensor_type_id.map(|id| id.to_string()))
        .bind(&threshold.field_name)
        .bind(threshold.min)
        .bind(threshold.max)
        .bind(threshold.severity.as_str())
        .bind(&threshold.alert_message)
        .bind(time::to_storage(&now))
        .bind(time::to_storage(&now))
        .execute(&mut *conn)
        .await
        .map_err(|e| duplicate_or(e, &threshold.field_name, threshold.severity))?;

        info!(
            threshold_id = %threshold.id,
            tenant_id = %threshold.tenant_id,
            "Created {} threshold on '{}'",
            threshold.severity,
            threshold.field_name
        );
        Ok(threshold)
    }

    pub async fn get(&self, scope: &Scope, id: Uuid) -> Result<Threshold> {
        let mut conn = self.pool.acquire().await?;
        fetch_threshold(&mut conn, scope, id).await
    }

    pub async fn list(&self, scope: &Scope, filter: &ThresholdFilter) -> Result<Vec<Threshold>> {
        let mut q = ScopedQuery::new(
            scope,
            &format!("SELECT {} FROM thresholds", THRESHOLD_COLUMNS),
            "tenant_id",
        );
        if let Some(asset_sensor_id) = filter.asset_sensor_id {
            q.and_eq("asset_sensor_id", asset_sensor_id.to_string());
        }
        if let Some(sensor_type_id) = filter.sensor_type_id {
            q.and_eq("sensor_type_id", sensor_type_id.to_string());
        }
        if let Some(field_name) = &filter.field_name {
            q.and_eq("field_name", field_name.clone());
        }
        if let Some(active) = filter.active {
            q.and_eq("is_active", active);
        }
        q.push(" ORDER BY field_name, severity, created_at");

        let rows = q.build().fetch_all(&self.pool).await?;
        rows.iter().map(threshold_from_row).collect()
    }

    /// Replace field, bounds, severity and message. The scope is fixed at creation.
    pub async fn update(&self, scope: &Scope, id: Uuid, input: &ThresholdInput) -> Result<Threshold> {
        validate_input(input)?;
        let mut conn = self.pool.acquire().await?;
        let existing = fetch_threshold(&mut conn, scope, id).await?;

        if input.scope != existing.scope {
            return Err(Error::InvalidInput("threshold scope cannot be changed".to_string()));
        }
        if existing.is_active {
            ensure_no_duplicate(
                &mut conn,
                &existing.tenant_id,
                &existing.scope,
                &input.field_name,
                input.severity,
                Some(id),
            )
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE thresholds
            SET field_name = ?, min_value = ?, max_value = ?, severity = ?, alert_message = ?, updated_at = ?
            WHERE id = ? AND tenant_id = ?
            "#,
        )
        .bind(input.field_name.trim())
        .bind(input.min)
        .bind(input.max)
        .bind(input.severity.as_str())
        .bind(&input.alert_message)
        .bind(time::to_storage(&time::now()))
        .bind(id.to_string())
        .bind(&existing.tenant_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| duplicate_or(e, &input.field_name, input.severity))?;

        fetch_threshold(&mut conn, scope, id).await
    }

    /// Deactivate a threshold and resolve its open alerts
    pub async fn deactivate(&self, scope: &Scope, id: Uuid) -> Result<Threshold> {
        let mut tx = self.pool.begin().await?;
        let existing = fetch_threshold(&mut tx, scope, id).await?;
        let now = time::to_storage(&time::now());

        sqlx::query("UPDATE thresholds SET is_active = 0, updated_at = ? WHERE id = ? AND tenant_id = ?")
            .bind(&now)
            .bind(id.to_string())
            .bind(&existing.tenant_id)
            .execute(&mut *tx)
            .await?;

        let closed = sqlx::query(
            r#"
            UPDATE alerts SET resolved = 1, resolved_time = ?, message = ?
            WHERE threshold_id = ? AND resolved = 0
            "#,
        )
        .bind(&now)
        .bind(format!("{} threshold on {} deactivated", existing.severity, existing.field_name))
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let threshold = fetch_threshold(&mut tx, scope, id).await?;
        tx.commit().await?;

        info!(threshold_id = %id, alerts_closed = closed, "Deactivated threshold");
        Ok(threshold)
    }

    /// Delete a threshold together with its alert history
    pub async fn delete(&self, scope: &Scope, id: Uuid) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let existing = fetch_threshold(&mut conn, scope, id).await?;

        sqlx::query("DELETE FROM thresholds WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(&existing.tenant_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Active thresholds that apply to a reading of `asset_sensor_id`
    ///
    /// Asset-sensor thresholds come first. A field with any asset-sensor
    /// threshold ignores the sensor-type-wide thresholds for that field.
    pub async fn active_thresholds_for(
        &self,
        scope: &Scope,
        sensor_type_id: Uuid,
        asset_sensor_id: Uuid,
    ) -> Result<Vec<Threshold>> {
        let mut conn = self.pool.acquire().await?;
        active_thresholds_in(&mut conn, scope, sensor_type_id, asset_sensor_id).await
    }
}

/// [`ThresholdStore::active_thresholds_for`] on a caller's connection or transaction
pub(crate) async fn active_thresholds_in(
    conn: &mut SqliteConnection,
    scope: &Scope,
    sensor_type_id: Uuid,
    asset_sensor_id: Uuid,
) -> Result<Vec<Threshold>> {
    let mut q = ScopedQuery::new(
        scope,
        &format!("SELECT {} FROM thresholds", THRESHOLD_COLUMNS),
        "tenant_id",
    );
    q.and_raw("is_active = 1");
    q.push(" AND (asset_sensor_id = ");
    q.push_bind(asset_sensor_id.to_string());
    q.push(" OR (asset_sensor_id IS NULL AND sensor_type_id = ");
    q.push_bind(sensor_type_id.to_string());
    q.push("))");
    q.push(" ORDER BY asset_sensor_id IS NULL, field_name, severity");

    let rows = q.build().fetch_all(&mut *conn).await?;
    let thresholds = rows.iter().map(threshold_from_row).collect::<Result<Vec<_>>>()?;
    Ok(prefer_specific(thresholds))
}

/// Drop sensor-type-wide thresholds shadowed by asset-sensor ones, specific first
pub fn prefer_specific(thresholds: Vec<Threshold>) -> Vec<Threshold> {
    let (specific, general): (Vec<_>, Vec<_>) = thresholds.into_iter().partition(|t| t.scope.is_asset_sensor());
    let shadowed: HashSet<String> = specific.iter().map(|t| t.field_name.clone()).collect();

    specific
        .into_iter()
        .chain(general.into_iter().filter(|t| !shadowed.contains(&t.field_name)))
        .collect()
}

fn validate_input(input: &ThresholdInput) -> Result<()> {
    if input.field_name.trim().is_empty() {
        return Err(Error::InvalidInput("threshold field_name must not be empty".to_string()));
    }
    if input.scope.asset_sensor_id.is_none() && input.scope.sensor_type_id.is_none() {
        return Err(Error::InvalidInput(
            "threshold scope needs an asset_sensor_id or a sensor_type_id".to_string(),
        ));
    }

    match (input.min, input.max) {
        (None, None) => Err(Error::InvalidThresholdRange(
            "at least one of min and max is required".to_string(),
        )),
        (min, max) if min.into_iter().chain(max).any(|v| !v.is_finite()) => Err(
            Error::InvalidThresholdRange("bounds must be finite numbers".to_string()),
        ),
        (Some(min), Some(max)) if min >= max => Err(Error::InvalidThresholdRange(format!(
            "min ({}) must be less than max ({})",
            min, max
        ))),
        _ => Ok(()),
    }
}

fn duplicate_or(err: sqlx::Error, field_name: &str, severity: Severity) -> Error {
    let err = Error::from(err);
    if err.is_unique_violation() {
        Error::DuplicateThreshold(format!("active {} threshold on '{}' already exists", severity, field_name))
    } else {
        err
    }
}

async fn ensure_no_duplicate(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    scope: &ThresholdScope,
    field_name: &str,
    severity: Severity,
    except: Option<Uuid>,
) -> Result<()> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
        "SELECT EXISTS(SELECT 1 FROM thresholds WHERE is_active = 1 AND tenant_id = ",
    );
    qb.push_bind(tenant_id.to_string());
    qb.push(" AND field_name = ");
    qb.push_bind(field_name.trim().to_string());
    qb.push(" AND severity = ");
    qb.push_bind(severity.as_str());

    match scope.asset_sensor_id {
        Some(asset_sensor_id) => {
            qb.push(" AND asset_sensor_id = ");
            qb.push_bind(asset_sensor_id.to_string());
        }
        None => {
            qb.push(" AND asset_sensor_id IS NULL AND sensor_type_id = ");
            qb.push_bind(scope.sensor_type_id.map(|id| id.to_string()));
        }
    }
    if let Some(id) = except {
        qb.push(" AND id <> ");
        qb.push_bind(id.to_string());
    }
    qb.push(")");

    let exists: bool = qb.build_query_scalar::<bool>().fetch_one(&mut *conn).await?;
    if exists {
        return Err(Error::DuplicateThreshold(format!(
            "active {} threshold on '{}' already exists",
            severity, field_name
        )));
    }
    Ok(())
}

async fn fetch_threshold(conn: &mut SqliteConnection, scope: &Scope, id: Uuid) -> Result<Threshold> {
    let mut q = ScopedQuery::new(
        scope,
        &format!("SELECT {} FROM thresholds", THRESHOLD_COLUMNS),
        "tenant_id",
    );
    q.and_eq("id", id.to_string());

    match q.build().fetch_optional(&mut *conn).await? {
        Some(row) => threshold_from_row(&row),
        None => Err(Error::NotFoundOrAccessDenied(format!("threshold {}", id))),
    }
}

fn threshold_from_row(row: &SqliteRow) -> Result<Threshold> {
    Ok(Threshold {
        id: parse_stored(&row.try_get::<String, _>("id")?)?,
        tenant_id: row.try_get("tenant_id")?,
        scope: ThresholdScope {
            asset_sensor_id: parse_stored_opt(row.try_get("asset_sensor_id")?)?,
            sensor_type_id: parse_stored_opt(row.try_get("sensor_type_id")?)?,
        },
        field_name: row.try_get("field_name")?,
        min: row.try_get("min_value")?,
        max: row.try_get("max_value")?,
        severity: row.try_get::<String, _>("severity")?.parse()?,
        alert_message: row.try_get("alert_message")?,
        is_active: row.try_get("is_active")?,
        created_at: time::from_storage(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::from_storage(&row.try_get::<String, _>("updated_at")?)?,
    })
}
