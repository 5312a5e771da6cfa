//! Storage Schema Migrator
//!
//! Keeps the wide `sensor_readings` table in step with the Schema Registry.
//! Every registered field gets a column; every sensor type with bounded or
//! required fields gets a `BEFORE INSERT` trigger enforcing those rules.
//!
//! **Serialization:** all DDL runs through one writer. Inside the process an
//! async mutex orders callers; across processes the first statement of every
//! migration transaction writes the `migration_locks` row, which takes
//! SQLite's database write lock until commit. DDL is transactional in SQLite,
//! so a failed or abandoned migration leaves nothing behind.
//!
//! **Log:** every applied statement is appended to `reading_column_migrations`
//! and [`SchemaMigrator::replay`] re-applies it on startup.

use crate::db::models::MeasurementField;
use crate::db::schema_sync::{quote_ident, same_affinity, table_columns, ActualColumn, ColumnDefinition};
use crate::db::table_schemas::READINGS_TABLE;
use crate::deadline::Deadline;
use crate::values::DataType;
use crate::{time, Error, Result};
use serde::Serialize;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pseudo data type recorded in the log for trigger statements
const TRIGGER_LOG_TYPE: &str = "trigger";
/// Pseudo data type recorded in the log for index statements
const INDEX_LOG_TYPE: &str = "index";

/// What one `ensure_columns` call changed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MigrationReport {
    /// Columns added to the reading table, in order
    pub added_columns: Vec<String>,
    /// Total DDL statements applied (columns, indexes, triggers)
    pub statements_applied: usize,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.statements_applied == 0
    }
}

/// One row of the migration log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnMigration {
    pub version: i64,
    pub column_name: String,
    pub data_type: String,
    pub statement: String,
    pub applied_at: String,
}

/// A pending DDL statement and the log entry describing it
#[derive(Debug, Clone, PartialEq)]
struct PlannedStatement {
    subject: String,
    data_type: String,
    sql: String,
    adds_column: bool,
}

/// Single writer for reading-table DDL
#[derive(Clone)]
pub struct SchemaMigrator {
    pool: SqlitePool,
    lock: Arc<Mutex<()>>,
    conflict_retries: u32,
}

impl SchemaMigrator {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock: Arc::new(Mutex::new(())),
            conflict_retries: 1,
        }
    }

    /// Number of times a [`Error::MigrationConflict`] is retried before failing
    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.conflict_retries = retries;
        self
    }

    /// Make sure the reading table can hold `fields` for `sensor_type_id`
    ///
    /// `fields` is the sensor type's full active field list; the sensor
    /// type's trigger is rebuilt from it. Calling again with the same list
    /// applies nothing and takes no lock.
    pub async fn ensure_columns(
        &self,
        sensor_type_id: Uuid,
        fields: &[MeasurementField],
        deadline: Deadline,
    ) -> Result<MigrationReport> {
        deadline
            .run("schema migration", self.ensure_with_retry(sensor_type_id, fields))
            .await
    }

    async fn ensure_with_retry(&self, sensor_type_id: Uuid, fields: &[MeasurementField]) -> Result<MigrationReport> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.ensure_once(sensor_type_id, fields).await {
                Ok(report) => return Ok(report),
                Err(err) => {
                    let conflict = match err {
                        Error::MigrationConflict(message) => message,
                        err if err.is_lock_contention() => {
                            format!("reading table locked by another migrator: {}", err)
                        }
                        err => return Err(err),
                    };

                    if attempt > self.conflict_retries {
                        warn!(
                            sensor_type_id = %sensor_type_id,
                            attempt,
                            "Schema migration failed after retry: {}",
                            conflict
                        );
                        return Err(Error::MigrationConflict(format!(
                            "{} (gave up after {} attempts)",
                            conflict, attempt
                        )));
                    }

                    warn!(
                        sensor_type_id = %sensor_type_id,
                        attempt,
                        "Schema migration conflict, retrying: {}",
                        conflict
                    );
                }
            }
        }
    }

    async fn ensure_once(&self, sensor_type_id: Uuid, fields: &[MeasurementField]) -> Result<MigrationReport> {
        // Fast path without any lock: nothing to do is the common case
        {
            let mut conn = self.pool.acquire().await?;
            if plan(&mut conn, sensor_type_id, fields).await?.is_empty() {
                return Ok(MigrationReport::default());
            }
        }

        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;
        acquire_named_lock(&mut tx).await?;

        // Re-plan under the lock; another writer may have done the work
        let statements = plan(&mut tx, sensor_type_id, fields).await?;
        let report = apply(&mut tx, &statements).await?;

        tx.commit().await?;

        if !report.is_noop() {
            info!(
                sensor_type_id = %sensor_type_id,
                columns = ?report.added_columns,
                statements = report.statements_applied,
                "  ✓ Reading table migrated"
            );
        }

        Ok(report)
    }

    /// Re-apply the migration log
    ///
    /// Column additions run only for columns that are missing; every other
    /// logged statement is idempotent and runs in log order.
    pub async fn replay(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;
        acquire_named_lock(&mut tx).await?;

        let log = fetch_log(&mut tx).await?;
        let mut columns = table_columns(&mut *tx, READINGS_TABLE).await?;
        let mut restored = 0;

        for entry in &log {
            let is_column = entry.statement.starts_with("ALTER TABLE");
            if is_column && columns.iter().any(|c| c.name == entry.column_name) {
                continue;
            }

            sqlx::query(&entry.statement).execute(&mut *tx).await?;

            if is_column {
                warn!("  ✓ Restored missing reading column '{}'", entry.column_name);
                restored += 1;
                columns = table_columns(&mut *tx, READINGS_TABLE).await?;
            }
        }

        tx.commit().await?;

        info!(
            "Reading column log replayed ({} entries, {} columns restored)",
            log.len(),
            restored
        );
        Ok(restored)
    }

    /// Migration log in version order
    pub async fn applied_migrations(&self) -> Result<Vec<ColumnMigration>> {
        let mut conn = self.pool.acquire().await?;
        fetch_log(&mut conn).await
    }
}

/// Column definition for a field on the reading table
///
/// Columns are shared by every sensor type that declares the field, so value
/// rules live in the per-type trigger rather than on the column.
pub fn column_definition_for(field: &MeasurementField) -> ColumnDefinition {
    ColumnDefinition::new(field.name.clone(), field.data_type.sql_type())
}

fn index_name(field_name: &str) -> String {
    format!("idx_{}_{}", READINGS_TABLE, field_name)
}

fn trigger_name(sensor_type_id: Uuid) -> String {
    format!("trg_{}_rules_{}", READINGS_TABLE, sensor_type_id.simple())
}

/// Trigger enforcing the value rules of one sensor type
///
/// Covers required fields, numeric bounds, 0/1 booleans and well-formed JSON
/// for arrays and objects. `None` when the sensor type has no such field.
fn rules_trigger_sql(sensor_type_id: Uuid, fields: &[MeasurementField]) -> Option<String> {
    let mut conditions = Vec::new();

    for field in fields {
        let column = format!("NEW.{}", quote_ident(&field.name));
        if field.required {
            conditions.push(format!("{} IS NULL", column));
        }
        match field.data_type {
            DataType::Boolean => conditions.push(format!("({0} IS NOT NULL AND {0} NOT IN (0, 1))", column)),
            DataType::Array | DataType::Object => {
                conditions.push(format!("({0} IS NOT NULL AND json_valid({0}) = 0)", column))
            }
            DataType::Float | DataType::String => {}
        }
        if field.data_type.is_numeric() {
            if let Some(min) = field.min {
                conditions.push(format!("{} < {:?}", column, min));
            }
            if let Some(max) = field.max {
                conditions.push(format!("{} > {:?}", column, max));
            }
        }
    }

    if conditions.is_empty() {
        return None;
    }

    Some(format!(
        "CREATE TRIGGER IF NOT EXISTS {} BEFORE INSERT ON {} FOR EACH ROW \
         WHEN NEW.sensor_type_id = '{}' AND ({}) \
         BEGIN SELECT RAISE(ABORT, 'reading violates field rules of its sensor type'); END",
        quote_ident(&trigger_name(sensor_type_id)),
        quote_ident(READINGS_TABLE),
        sensor_type_id,
        conditions.join(" OR ")
    ))
}

/// Work needed to bring the reading table in line with `fields`
async fn plan(
    conn: &mut SqliteConnection,
    sensor_type_id: Uuid,
    fields: &[MeasurementField],
) -> Result<Vec<PlannedStatement>> {
    let columns = table_columns(&mut *conn, READINGS_TABLE).await?;
    let mut statements = Vec::new();

    for field in fields {
        match columns.iter().find(|c| c.name == field.name) {
            Some(existing) => check_compatible(field, existing)?,
            None => statements.push(PlannedStatement {
                subject: field.name.clone(),
                data_type: field.data_type.as_str().to_string(),
                sql: column_definition_for(field).add_column_sql(READINGS_TABLE),
                adds_column: true,
            }),
        }

        if field.data_type.is_numeric() {
            let index = index_name(&field.name);
            if !schema_object_exists(conn, "index", &index).await? {
                statements.push(PlannedStatement {
                    subject: field.name.clone(),
                    data_type: INDEX_LOG_TYPE.to_string(),
                    sql: format!(
                        "CREATE INDEX IF NOT EXISTS {} ON {}({})",
                        quote_ident(&index),
                        quote_ident(READINGS_TABLE),
                        quote_ident(&field.name)
                    ),
                    adds_column: false,
                });
            }
        }
    }

    let trigger = trigger_name(sensor_type_id);
    let desired = rules_trigger_sql(sensor_type_id, fields);
    let exists = schema_object_exists(conn, "trigger", &trigger).await?;
    let drop_sql = format!("DROP TRIGGER IF EXISTS {}", quote_ident(&trigger));

    match desired {
        Some(create_sql) => {
            let current = last_logged_statement(conn, &trigger).await?;
            if !exists || current.as_deref() != Some(create_sql.as_str()) {
                if exists {
                    statements.push(trigger_statement(&trigger, drop_sql));
                }
                statements.push(trigger_statement(&trigger, create_sql));
            }
        }
        None if exists => statements.push(trigger_statement(&trigger, drop_sql)),
        None => {}
    }

    if !statements.is_empty() {
        debug!(sensor_type_id = %sensor_type_id, pending = statements.len(), "Reading table migration planned");
    }

    Ok(statements)
}

fn trigger_statement(trigger: &str, sql: String) -> PlannedStatement {
    PlannedStatement {
        subject: trigger.to_string(),
        data_type: TRIGGER_LOG_TYPE.to_string(),
        sql,
        adds_column: false,
    }
}

fn check_compatible(field: &MeasurementField, existing: &ActualColumn) -> Result<()> {
    let expected = field.data_type.sql_type();
    if same_affinity(expected, &existing.type_name) {
        Ok(())
    } else {
        Err(Error::MigrationConflict(format!(
            "column '{}' exists as {} but field is declared {}",
            field.name, existing.type_name, field.data_type
        )))
    }
}

/// Apply planned statements and log each one
async fn apply(conn: &mut SqliteConnection, statements: &[PlannedStatement]) -> Result<MigrationReport> {
    let mut report = MigrationReport::default();
    let applied_at = time::to_storage(&time::now());

    for statement in statements {
        match sqlx::query(&statement.sql).execute(&mut *conn).await {
            Ok(_) => {}
            Err(sqlx::Error::Database(db_err)) if db_err.message().contains("duplicate column") => {
                return Err(Error::MigrationConflict(format!(
                    "column '{}' was added concurrently",
                    statement.subject
                )));
            }
            Err(e) => return Err(e.into()),
        }

        sqlx::query(
            r#"
            INSERT INTO reading_column_migrations (column_name, data_type, statement, applied_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&statement.subject)
        .bind(&statement.data_type)
        .bind(&statement.sql)
        .bind(&applied_at)
        .execute(&mut *conn)
        .await?;

        if statement.adds_column {
            report.added_columns.push(statement.subject.clone());
        }
        report.statements_applied += 1;
    }

    Ok(report)
}

/// Write the named lock row; holds SQLite's write lock until the transaction ends
async fn acquire_named_lock(conn: &mut SqliteConnection) -> Result<()> {
    let holder = format!("pid-{}", std::process::id());
    let now = time::to_storage(&time::now());

    let updated = sqlx::query("UPDATE migration_locks SET holder = ?, acquired_at = ? WHERE name = ?")
        .bind(&holder)
        .bind(&now)
        .bind(READINGS_TABLE)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    if updated == 0 {
        sqlx::query("INSERT OR IGNORE INTO migration_locks (name, holder, acquired_at) VALUES (?, ?, ?)")
            .bind(READINGS_TABLE)
            .bind(&holder)
            .bind(&now)
            .execute(&mut *conn)
            .await?;
    }

    Ok(())
}

async fn schema_object_exists(conn: &mut SqliteConnection, kind: &str, name: &str) -> Result<bool> {
    let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = ? AND name = ?)")
        .bind(kind)
        .bind(name)
        .fetch_one(&mut *conn)
        .await?;
    Ok(exists)
}

async fn last_logged_statement(conn: &mut SqliteConnection, subject: &str) -> Result<Option<String>> {
    let statement: Option<String> = sqlx::query_scalar(
        "SELECT statement FROM reading_column_migrations WHERE column_name = ? ORDER BY version DESC LIMIT 1",
    )
    .bind(subject)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(statement)
}

async fn fetch_log(conn: &mut SqliteConnection) -> Result<Vec<ColumnMigration>> {
    let rows = sqlx::query(
        "SELECT version, column_name, data_type, statement, applied_at FROM reading_column_migrations ORDER BY version",
    )
    .fetch_all(&mut *conn)
    .await?;

    rows.iter()
        .map(|row| {
            Ok(ColumnMigration {
                version: row.try_get("version")?,
                column_name: row.try_get("column_name")?,
                data_type: row.try_get("data_type")?,
                statement: row.try_get("statement")?,
                applied_at: row.try_get("applied_at")?,
            })
        })
        .collect()
}
