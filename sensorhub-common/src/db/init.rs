//! Opening the sensorhub database
//!
//! Every start creates missing fixed tables, adds columns older files lack
//! ([`super::table_schemas`]), applies versioned steps ([`super::migrations`])
//! and finally replays the reading-column log ([`crate::migrator`]).

use crate::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::info;

/// Connection settings for the SQLite pool
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub max_connections: u32,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            max_connections: 10,
            busy_timeout_ms: 5000,
        }
    }
}

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    init_database_with(db_path, &DatabaseOptions::default()).await
}

/// Initialize database with explicit connection settings
pub async fn init_database_with(db_path: &Path, options: &DatabaseOptions) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Pragmas go on the connect options so every pooled connection gets them
    let connect_options = SqliteConnectOptions::new()
        .filename(db_path)
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_millis(options.busy_timeout_ms));

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(connect_options)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    create_tables(&pool).await?;

    crate::db::table_schemas::sync_all_table_schemas(&pool).await?;
    crate::db::migrations::run_migrations(&pool).await?;
    crate::migrator::SchemaMigrator::new(pool.clone()).replay().await?;

    info!("Database busy timeout set to {} ms", options.busy_timeout_ms);

    Ok(pool)
}

/// CREATE TABLE IF NOT EXISTS for every fixed table
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    create_schema_version_table(pool).await?;
    create_sensor_types_table(pool).await?;
    create_measurement_types_table(pool).await?;
    create_measurement_fields_table(pool).await?;
    create_sensor_readings_table(pool).await?;
    create_reading_column_migrations_table(pool).await?;
    create_migration_locks_table(pool).await?;
    create_thresholds_table(pool).await?;
    create_alerts_table(pool).await?;
    Ok(())
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_sensor_types_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_types (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            name TEXT NOT NULL,
            manufacturer TEXT,
            model TEXT,
            description TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (tenant_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sensor_types_tenant ON sensor_types(tenant_id)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_measurement_types_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurement_types (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            sensor_type_id TEXT NOT NULL REFERENCES sensor_types(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            description TEXT,
            properties_schema TEXT NOT NULL DEFAULT '{}',
            ui_config TEXT NOT NULL DEFAULT '{}',
            version INTEGER NOT NULL DEFAULT 1,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (sensor_type_id, name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_measurement_types_sensor_type ON measurement_types(sensor_type_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_measurement_fields_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS measurement_fields (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            measurement_type_id TEXT NOT NULL REFERENCES measurement_types(id) ON DELETE CASCADE,
            name TEXT NOT NULL,
            label TEXT NOT NULL,
            data_type TEXT NOT NULL CHECK (data_type IN ('float', 'string', 'boolean', 'array', 'object')),
            required INTEGER NOT NULL DEFAULT 0,
            unit TEXT,
            min_value REAL,
            max_value REAL,
            position INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE (measurement_type_id, name),
            CHECK (min_value IS NULL OR max_value IS NULL OR min_value <= max_value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_measurement_fields_type ON measurement_fields(measurement_type_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Wide reading table; measurement columns are appended at runtime
async fn create_sensor_readings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            asset_sensor_id TEXT NOT NULL,
            sensor_type_id TEXT NOT NULL,
            mac_address TEXT,
            location TEXT,
            reading_time TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_sensor_readings_asset_time \
         ON sensor_readings(tenant_id, asset_sensor_id, reading_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Replayable log of every DDL statement applied to the reading table
async fn create_reading_column_migrations_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS reading_column_migrations (
            version INTEGER PRIMARY KEY AUTOINCREMENT,
            column_name TEXT NOT NULL,
            data_type TEXT NOT NULL,
            statement TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

/// Named locks; a row write holds SQLite's write lock until commit
async fn create_migration_locks_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS migration_locks (
            name TEXT PRIMARY KEY,
            holder TEXT,
            acquired_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_thresholds_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS thresholds (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            asset_sensor_id TEXT,
            sensor_type_id TEXT,
            field_name TEXT NOT NULL,
            min_value REAL,
            max_value REAL,
            severity TEXT NOT NULL CHECK (severity IN ('warning', 'critical')),
            alert_message TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            CHECK (asset_sensor_id IS NOT NULL OR sensor_type_id IS NOT NULL),
            CHECK (min_value IS NOT NULL OR max_value IS NOT NULL),
            CHECK (min_value IS NULL OR max_value IS NULL OR min_value < max_value)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One active threshold per (scope, field, severity)
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_thresholds_asset_sensor
        ON thresholds(tenant_id, asset_sensor_id, field_name, severity)
        WHERE is_active = 1 AND asset_sensor_id IS NOT NULL
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_thresholds_sensor_type
        ON thresholds(tenant_id, sensor_type_id, field_name, severity)
        WHERE is_active = 1 AND asset_sensor_id IS NULL
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_alerts_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS alerts (
            id TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            asset_sensor_id TEXT NOT NULL,
            threshold_id TEXT NOT NULL REFERENCES thresholds(id) ON DELETE CASCADE,
            field_name TEXT NOT NULL,
            severity TEXT NOT NULL,
            trigger_value REAL NOT NULL,
            threshold_min REAL,
            threshold_max REAL,
            message TEXT NOT NULL DEFAULT '',
            resolved INTEGER NOT NULL DEFAULT 0,
            alert_time TEXT NOT NULL,
            resolved_time TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one unresolved alert per (asset_sensor, threshold)
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS uq_alerts_active
        ON alerts(asset_sensor_id, threshold_id)
        WHERE resolved = 0
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_alerts_tenant ON alerts(tenant_id, resolved, alert_time)",
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_tables_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let pool = init_database(&dir.path().join("sensorhub.db")).await.unwrap();

        create_tables(&pool).await.unwrap();

        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN \
             ('sensor_types', 'measurement_types', 'measurement_fields', 'sensor_readings', \
              'reading_column_migrations', 'migration_locks', 'thresholds', 'alerts')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 8);
    }
}
