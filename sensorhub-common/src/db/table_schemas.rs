//! Declared columns of the fixed tables
//!
//! The reading table only lists its base columns; measurement columns belong
//! to [`crate::migrator::SchemaMigrator`].

use crate::db::schema_sync::{sync_table, ColumnDefinition, TableSchema};
use crate::Result;
use sqlx::SqlitePool;
use tracing::info;

/// Name of the wide reading table
pub const READINGS_TABLE: &str = "sensor_readings";

/// Base columns of the reading table. Field names may not reuse these.
pub const READING_BASE_COLUMNS: &[&str] = &[
    "id",
    "tenant_id",
    "asset_sensor_id",
    "sensor_type_id",
    "mac_address",
    "location",
    "reading_time",
    "created_at",
];

pub struct SensorReadingsTableSchema;

impl TableSchema for SensorReadingsTableSchema {
    fn table_name() -> &'static str {
        READINGS_TABLE
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "TEXT").primary_key(),
            ColumnDefinition::new("tenant_id", "TEXT").not_null(),
            ColumnDefinition::new("asset_sensor_id", "TEXT").not_null(),
            ColumnDefinition::new("sensor_type_id", "TEXT").not_null(),
            ColumnDefinition::new("mac_address", "TEXT"),
            ColumnDefinition::new("location", "TEXT"),
            ColumnDefinition::new("reading_time", "TEXT").not_null(),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
        ]
    }
}

pub struct ThresholdsTableSchema;

impl TableSchema for ThresholdsTableSchema {
    fn table_name() -> &'static str {
        "thresholds"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "TEXT").primary_key(),
            ColumnDefinition::new("tenant_id", "TEXT").not_null(),
            ColumnDefinition::new("asset_sensor_id", "TEXT"),
            ColumnDefinition::new("sensor_type_id", "TEXT"),
            ColumnDefinition::new("field_name", "TEXT").not_null(),
            ColumnDefinition::new("min_value", "REAL"),
            ColumnDefinition::new("max_value", "REAL"),
            ColumnDefinition::new("severity", "TEXT").not_null(),
            // Custom breach message (older databases lack it)
            ColumnDefinition::new("alert_message", "TEXT"),
            ColumnDefinition::new("is_active", "INTEGER")
                .not_null()
                .default("1"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
            ColumnDefinition::new("updated_at", "TEXT").not_null(),
        ]
    }
}

pub struct AlertsTableSchema;

impl TableSchema for AlertsTableSchema {
    fn table_name() -> &'static str {
        "alerts"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "TEXT").primary_key(),
            ColumnDefinition::new("tenant_id", "TEXT").not_null(),
            ColumnDefinition::new("asset_sensor_id", "TEXT").not_null(),
            ColumnDefinition::new("threshold_id", "TEXT").not_null(),
            ColumnDefinition::new("field_name", "TEXT").not_null(),
            ColumnDefinition::new("severity", "TEXT").not_null(),
            ColumnDefinition::new("trigger_value", "REAL").not_null(),
            // Bound snapshot at breach time
            ColumnDefinition::new("threshold_min", "REAL"),
            ColumnDefinition::new("threshold_max", "REAL"),
            ColumnDefinition::new("message", "TEXT")
                .not_null()
                .default("''"),
            ColumnDefinition::new("resolved", "INTEGER")
                .not_null()
                .default("0"),
            ColumnDefinition::new("alert_time", "TEXT").not_null(),
            ColumnDefinition::new("resolved_time", "TEXT"),
        ]
    }
}

/// Bring older database files up to the declared columns
pub async fn sync_all_table_schemas(pool: &SqlitePool) -> Result<()> {
    let added = sync_table::<SensorReadingsTableSchema>(pool).await?
        + sync_table::<ThresholdsTableSchema>(pool).await?
        + sync_table::<AlertsTableSchema>(pool).await?;

    if added > 0 {
        info!("Schema sync added {} column(s) to fixed tables", added);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema_sync::table_columns;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    #[test]
    fn test_base_columns_match_schema() {
        let declared: Vec<String> = SensorReadingsTableSchema::expected_columns()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(declared, READING_BASE_COLUMNS);
    }

    #[tokio::test]
    async fn test_sync_thresholds_table_adds_alert_message() {
        let pool = setup_test_db().await;

        // Old schema without alert_message
        sqlx::query(
            r#"
            CREATE TABLE thresholds (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                asset_sensor_id TEXT,
                sensor_type_id TEXT,
                field_name TEXT NOT NULL,
                min_value REAL,
                max_value REAL,
                severity TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let added = sync_table::<ThresholdsTableSchema>(&pool).await.unwrap();
        assert_eq!(added, 1);

        let columns = table_columns(&pool, "thresholds").await.unwrap();
        assert!(columns.iter().any(|c| c.name == "alert_message"));
    }

    #[tokio::test]
    async fn test_sync_missing_table_is_noop() {
        let pool = setup_test_db().await;
        sync_all_table_schemas(&pool).await.unwrap();
    }
}
