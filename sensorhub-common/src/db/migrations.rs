//! Versioned changes to the fixed tables
//!
//! Each step runs in its own transaction together with its `schema_version`
//! row, and every statement must tolerate a database that already has the
//! change. Append new steps; never edit a released one.
//!
//! Measurement columns on the reading table are logged and replayed by
//! [`crate::migrator`] instead.

use crate::Result;
use sqlx::SqlitePool;
use tracing::{info, warn};

struct Migration {
    version: i64,
    description: &'static str,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "seed reading-table migration lock",
        statements: &["INSERT OR IGNORE INTO migration_locks (name, holder, acquired_at) \
                       VALUES ('sensor_readings', NULL, NULL)"],
    },
    Migration {
        version: 2,
        description: "index alert history by asset sensor",
        statements: &["CREATE INDEX IF NOT EXISTS idx_alerts_asset_sensor \
                       ON alerts(asset_sensor_id, alert_time)"],
    },
];

fn latest_version() -> i64 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}

/// Highest applied version, 0 for a database that predates versioning
pub async fn get_schema_version(pool: &SqlitePool) -> Result<i64> {
    let tracked: Option<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
    )
    .fetch_optional(pool)
    .await?;

    if tracked.is_none() {
        return Ok(0);
    }

    let version: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    Ok(version.unwrap_or(0))
}

/// Apply every step newer than the recorded version
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    let current = get_schema_version(pool).await?;
    let latest = latest_version();

    if current > latest {
        warn!(
            "Database schema v{} is newer than this build (v{}); skipping migrations",
            current, latest
        );
        return Ok(());
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let mut tx = pool.begin().await?;
        for statement in migration.statements {
            sqlx::query(statement).execute(&mut *tx).await?;
        }
        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
            .bind(migration.version)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!("Applied schema v{}: {}", migration.version, migration.description);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::create_tables;
    use crate::db::table_schemas::READINGS_TABLE;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn fresh_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_tables(&pool).await.unwrap();
        pool
    }

    #[test]
    fn versions_are_strictly_increasing() {
        assert!(MIGRATIONS.windows(2).all(|w| w[0].version < w[1].version));
        assert_eq!(MIGRATIONS[0].version, 1);
    }

    #[tokio::test]
    async fn fresh_database_reaches_latest() {
        let pool = fresh_pool().await;
        assert_eq!(get_schema_version(&pool).await.unwrap(), 0);

        run_migrations(&pool).await.unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), latest_version());

        let lock_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM migration_locks WHERE name = ?")
            .bind(READINGS_TABLE)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(lock_rows, 1);
    }

    #[tokio::test]
    async fn rerun_changes_nothing() {
        let pool = fresh_pool().await;
        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, MIGRATIONS.len() as i64);
    }

    #[tokio::test]
    async fn missing_version_table_reads_as_zero() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        assert_eq!(get_schema_version(&pool).await.unwrap(), 0);
    }
}
