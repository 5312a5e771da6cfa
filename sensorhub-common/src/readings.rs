//! Reading persistence on the wide `sensor_readings` table
//!
//! Base columns are fixed; each declared field is its own column, bound by
//! its [`FieldValue`] variant. Columns must exist before insert, see
//! [`crate::migrator::SchemaMigrator::ensure_columns`].

use crate::db::models::SensorReading;
use crate::db::schema_sync::quote_ident;
use crate::db::table_schemas::READINGS_TABLE;
use crate::scope::{Scope, ScopedQuery};
use crate::uuid_utils::parse_stored;
use crate::values::{coerce, DataType, FieldValue};
use crate::{time, Error, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;
use uuid::Uuid;

/// Reading store backed by the shared SQLite pool
#[derive(Clone)]
pub struct ReadingStore {
    pool: SqlitePool,
}

impl ReadingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, reading: &SensorReading) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_reading(&mut conn, reading).await
    }

    /// Insert every reading in one transaction; all rows or none
    pub async fn insert_batch(&self, readings: &[SensorReading]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for reading in readings {
            insert_reading(&mut tx, reading).await?;
        }
        tx.commit().await?;

        debug!(count = readings.len(), "Inserted reading batch");
        Ok(())
    }

    pub async fn get(&self, scope: &Scope, id: Uuid) -> Result<SensorReading> {
        let mut conn = self.pool.acquire().await?;

        let mut q = ScopedQuery::new(scope, &format!("SELECT * FROM {}", READINGS_TABLE), "tenant_id");
        q.and_eq("id", id.to_string());
        let row = q
            .build()
            .fetch_optional(&mut *conn)
            .await?
            .ok_or_else(|| Error::NotFoundOrAccessDenied(format!("reading {}", id)))?;

        let mut cache = HashMap::new();
        reading_from_row(&mut conn, &row, &mut cache).await
    }

    /// Most recent readings of one asset sensor, newest first
    pub async fn list_for_asset_sensor(
        &self,
        scope: &Scope,
        asset_sensor_id: Uuid,
        limit: u32,
    ) -> Result<Vec<SensorReading>> {
        let mut conn = self.pool.acquire().await?;

        let mut q = ScopedQuery::new(scope, &format!("SELECT * FROM {}", READINGS_TABLE), "tenant_id");
        q.and_eq("asset_sensor_id", asset_sensor_id.to_string());
        q.push(" ORDER BY reading_time DESC, created_at DESC LIMIT ");
        q.push_bind(i64::from(limit));
        let rows = q.build().fetch_all(&mut *conn).await?;

        let mut cache = HashMap::new();
        let mut readings = Vec::with_capacity(rows.len());
        for row in &rows {
            readings.push(reading_from_row(&mut conn, row, &mut cache).await?);
        }
        Ok(readings)
    }
}

pub(crate) async fn insert_reading(conn: &mut SqliteConnection, reading: &SensorReading) -> Result<()> {
    let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
        "INSERT INTO {} (id, tenant_id, asset_sensor_id, sensor_type_id, mac_address, location, reading_time, created_at",
        quote_ident(READINGS_TABLE)
    ));
    for name in reading.values.keys() {
        qb.push(", ");
        qb.push(quote_ident(name));
    }

    qb.push(") VALUES (");
    {
        let mut values = qb.separated(", ");
        values.push_bind(reading.id.to_string());
        values.push_bind(reading.tenant_id.clone());
        values.push_bind(reading.asset_sensor_id.to_string());
        values.push_bind(reading.sensor_type_id.to_string());
        values.push_bind(reading.mac_address.clone());
        values.push_bind(reading.location.clone());
        values.push_bind(time::to_storage(&reading.reading_time));
        values.push_bind(time::to_storage(&time::now()));

        for value in reading.values.values() {
            match value {
                FieldValue::Float(v) => values.push_bind(*v),
                FieldValue::Text(s) => values.push_bind(s.clone()),
                FieldValue::Bool(b) => values.push_bind(*b),
                FieldValue::Array(_) | FieldValue::Object(_) => values.push_bind(value.to_json().to_string()),
            };
        }
    }
    qb.push(")");

    qb.build().execute(&mut *conn).await?;
    Ok(())
}

/// Declared data type of every field ever registered for a sensor type
async fn field_types(conn: &mut SqliteConnection, sensor_type_id: &str) -> Result<HashMap<String, DataType>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT f.name, f.data_type FROM measurement_fields f
        JOIN measurement_types m ON m.id = f.measurement_type_id
        WHERE m.sensor_type_id = ?
        "#,
    )
    .bind(sensor_type_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut types = HashMap::with_capacity(rows.len());
    for (name, data_type) in rows {
        types.insert(name, data_type.parse::<DataType>()?);
    }
    Ok(types)
}

async fn reading_from_row(
    conn: &mut SqliteConnection,
    row: &SqliteRow,
    cache: &mut HashMap<String, HashMap<String, DataType>>,
) -> Result<SensorReading> {
    let sensor_type_id: String = row.try_get("sensor_type_id")?;
    if !cache.contains_key(&sensor_type_id) {
        let types = field_types(conn, &sensor_type_id).await?;
        cache.insert(sensor_type_id.clone(), types);
    }

    let mut values = BTreeMap::new();
    if let Some(types) = cache.get(&sensor_type_id) {
        for column in row.columns() {
            let name = column.name();
            let Some(data_type) = types.get(name) else {
                continue;
            };
            if let Some(value) = decode_value(row, name, *data_type)? {
                values.insert(name.to_string(), value);
            }
        }
    }

    Ok(SensorReading {
        id: parse_stored(&row.try_get::<String, _>("id")?)?,
        tenant_id: row.try_get("tenant_id")?,
        asset_sensor_id: parse_stored(&row.try_get::<String, _>("asset_sensor_id")?)?,
        sensor_type_id: parse_stored(&sensor_type_id)?,
        mac_address: row.try_get("mac_address")?,
        location: row.try_get("location")?,
        reading_time: time::from_storage(&row.try_get::<String, _>("reading_time")?)?,
        values,
    })
}

fn decode_value(row: &SqliteRow, column: &str, data_type: DataType) -> Result<Option<FieldValue>> {
    let value = match data_type {
        DataType::Float => row.try_get::<Option<f64>, _>(column)?.map(FieldValue::Float),
        DataType::String => row.try_get::<Option<String>, _>(column)?.map(FieldValue::Text),
        DataType::Boolean => row.try_get::<Option<bool>, _>(column)?.map(FieldValue::Bool),
        DataType::Array | DataType::Object => match row.try_get::<Option<String>, _>(column)? {
            None => None,
            Some(raw) => {
                let json: serde_json::Value = serde_json::from_str(&raw)?;
                Some(coerce(data_type, &json).ok_or_else(|| {
                    Error::Internal(format!("Stored value of '{}' is not {}", column, data_type))
                })?)
            }
        },
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init::create_tables;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn setup_test_db() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_tables(&pool).await.unwrap();
        pool
    }

    fn reading(tenant: &str, asset_sensor_id: Uuid) -> SensorReading {
        SensorReading {
            id: Uuid::new_v4(),
            tenant_id: tenant.into(),
            asset_sensor_id,
            sensor_type_id: Uuid::new_v4(),
            mac_address: Some("00:11:22:33:44:55".into()),
            location: None,
            reading_time: time::now(),
            values: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_base_reading_roundtrip_and_scope() {
        let pool = setup_test_db().await;
        let store = ReadingStore::new(pool);
        let stored = reading("t1", Uuid::new_v4());
        store.insert(&stored).await.unwrap();

        let fetched = store.get(&Scope::tenant("t1"), stored.id).await.unwrap();
        assert_eq!(fetched.mac_address, stored.mac_address);
        assert_eq!(time::to_storage(&fetched.reading_time), time::to_storage(&stored.reading_time));

        let err = store.get(&Scope::tenant("t2"), stored.id).await.unwrap_err();
        assert!(matches!(err, Error::NotFoundOrAccessDenied(_)));
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let pool = setup_test_db().await;
        let store = ReadingStore::new(pool.clone());
        let asset_sensor_id = Uuid::new_v4();

        let first = reading("t1", asset_sensor_id);
        let duplicate = first.clone();
        let err = store.insert_batch(&[first, duplicate]).await;
        assert!(err.is_err());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sensor_readings")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let pool = setup_test_db().await;
        let store = ReadingStore::new(pool);
        let asset_sensor_id = Uuid::new_v4();

        let mut older = reading("t1", asset_sensor_id);
        older.reading_time = time::from_storage("2026-01-01T00:00:00.000Z").unwrap();
        let mut newer = reading("t1", asset_sensor_id);
        newer.reading_time = time::from_storage("2026-01-02T00:00:00.000Z").unwrap();
        store.insert_batch(&[older.clone(), newer.clone()]).await.unwrap();

        let listed = store
            .list_for_asset_sensor(&Scope::unrestricted(), asset_sensor_id, 10)
            .await
            .unwrap();
        assert_eq!(listed.iter().map(|r| r.id).collect::<Vec<_>>(), vec![newer.id, older.id]);

        let limited = store.list_for_asset_sensor(&Scope::tenant("t1"), asset_sensor_id, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
