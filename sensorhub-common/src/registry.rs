//! Schema Registry
//!
//! Owns the SensorType → MeasurementType → MeasurementField hierarchy, the
//! source of truth for what a reading may contain. Child rows inherit the
//! tenant of their sensor type; deletes cascade down the hierarchy.

use crate::db::models::{
    FieldDefinition, MeasurementField, MeasurementType, MeasurementTypeInput, SensorSchemaDefinition,
    SensorType, SensorTypeInput,
};
use crate::db::schema_sync::{same_affinity, table_columns};
use crate::db::table_schemas::{READINGS_TABLE, READING_BASE_COLUMNS};
use crate::scope::{Scope, ScopedQuery};
use crate::uuid_utils::{generate, parse_stored};
use crate::values::DataType;
use crate::{time, Error, Result};
use serde::Serialize;
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection, SqlitePool};
use tracing::{debug, info};
use uuid::Uuid;

const SENSOR_TYPE_COLUMNS: &str =
    "id, tenant_id, name, manufacturer, model, description, is_active, created_at, updated_at";
const MEASUREMENT_TYPE_COLUMNS: &str = "id, tenant_id, sensor_type_id, name, description, \
     properties_schema, ui_config, version, is_active, created_at, updated_at";
const FIELD_COLUMNS: &str = "f.id, f.tenant_id, f.measurement_type_id, f.name, f.label, f.data_type, \
     f.required, f.unit, f.min_value, f.max_value, f.position, f.created_at";

/// Longest accepted field name; SQLite itself has no limit but keep it sane
const MAX_FIELD_NAME_LEN: usize = 63;

/// Result of registering a complete sensor schema
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredSchema {
    pub sensor_type: SensorType,
    pub measurement_types: Vec<MeasurementType>,
    pub fields: Vec<MeasurementField>,
}

/// Schema Registry backed by the shared SQLite pool
#[derive(Clone)]
pub struct SchemaRegistry {
    pool: SqlitePool,
}

impl SchemaRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Sensor types
    // ------------------------------------------------------------------

    pub async fn create_sensor_type(&self, scope: &Scope, input: &SensorTypeInput) -> Result<SensorType> {
        let mut tx = self.pool.begin().await?;
        let sensor_type = insert_sensor_type(&mut tx, scope, input).await?;
        tx.commit().await?;
        Ok(sensor_type)
    }

    pub async fn get_sensor_type(&self, scope: &Scope, id: Uuid) -> Result<SensorType> {
        let mut conn = self.pool.acquire().await?;
        fetch_sensor_type(&mut conn, scope, id).await
    }

    pub async fn list_sensor_types(&self, scope: &Scope) -> Result<Vec<SensorType>> {
        let mut q = ScopedQuery::new(
            scope,
            &format!("SELECT {} FROM sensor_types", SENSOR_TYPE_COLUMNS),
            "tenant_id",
        );
        q.push(" ORDER BY name, id");
        let rows = q.build().fetch_all(&self.pool).await?;
        rows.iter().map(sensor_type_from_row).collect()
    }

    pub async fn update_sensor_type(
        &self,
        scope: &Scope,
        id: Uuid,
        input: &SensorTypeInput,
    ) -> Result<SensorType> {
        require_name(&input.name, "sensor type")?;
        let mut conn = self.pool.acquire().await?;
        let existing = fetch_sensor_type(&mut conn, scope, id).await?;

        sqlx::query(
            r#"
            UPDATE sensor_types
            SET name = ?, manufacturer = ?, model = ?, description = ?, is_active = ?, updated_at = ?
            WHERE id = ? AND tenant_id = ?
            "#,
        )
        .bind(input.name.trim())
        .bind(&input.manufacturer)
        .bind(&input.model)
        .bind(&input.description)
        .bind(input.is_active)
        .bind(time::to_storage(&time::now()))
        .bind(id.to_string())
        .bind(&existing.tenant_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| unique_as_invalid(e, format!("sensor type '{}' already exists", input.name)))?;

        fetch_sensor_type(&mut conn, scope, id).await
    }

    pub async fn delete_sensor_type(&self, scope: &Scope, id: Uuid) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let existing = fetch_sensor_type(&mut conn, scope, id).await?;

        sqlx::query("DELETE FROM sensor_types WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(&existing.tenant_id)
            .execute(&mut *conn)
            .await?;

        info!(sensor_type_id = %id, "Deleted sensor type and its measurement schema");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Measurement types
    // ------------------------------------------------------------------

    pub async fn create_measurement_type(
        &self,
        scope: &Scope,
        sensor_type_id: Uuid,
        input: &MeasurementTypeInput,
    ) -> Result<MeasurementType> {
        let mut tx = self.pool.begin().await?;
        let sensor_type = fetch_sensor_type(&mut tx, scope, sensor_type_id).await?;
        let measurement_type = insert_measurement_type(&mut tx, &sensor_type, input).await?;
        tx.commit().await?;
        Ok(measurement_type)
    }

    pub async fn get_measurement_type(&self, scope: &Scope, id: Uuid) -> Result<MeasurementType> {
        let mut conn = self.pool.acquire().await?;
        fetch_measurement_type(&mut conn, scope, id).await
    }

    pub async fn list_measurement_types(
        &self,
        scope: &Scope,
        sensor_type_id: Uuid,
    ) -> Result<Vec<MeasurementType>> {
        let mut conn = self.pool.acquire().await?;
        fetch_sensor_type(&mut conn, scope, sensor_type_id).await?;

        let mut q = ScopedQuery::new(
            scope,
            &format!("SELECT {} FROM measurement_types", MEASUREMENT_TYPE_COLUMNS),
            "tenant_id",
        );
        q.and_eq("sensor_type_id", sensor_type_id.to_string());
        q.push(" ORDER BY created_at, name");
        let rows = q.build().fetch_all(&mut *conn).await?;
        rows.iter().map(measurement_type_from_row).collect()
    }

    /// Replace a measurement type's attributes and bump its version
    pub async fn update_measurement_type(
        &self,
        scope: &Scope,
        id: Uuid,
        input: &MeasurementTypeInput,
    ) -> Result<MeasurementType> {
        require_name(&input.name, "measurement type")?;
        let mut conn = self.pool.acquire().await?;
        let existing = fetch_measurement_type(&mut conn, scope, id).await?;

        sqlx::query(
            r#"
            UPDATE measurement_types
            SET name = ?, description = ?, properties_schema = ?, ui_config = ?,
                is_active = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND tenant_id = ?
            "#,
        )
        .bind(input.name.trim())
        .bind(&input.description)
        .bind(json_or_empty(&input.properties_schema)?)
        .bind(json_or_empty(&input.ui_config)?)
        .bind(input.is_active)
        .bind(time::to_storage(&time::now()))
        .bind(id.to_string())
        .bind(&existing.tenant_id)
        .execute(&mut *conn)
        .await
        .map_err(|e| unique_as_invalid(e, format!("measurement type '{}' already exists", input.name)))?;

        fetch_measurement_type(&mut conn, scope, id).await
    }

    pub async fn delete_measurement_type(&self, scope: &Scope, id: Uuid) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let existing = fetch_measurement_type(&mut conn, scope, id).await?;

        sqlx::query("DELETE FROM measurement_types WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(&existing.tenant_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Measurement fields
    // ------------------------------------------------------------------

    pub async fn create_field(
        &self,
        scope: &Scope,
        measurement_type_id: Uuid,
        definition: &FieldDefinition,
    ) -> Result<MeasurementField> {
        let mut tx = self.pool.begin().await?;
        let measurement_type = fetch_measurement_type(&mut tx, scope, measurement_type_id).await?;
        let field = insert_field(&mut tx, &measurement_type, definition).await?;
        tx.commit().await?;
        Ok(field)
    }

    pub async fn get_field(&self, scope: &Scope, id: Uuid) -> Result<MeasurementField> {
        let mut conn = self.pool.acquire().await?;
        fetch_field(&mut conn, scope, id).await
    }

    pub async fn list_fields(&self, scope: &Scope, measurement_type_id: Uuid) -> Result<Vec<MeasurementField>> {
        let mut conn = self.pool.acquire().await?;
        fetch_measurement_type(&mut conn, scope, measurement_type_id).await?;

        let mut q = ScopedQuery::new(
            scope,
            &format!("SELECT {} FROM measurement_fields f", FIELD_COLUMNS),
            "f.tenant_id",
        );
        q.and_eq("f.measurement_type_id", measurement_type_id.to_string());
        q.push(" ORDER BY f.position, f.name");
        let rows = q.build().fetch_all(&mut *conn).await?;
        rows.iter().map(field_from_row).collect()
    }

    /// Replace a field definition. The storage name is immutable.
    pub async fn update_field(
        &self,
        scope: &Scope,
        id: Uuid,
        definition: &FieldDefinition,
    ) -> Result<MeasurementField> {
        validate_field_definition(definition)?;
        let mut conn = self.pool.acquire().await?;
        let existing = fetch_field(&mut conn, scope, id).await?;

        if existing.name != definition.name {
            return Err(Error::InvalidInput(format!(
                "field name '{}' is storage-stable and cannot be renamed to '{}'",
                existing.name, definition.name
            )));
        }
        if existing.data_type != definition.data_type
            && table_columns(&mut *conn, READINGS_TABLE).await?.iter().any(|c| c.name == existing.name)
        {
            return Err(Error::InvalidInput(format!(
                "field '{}' already has a {} reading column and cannot become {}",
                existing.name, existing.data_type, definition.data_type
            )));
        }
        check_shared_data_type(&mut conn, definition, Some(id)).await?;
        check_storage_column(&mut conn, definition).await?;

        sqlx::query(
            r#"
            UPDATE measurement_fields
            SET label = ?, data_type = ?, required = ?, unit = ?, min_value = ?, max_value = ?
            WHERE id = ? AND tenant_id = ?
            "#,
        )
        .bind(definition.label.trim())
        .bind(definition.data_type.as_str())
        .bind(definition.required)
        .bind(&definition.unit)
        .bind(definition.min)
        .bind(definition.max)
        .bind(id.to_string())
        .bind(&existing.tenant_id)
        .execute(&mut *conn)
        .await?;

        fetch_field(&mut conn, scope, id).await
    }

    pub async fn delete_field(&self, scope: &Scope, id: Uuid) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        let existing = fetch_field(&mut conn, scope, id).await?;

        // Column stays in the reading table; old readings keep their values
        sqlx::query("DELETE FROM measurement_fields WHERE id = ? AND tenant_id = ?")
            .bind(id.to_string())
            .bind(&existing.tenant_id)
            .execute(&mut *conn)
            .await?;

        Ok(())
    }

    /// Fields of every active measurement type of a sensor type
    ///
    /// Ordered by measurement type creation, then field position. An empty
    /// list is a valid answer; an unknown sensor type is [`Error::SchemaNotFound`].
    pub async fn active_fields_for(&self, scope: &Scope, sensor_type_id: Uuid) -> Result<Vec<MeasurementField>> {
        let mut conn = self.pool.acquire().await?;
        fetch_sensor_type(&mut conn, scope, sensor_type_id).await?;

        let mut q = ScopedQuery::new(
            scope,
            &format!(
                "SELECT {} FROM measurement_fields f \
                 JOIN measurement_types m ON m.id = f.measurement_type_id",
                FIELD_COLUMNS
            ),
            "f.tenant_id",
        );
        q.and_eq("m.sensor_type_id", sensor_type_id.to_string());
        q.and_raw("m.is_active = 1");
        q.push(" ORDER BY m.created_at, m.name, f.position, f.name");
        let rows = q.build().fetch_all(&mut *conn).await?;

        let fields = rows.iter().map(field_from_row).collect::<Result<Vec<_>>>()?;
        debug!(sensor_type_id = %sensor_type_id, count = fields.len(), "Resolved active fields");
        Ok(fields)
    }

    /// Create a sensor type with all of its measurement types and fields
    ///
    /// All-or-nothing: one invalid field rolls back the whole schema.
    pub async fn register_sensor_schema(
        &self,
        scope: &Scope,
        definition: &SensorSchemaDefinition,
    ) -> Result<RegisteredSchema> {
        let mut tx = self.pool.begin().await?;

        let sensor_type = insert_sensor_type(&mut tx, scope, &definition.sensor_type).await?;
        let mut measurement_types = Vec::with_capacity(definition.measurement_types.len());
        let mut fields = Vec::new();

        for mt_def in &definition.measurement_types {
            let measurement_type = insert_measurement_type(&mut tx, &sensor_type, &mt_def.measurement_type).await?;
            for field_def in &mt_def.fields {
                fields.push(insert_field(&mut tx, &measurement_type, field_def).await?);
            }
            measurement_types.push(measurement_type);
        }

        tx.commit().await?;

        info!(
            sensor_type_id = %sensor_type.id,
            tenant_id = %sensor_type.tenant_id,
            measurement_types = measurement_types.len(),
            fields = fields.len(),
            "Registered sensor schema '{}'",
            sensor_type.name
        );

        Ok(RegisteredSchema {
            sensor_type,
            measurement_types,
            fields,
        })
    }
}

/// Definition-time checks for a measurement field
pub fn validate_field_definition(definition: &FieldDefinition) -> Result<()> {
    validate_field_name(&definition.name)?;

    if definition.label.trim().is_empty() {
        return Err(Error::InvalidInput(format!(
            "field '{}' requires a label",
            definition.name
        )));
    }

    let has_bounds = definition.min.is_some() || definition.max.is_some();
    if has_bounds && !definition.data_type.is_numeric() {
        return Err(Error::InvalidInput(format!(
            "field '{}': numeric bounds are not allowed for data type {}",
            definition.name, definition.data_type
        )));
    }

    for bound in [definition.min, definition.max].into_iter().flatten() {
        if !bound.is_finite() {
            return Err(Error::InvalidInput(format!(
                "field '{}': bounds must be finite numbers",
                definition.name
            )));
        }
    }

    if let (Some(min), Some(max)) = (definition.min, definition.max) {
        if min > max {
            return Err(Error::InvalidInput(format!(
                "field '{}': min ({}) must not exceed max ({})",
                definition.name, min, max
            )));
        }
    }

    Ok(())
}

/// Field names double as reading-table column names
pub fn validate_field_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = matches!(chars.next(), Some(c) if c.is_ascii_lowercase() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if !valid_start || !valid_rest || name.len() > MAX_FIELD_NAME_LEN {
        return Err(Error::InvalidInput(format!(
            "field name '{}' must match [a-z_][a-z0-9_]* and be at most {} characters",
            name, MAX_FIELD_NAME_LEN
        )));
    }

    if READING_BASE_COLUMNS.contains(&name) {
        return Err(Error::InvalidInput(format!(
            "field name '{}' is reserved by the reading table",
            name
        )));
    }

    Ok(())
}

fn require_name(name: &str, what: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput(format!("{} name must not be empty", what)));
    }
    Ok(())
}

fn json_or_empty(value: &Option<Value>) -> Result<String> {
    match value {
        Some(v) => Ok(serde_json::to_string(v)?),
        None => Ok("{}".to_string()),
    }
}

fn unique_as_invalid(err: sqlx::Error, message: String) -> Error {
    let err = Error::from(err);
    if err.is_unique_violation() {
        Error::InvalidInput(message)
    } else {
        err
    }
}

async fn insert_sensor_type(
    conn: &mut SqliteConnection,
    scope: &Scope,
    input: &SensorTypeInput,
) -> Result<SensorType> {
    require_name(&input.name, "sensor type")?;
    let tenant_id = scope.tenant_for_write(input.tenant_id.as_deref())?;
    let now = time::now();
    let sensor_type = SensorType {
        id: generate(),
        tenant_id,
        name: input.name.trim().to_string(),
        manufacturer: input.manufacturer.clone(),
        model: input.model.clone(),
        description: input.description.clone(),
        is_active: input.is_active,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO sensor_types (id, tenant_id, name, manufacturer, model, description, is_active, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(sensor_type.id.to_string())
    .bind(&sensor_type.tenant_id)
    .bind(&sensor_type.name)
    .bind(&sensor_type.manufacturer)
    .bind(&sensor_type.model)
    .bind(&sensor_type.description)
    .bind(sensor_type.is_active)
    .bind(time::to_storage(&now))
    .bind(time::to_storage(&now))
    .execute(&mut *conn)
    .await
    .map_err(|e| unique_as_invalid(e, format!("sensor type '{}' already exists", input.name)))?;

    Ok(sensor_type)
}

async fn insert_measurement_type(
    conn: &mut SqliteConnection,
    sensor_type: &SensorType,
    input: &MeasurementTypeInput,
) -> Result<MeasurementType> {
    require_name(&input.name, "measurement type")?;
    let now = time::now();
    let measurement_type = MeasurementType {
        id: generate(),
        tenant_id: sensor_type.tenant_id.clone(),
        sensor_type_id: sensor_type.id,
        name: input.name.trim().to_string(),
        description: input.description.clone(),
        properties_schema: input.properties_schema.clone().unwrap_or_else(|| Value::Object(Default::default())),
        ui_config: input.ui_config.clone().unwrap_or_else(|| Value::Object(Default::default())),
        version: 1,
        is_active: input.is_active,
        created_at: now,
        updated_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO measurement_types (
            id, tenant_id, sensor_type_id, name, description, properties_schema, ui_config,
            version, is_active, created_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(measurement_type.id.to_string())
    .bind(&measurement_type.tenant_id)
    .bind(sensor_type.id.to_string())
    .bind(&measurement_type.name)
    .bind(&measurement_type.description)
    .bind(serde_json::to_string(&measurement_type.properties_schema)?)
    .bind(serde_json::to_string(&measurement_type.ui_config)?)
    .bind(measurement_type.version)
    .bind(measurement_type.is_active)
    .bind(time::to_storage(&now))
    .bind(time::to_storage(&now))
    .execute(&mut *conn)
    .await
    .map_err(|e| unique_as_invalid(e, format!("measurement type '{}' already exists", input.name)))?;

    Ok(measurement_type)
}

async fn insert_field(
    conn: &mut SqliteConnection,
    measurement_type: &MeasurementType,
    definition: &FieldDefinition,
) -> Result<MeasurementField> {
    validate_field_definition(definition)?;

    // A field name may appear only once per sensor type
    let clash: Option<String> = sqlx::query_scalar(
        r#"
        SELECT f.id FROM measurement_fields f
        JOIN measurement_types m ON m.id = f.measurement_type_id
        WHERE m.sensor_type_id = ? AND f.name = ?
        "#,
    )
    .bind(measurement_type.sensor_type_id.to_string())
    .bind(&definition.name)
    .fetch_optional(&mut *conn)
    .await?;

    if clash.is_some() {
        return Err(Error::InvalidInput(format!(
            "field '{}' is already declared for this sensor type",
            definition.name
        )));
    }

    check_shared_data_type(conn, definition, None).await?;
    check_storage_column(conn, definition).await?;

    let position: i64 = sqlx::query_scalar(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM measurement_fields WHERE measurement_type_id = ?",
    )
    .bind(measurement_type.id.to_string())
    .fetch_one(&mut *conn)
    .await?;

    let now = time::now();
    let field = MeasurementField {
        id: generate(),
        tenant_id: measurement_type.tenant_id.clone(),
        measurement_type_id: measurement_type.id,
        name: definition.name.clone(),
        label: definition.label.trim().to_string(),
        data_type: definition.data_type,
        required: definition.required,
        unit: definition.unit.clone(),
        min: definition.min,
        max: definition.max,
        position,
        created_at: now,
    };

    sqlx::query(
        r#"
        INSERT INTO measurement_fields (
            id, tenant_id, measurement_type_id, name, label, data_type, required,
            unit, min_value, max_value, position, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(field.id.to_string())
    .bind(&field.tenant_id)
    .bind(field.measurement_type_id.to_string())
    .bind(&field.name)
    .bind(&field.label)
    .bind(field.data_type.as_str())
    .bind(field.required)
    .bind(&field.unit)
    .bind(field.min)
    .bind(field.max)
    .bind(field.position)
    .bind(time::to_storage(&now))
    .execute(&mut *conn)
    .await?;

    Ok(field)
}

/// Reject a data type that differs from other declarations of the same name
///
/// Every sensor type in every tenant stores a field name in the same reading
/// column, so the name carries one data type across the whole database.
async fn check_shared_data_type(
    conn: &mut SqliteConnection,
    definition: &FieldDefinition,
    except: Option<Uuid>,
) -> Result<()> {
    let declared: Option<String> = sqlx::query_scalar(
        "SELECT data_type FROM measurement_fields WHERE name = ? AND data_type <> ? AND id <> ? LIMIT 1",
    )
    .bind(&definition.name)
    .bind(definition.data_type.as_str())
    .bind(except.map(|id| id.to_string()).unwrap_or_default())
    .fetch_optional(&mut *conn)
    .await?;

    match declared {
        Some(other) => Err(Error::InvalidInput(format!(
            "field '{}' is already declared as {} by another sensor type and cannot be {}",
            definition.name, other, definition.data_type
        ))),
        None => Ok(()),
    }
}

/// Reject a definition whose column already exists with an incompatible type
async fn check_storage_column(conn: &mut SqliteConnection, definition: &FieldDefinition) -> Result<()> {
    let columns = table_columns(&mut *conn, READINGS_TABLE).await?;
    if let Some(existing) = columns.iter().find(|c| c.name == definition.name) {
        let expected = definition.data_type.sql_type();
        if !same_affinity(expected, &existing.type_name) {
            return Err(Error::InvalidInput(format!(
                "field '{}' already exists in reading storage as {} and cannot hold {}",
                definition.name, existing.type_name, definition.data_type
            )));
        }
    }
    Ok(())
}

async fn fetch_sensor_type(conn: &mut SqliteConnection, scope: &Scope, id: Uuid) -> Result<SensorType> {
    let mut q = ScopedQuery::new(
        scope,
        &format!("SELECT {} FROM sensor_types", SENSOR_TYPE_COLUMNS),
        "tenant_id",
    );
    q.and_eq("id", id.to_string());
    let row = q.build().fetch_optional(&mut *conn).await?;

    match row {
        Some(row) => sensor_type_from_row(&row),
        None => Err(Error::SchemaNotFound(format!("sensor type {}", id))),
    }
}

async fn fetch_measurement_type(conn: &mut SqliteConnection, scope: &Scope, id: Uuid) -> Result<MeasurementType> {
    let mut q = ScopedQuery::new(
        scope,
        &format!("SELECT {} FROM measurement_types", MEASUREMENT_TYPE_COLUMNS),
        "tenant_id",
    );
    q.and_eq("id", id.to_string());
    let row = q.build().fetch_optional(&mut *conn).await?;

    match row {
        Some(row) => measurement_type_from_row(&row),
        None => Err(Error::SchemaNotFound(format!("measurement type {}", id))),
    }
}

async fn fetch_field(conn: &mut SqliteConnection, scope: &Scope, id: Uuid) -> Result<MeasurementField> {
    let mut q = ScopedQuery::new(
        scope,
        &format!("SELECT {} FROM measurement_fields f", FIELD_COLUMNS),
        "f.tenant_id",
    );
    q.and_eq("f.id", id.to_string());
    let row = q.build().fetch_optional(&mut *conn).await?;

    match row {
        Some(row) => field_from_row(&row),
        None => Err(Error::NotFoundOrAccessDenied(format!("measurement field {}", id))),
    }
}

fn sensor_type_from_row(row: &SqliteRow) -> Result<SensorType> {
    Ok(SensorType {
        id: parse_stored(&row.try_get::<String, _>("id")?)?,
        tenant_id: row.try_get("tenant_id")?,
        name: row.try_get("name")?,
        manufacturer: row.try_get("manufacturer")?,
        model: row.try_get("model")?,
        description: row.try_get("description")?,
        is_active: row.try_get("is_active")?,
        created_at: time::from_storage(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::from_storage(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn measurement_type_from_row(row: &SqliteRow) -> Result<MeasurementType> {
    Ok(MeasurementType {
        id: parse_stored(&row.try_get::<String, _>("id")?)?,
        tenant_id: row.try_get("tenant_id")?,
        sensor_type_id: parse_stored(&row.try_get::<String, _>("sensor_type_id")?)?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        properties_schema: serde_json::from_str(&row.try_get::<String, _>("properties_schema")?)?,
        ui_config: serde_json::from_str(&row.try_get::<String, _>("ui_config")?)?,
        version: row.try_get("version")?,
        is_active: row.try_get("is_active")?,
        created_at: time::from_storage(&row.try_get::<String, _>("created_at")?)?,
        updated_at: time::from_storage(&row.try_get::<String, _>("updated_at")?)?,
    })
}

fn field_from_row(row: &SqliteRow) -> Result<MeasurementField> {
    let data_type: DataType = row.try_get::<String, _>("data_type")?.parse()?;
    Ok(MeasurementField {
        id: parse_stored(&row.try_get::<String, _>("id")?)?,
        tenant_id: row.try_get("tenant_id")?,
        measurement_type_id: parse_stored(&row.try_get::<String, _>("measurement_type_id")?)?,
        name: row.try_get("name")?,
        label: row.try_get("label")?,
        data_type,
        required: row.try_get("required")?,
        unit: row.try_get("unit")?,
        min: row.try_get("min_value")?,
        max: row.try_get("max_value")?,
        position: row.try_get("position")?,
        created_at: time::from_storage(&row.try_get::<String, _>("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn float_field(name: &str, min: Option<f64>, max: Option<f64>) -> FieldDefinition {
        FieldDefinition {
            name: name.to_string(),
            label: name.to_string(),
            data_type: DataType::Float,
            required: false,
            unit: None,
            min,
            max,
        }
    }

    #[test]
    fn test_field_name_rules() {
        assert!(validate_field_name("pm2_5").is_ok());
        assert!(validate_field_name("_raw").is_ok());
        assert!(validate_field_name("Temperature").is_err());
        assert!(validate_field_name("2fast").is_err());
        assert!(validate_field_name("drop table").is_err());
        assert!(validate_field_name("").is_err());
        assert!(validate_field_name(&"a".repeat(64)).is_err());
        assert!(validate_field_name("reading_time").is_err());
        assert!(validate_field_name("tenant_id").is_err());
    }

    #[test]
    fn test_bounds_must_be_ordered() {
        assert!(validate_field_definition(&float_field("t", Some(-10.0), Some(50.0))).is_ok());
        assert!(validate_field_definition(&float_field("t", Some(5.0), Some(5.0))).is_ok());
        assert!(matches!(
            validate_field_definition(&float_field("t", Some(10.0), Some(5.0))),
            Err(Error::InvalidInput(_))
        ));
        assert!(validate_field_definition(&float_field("t", Some(f64::NAN), None)).is_err());
    }

    #[test]
    fn test_bounds_rejected_for_non_numeric_types() {
        let mut def = float_field("status", None, Some(3.0));
        def.data_type = DataType::String;
        let err = validate_field_definition(&def).unwrap_err();
        assert!(err.to_string().contains("numeric bounds are not allowed"));
    }

    #[test]
    fn test_label_required() {
        let mut def = float_field("t", None, None);
        def.label = "  ".into();
        assert!(validate_field_definition(&def).is_err());
    }
}
