//! Schema Registry integration tests

use sensorhub_common::db::init::init_database;
use sensorhub_common::db::models::{
    FieldDefinition, MeasurementTypeDefinition, MeasurementTypeInput, SensorSchemaDefinition,
    SensorTypeInput,
};
use sensorhub_common::deadline::Deadline;
use sensorhub_common::migrator::SchemaMigrator;
use sensorhub_common::registry::SchemaRegistry;
use sensorhub_common::values::DataType;
use sensorhub_common::{Error, Scope};
use sqlx::SqlitePool;
use tempfile::TempDir;
use uuid::Uuid;

async fn setup() -> (TempDir, SqlitePool) {
    let dir = tempfile::tempdir().unwrap();
    let pool = init_database(&dir.path().join("sensorhub.db")).await.unwrap();
    (dir, pool)
}

fn sensor_type(name: &str) -> SensorTypeInput {
    SensorTypeInput {
        tenant_id: None,
        name: name.into(),
        manufacturer: Some("Acme".into()),
        model: Some("AQ-100".into()),
        description: None,
        is_active: true,
    }
}

fn measurement_type(name: &str) -> MeasurementTypeInput {
    MeasurementTypeInput {
        name: name.into(),
        description: None,
        properties_schema: None,
        ui_config: None,
        is_active: true,
    }
}

fn field(name: &str, data_type: DataType, required: bool, min: Option<f64>, max: Option<f64>) -> FieldDefinition {
    FieldDefinition {
        name: name.into(),
        label: name.replace('_', " "),
        data_type,
        required,
        unit: None,
        min,
        max,
    }
}

#[tokio::test]
async fn test_field_roundtrip() {
    let (_dir, pool) = setup().await;
    let registry = SchemaRegistry::new(pool);
    let scope = Scope::tenant("tenant-a");

    let st = registry.create_sensor_type(&scope, &sensor_type("Air")).await.unwrap();
    let mt = registry
        .create_measurement_type(&scope, st.id, &measurement_type("Climate"))
        .await
        .unwrap();
    let created = registry
        .create_field(&scope, mt.id, &field("temperature", DataType::Float, true, Some(-10.0), Some(50.0)))
        .await
        .unwrap();

    let fetched = registry.get_field(&scope, created.id).await.unwrap();
    assert_eq!(fetched.data_type, DataType::Float);
    assert!(fetched.required);
    assert_eq!(fetched.min, Some(-10.0));
    assert_eq!(fetched.max, Some(50.0));
    assert_eq!(fetched.tenant_id, "tenant-a");
}

#[tokio::test]
async fn test_active_fields_skip_inactive_measurement_types() {
    let (_dir, pool) = setup().await;
    let registry = SchemaRegistry::new(pool);
    let scope = Scope::tenant("tenant-a");

    let st = registry.create_sensor_type(&scope, &sensor_type("Air")).await.unwrap();
    let climate = registry
        .create_measurement_type(&scope, st.id, &measurement_type("Climate"))
        .await
        .unwrap();
    let mut retired_input = measurement_type("Legacy");
    retired_input.is_active = false;
    let retired = registry.create_measurement_type(&scope, st.id, &retired_input).await.unwrap();

    registry
        .create_field(&scope, climate.id, &field("temperature", DataType::Float, true, None, None))
        .await
        .unwrap();
    registry
        .create_field(&scope, climate.id, &field("humidity", DataType::Float, false, None, None))
        .await
        .unwrap();
    registry
        .create_field(&scope, retired.id, &field("voc_raw", DataType::Float, false, None, None))
        .await
        .unwrap();

    let names: Vec<String> = registry
        .active_fields_for(&scope, st.id)
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["temperature", "humidity"]);
}

#[tokio::test]
async fn test_empty_field_list_is_not_an_error() {
    let (_dir, pool) = setup().await;
    let registry = SchemaRegistry::new(pool);
    let scope = Scope::tenant("tenant-a");

    let st = registry.create_sensor_type(&scope, &sensor_type("Bare")).await.unwrap();
    assert!(registry.active_fields_for(&scope, st.id).await.unwrap().is_empty());

    let err = registry.active_fields_for(&scope, Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, Error::SchemaNotFound(_)));
}

#[tokio::test]
async fn test_schema_is_tenant_scoped() {
    let (_dir, pool) = setup().await;
    let registry = SchemaRegistry::new(pool);
    let tenant_a = Scope::tenant("tenant-a");
    let tenant_b = Scope::tenant("tenant-b");

    let st = registry.create_sensor_type(&tenant_a, &sensor_type("Air")).await.unwrap();

    assert!(matches!(
        registry.get_sensor_type(&tenant_b, st.id).await,
        Err(Error::SchemaNotFound(_))
    ));
    assert!(registry.list_sensor_types(&tenant_b).await.unwrap().is_empty());

    // Same name is fine in another tenant
    registry.create_sensor_type(&tenant_b, &sensor_type("Air")).await.unwrap();

    // Unrestricted sees both
    assert_eq!(registry.list_sensor_types(&Scope::unrestricted()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_register_schema_is_all_or_nothing() {
    let (_dir, pool) = setup().await;
    let registry = SchemaRegistry::new(pool);
    let scope = Scope::tenant("tenant-a");

    let bad = SensorSchemaDefinition {
        sensor_type: sensor_type("Air"),
        measurement_types: vec![MeasurementTypeDefinition {
            measurement_type: measurement_type("Climate"),
            fields: vec![
                field("temperature", DataType::Float, true, Some(-10.0), Some(50.0)),
                field("status", DataType::String, false, Some(0.0), None),
            ],
        }],
    };
    let err = registry.register_sensor_schema(&scope, &bad).await.unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert!(registry.list_sensor_types(&scope).await.unwrap().is_empty());

    let good = SensorSchemaDefinition {
        sensor_type: sensor_type("Air"),
        measurement_types: vec![MeasurementTypeDefinition {
            measurement_type: measurement_type("Climate"),
            fields: vec![
                field("temperature", DataType::Float, true, Some(-10.0), Some(50.0)),
                field("status", DataType::String, false, None, None),
            ],
        }],
    };
    let registered = registry.register_sensor_schema(&scope, &good).await.unwrap();
    assert_eq!(registered.fields.len(), 2);
    assert_eq!(registered.fields[1].position, 1);
}

#[tokio::test]
async fn test_update_measurement_type_bumps_version() {
    let (_dir, pool) = setup().await;
    let registry = SchemaRegistry::new(pool);
    let scope = Scope::tenant("tenant-a");

    let st = registry.create_sensor_type(&scope, &sensor_type("Air")).await.unwrap();
    let mt = registry
        .create_measurement_type(&scope, st.id, &measurement_type("Climate"))
        .await
        .unwrap();
    assert_eq!(mt.version, 1);

    let mut changed = measurement_type("Climate v2");
    changed.ui_config = Some(serde_json::json!({"chart": "line"}));
    let updated = registry.update_measurement_type(&scope, mt.id, &changed).await.unwrap();
    assert_eq!(updated.version, 2);
    assert_eq!(updated.name, "Climate v2");
    assert_eq!(updated.ui_config["chart"], "line");
}

#[tokio::test]
async fn test_field_names_unique_per_sensor_type() {
    let (_dir, pool) = setup().await;
    let registry = SchemaRegistry::new(pool);
    let scope = Scope::tenant("tenant-a");

    let st = registry.create_sensor_type(&scope, &sensor_type("Air")).await.unwrap();
    let climate = registry
        .create_measurement_type(&scope, st.id, &measurement_type("Climate"))
        .await
        .unwrap();
    let extra = registry
        .create_measurement_type(&scope, st.id, &measurement_type("Extra"))
        .await
        .unwrap();

    registry
        .create_field(&scope, climate.id, &field("temperature", DataType::Float, false, None, None))
        .await
        .unwrap();
    let err = registry
        .create_field(&scope, extra.id, &field("temperature", DataType::Float, false, None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_delete_sensor_type_cascades() {
    let (_dir, pool) = setup().await;
    let registry = SchemaRegistry::new(pool.clone());
    let scope = Scope::tenant("tenant-a");

    let st = registry.create_sensor_type(&scope, &sensor_type("Air")).await.unwrap();
    let mt = registry
        .create_measurement_type(&scope, st.id, &measurement_type("Climate"))
        .await
        .unwrap();
    let f = registry
        .create_field(&scope, mt.id, &field("temperature", DataType::Float, false, None, None))
        .await
        .unwrap();

    registry.delete_sensor_type(&scope, st.id).await.unwrap();

    assert!(matches!(
        registry.get_measurement_type(&scope, mt.id).await,
        Err(Error::SchemaNotFound(_))
    ));
    assert!(matches!(
        registry.get_field(&scope, f.id).await,
        Err(Error::NotFoundOrAccessDenied(_))
    ));
}

#[tokio::test]
async fn test_field_name_has_one_data_type_everywhere() {
    let (_dir, pool) = setup().await;
    let registry = SchemaRegistry::new(pool);
    let tenant_a = Scope::tenant("tenant-a");
    let tenant_b = Scope::tenant("tenant-b");

    let tank = registry.create_sensor_type(&tenant_a, &sensor_type("Tank")).await.unwrap();
    let tank_mt = registry
        .create_measurement_type(&tenant_a, tank.id, &measurement_type("Fill"))
        .await
        .unwrap();
    registry
        .create_field(&tenant_a, tank_mt.id, &field("level", DataType::Float, false, None, None))
        .await
        .unwrap();

    // Reading storage is shared, so another tenant cannot redeclare the type
    let silo = registry.create_sensor_type(&tenant_b, &sensor_type("Silo")).await.unwrap();
    let silo_mt = registry
        .create_measurement_type(&tenant_b, silo.id, &measurement_type("Fill"))
        .await
        .unwrap();
    let err = registry
        .create_field(&tenant_b, silo_mt.id, &field("level", DataType::String, false, None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let silo_level = registry
        .create_field(&tenant_b, silo_mt.id, &field("level", DataType::Float, false, None, None))
        .await
        .unwrap();
    let err = registry
        .update_field(&tenant_b, silo_level.id, &field("level", DataType::String, false, None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let tagged = |data_type| SensorSchemaDefinition {
        sensor_type: sensor_type("Tagger"),
        measurement_types: vec![MeasurementTypeDefinition {
            measurement_type: measurement_type("Tags"),
            fields: vec![field("tags", data_type, false, None, None)],
        }],
    };
    registry.register_sensor_schema(&tenant_a, &tagged(DataType::Array)).await.unwrap();
    let err = registry
        .register_sensor_schema(&tenant_b, &tagged(DataType::String))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(registry.list_sensor_types(&tenant_b).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_update_field_keeps_name_and_stored_type() {
    let (_dir, pool) = setup().await;
    let registry = SchemaRegistry::new(pool.clone());
    let scope = Scope::tenant("tenant-a");

    let st = registry.create_sensor_type(&scope, &sensor_type("Tank")).await.unwrap();
    let mt = registry
        .create_measurement_type(&scope, st.id, &measurement_type("Fill"))
        .await
        .unwrap();
    let level = registry
        .create_field(&scope, mt.id, &field("level", DataType::Float, false, Some(0.0), Some(10.0)))
        .await
        .unwrap();

    let err = registry
        .update_field(&scope, level.id, &field("tank_level", DataType::Float, false, None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));

    let mut relabeled = field("level", DataType::Float, true, Some(0.0), Some(20.0));
    relabeled.label = "Tank level".into();
    let updated = registry.update_field(&scope, level.id, &relabeled).await.unwrap();
    assert_eq!(updated.label, "Tank level");
    assert!(updated.required);
    assert_eq!(updated.max, Some(20.0));

    // No column yet, so the type is still free to change
    let updated = registry
        .update_field(&scope, level.id, &field("level", DataType::String, false, None, None))
        .await
        .unwrap();
    assert_eq!(updated.data_type, DataType::String);

    let fields = registry.active_fields_for(&scope, st.id).await.unwrap();
    SchemaMigrator::new(pool)
        .ensure_columns(st.id, &fields, Deadline::none())
        .await
        .unwrap();

    let err = registry
        .update_field(&scope, level.id, &field("level", DataType::Float, false, None, None))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    assert_eq!(registry.get_field(&scope, level.id).await.unwrap().data_type, DataType::String);
}
