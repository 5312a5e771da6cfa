//! Reading ingestion pipeline
//!
//! reading → tenant stamp → active fields → validation → column migration →
//! insert → applicable thresholds → alert transitions
//!
//! The insert and the alert transitions share one transaction: a reading is
//! stored only together with the alert state it produced.

use crate::alerts::{AlertManager, AlertTransition};
use crate::db::models::{MeasurementField, ReadingInput, SensorReading};
use crate::deadline::Deadline;
use crate::migrator::{MigrationReport, SchemaMigrator};
use crate::readings::{insert_reading, ReadingStore};
use crate::registry::SchemaRegistry;
use crate::scope::Scope;
use crate::thresholds::{active_thresholds_in, ThresholdStore};
use crate::uuid_utils::generate;
use crate::validation::{ValidationReport, Validator};
use crate::{time, Error, Result};
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

/// Result of ingesting one reading
#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub reading_id: Uuid,
    pub tenant_id: String,
    pub validation: ValidationReport,
    pub migration: MigrationReport,
    pub alerts: Vec<AlertTransition>,
}

/// Result of ingesting a batch; `readings` follows input order
#[derive(Debug, Clone, Serialize)]
pub struct BatchOutcome {
    pub readings: Vec<IngestOutcome>,
}

/// A reading that passed validation, waiting to be stored
struct Prepared {
    reading: SensorReading,
    fields: Vec<MeasurementField>,
    validation: ValidationReport,
    scope: Scope,
}

/// Every core component over one pool
#[derive(Clone)]
pub struct Ingestor {
    pool: SqlitePool,
    registry: SchemaRegistry,
    validator: Validator,
    migrator: SchemaMigrator,
    readings: ReadingStore,
    thresholds: ThresholdStore,
    alerts: AlertManager,
}

impl Ingestor {
    pub fn new(pool: SqlitePool) -> Self {
        let registry = SchemaRegistry::new(pool.clone());
        Self {
            validator: Validator::new(registry.clone()),
            registry,
            migrator: SchemaMigrator::new(pool.clone()),
            readings: ReadingStore::new(pool.clone()),
            thresholds: ThresholdStore::new(pool.clone()),
            alerts: AlertManager::new(pool.clone()),
            pool,
        }
    }

    pub fn with_conflict_retries(mut self, retries: u32) -> Self {
        self.migrator = self.migrator.with_conflict_retries(retries);
        self
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn readings(&self) -> &ReadingStore {
        &self.readings
    }

    pub fn thresholds(&self) -> &ThresholdStore {
        &self.thresholds
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn migrator(&self) -> &SchemaMigrator {
        &self.migrator
    }

    /// Validate, store and evaluate one reading
    pub async fn ingest(&self, scope: &Scope, input: ReadingInput, deadline: Deadline) -> Result<IngestOutcome> {
        deadline
            .run("ingest reading", async {
                let prepared = self.prepare(scope, input).await?;

                let migration = self
                    .migrator
                    .ensure_columns(prepared.reading.sensor_type_id, &prepared.fields, deadline)
                    .await?;

                let alerts = self
                    .alerts
                    .serialized(prepared.reading.asset_sensor_id, self.store(&prepared))
                    .await?;
                Ok(outcome(prepared, migration, alerts))
            })
            .await
    }

    /// Validate every reading, then store all of them in one transaction
    ///
    /// One invalid reading rejects the whole batch; violations are prefixed
    /// with the reading's index. Alerts are evaluated in reading-time order.
    pub async fn ingest_batch(
        &self,
        scope: &Scope,
        inputs: Vec<ReadingInput>,
        deadline: Deadline,
    ) -> Result<BatchOutcome> {
        if inputs.is_empty() {
            return Err(Error::InvalidInput("batch contains no readings".to_string()));
        }

        deadline
            .run("ingest batch", async {
                let mut prepared = Vec::with_capacity(inputs.len());
                let mut violations = Vec::new();

                for (index, input) in inputs.into_iter().enumerate() {
                    match self.prepare(scope, input).await {
                        Ok(p) => prepared.push(p),
                        Err(Error::ValidationFailed { violations: found }) => {
                            violations.extend(found.into_iter().map(|v| format!("readings[{}]: {}", index, v)));
                        }
                        Err(other) => return Err(other),
                    }
                }
                if !violations.is_empty() {
                    return Err(Error::ValidationFailed { violations });
                }

                let mut migrations: HashMap<Uuid, MigrationReport> = HashMap::new();
                for p in &prepared {
                    let sensor_type_id = p.reading.sensor_type_id;
                    if !migrations.contains_key(&sensor_type_id) {
                        let report = self.migrator.ensure_columns(sensor_type_id, &p.fields, deadline).await?;
                        migrations.insert(sensor_type_id, report);
                    }
                }

                // No per-asset locks: the first insert takes the database write
                // lock, which orders this batch against every other evaluation
                let mut tx = self.pool.begin().await?;
                for p in &prepared {
                    insert_reading(&mut tx, &p.reading).await?;
                }

                let mut order: Vec<usize> = (0..prepared.len()).collect();
                order.sort_by_key(|&i| prepared[i].reading.reading_time);
                let mut alerts: Vec<Vec<AlertTransition>> = vec![Vec::new(); prepared.len()];
                for i in order {
                    alerts[i] = self.evaluate(&mut tx, &prepared[i]).await?;
                }
                tx.commit().await?;

                info!(count = prepared.len(), "Ingested reading batch");

                let readings = prepared
                    .into_iter()
                    .zip(alerts)
                    .map(|(p, alerts)| {
                        let migration = migrations.get(&p.reading.sensor_type_id).cloned().unwrap_or_default();
                        outcome(p, migration, alerts)
                    })
                    .collect();
                Ok(BatchOutcome { readings })
            })
            .await
    }

    /// Stamp the tenant, validate and coerce; nothing is written
    async fn prepare(&self, scope: &Scope, input: ReadingInput) -> Result<Prepared> {
        let tenant_id = scope.tenant_for_write(input.tenant_id.as_deref())?;
        let reading_scope = scope.with_tenant(&tenant_id)?;

        let (fields, validation) = self
            .validator
            .validate(&reading_scope, input.sensor_type_id, &input.fields)
            .await?;
        if !validation.accepted {
            debug!(
                sensor_type_id = %input.sensor_type_id,
                asset_sensor_id = %input.asset_sensor_id,
                violations = validation.violations.len(),
                "Reading rejected"
            );
            return Err(Error::ValidationFailed {
                violations: validation.violations,
            });
        }

        let reading = SensorReading {
            id: generate(),
            tenant_id,
            asset_sensor_id: input.asset_sensor_id,
            sensor_type_id: input.sensor_type_id,
            mac_address: input.mac_address,
            location: input.location,
            reading_time: input.reading_time.unwrap_or_else(time::now),
            values: validation.values.clone(),
        };

        Ok(Prepared {
            reading,
            fields,
            validation,
            scope: reading_scope,
        })
    }

    /// Insert one reading and apply its alert transitions
    ///
    /// The insert runs first so the transaction holds the write lock before
    /// it reads any threshold or alert.
    async fn store(&self, prepared: &Prepared) -> Result<Vec<AlertTransition>> {
        let mut tx = self.pool.begin().await?;
        insert_reading(&mut tx, &prepared.reading).await?;
        let alerts = self.evaluate(&mut tx, prepared).await?;
        tx.commit().await?;
        Ok(alerts)
    }

    async fn evaluate(&self, conn: &mut SqliteConnection, prepared: &Prepared) -> Result<Vec<AlertTransition>> {
        let reading = &prepared.reading;
        let thresholds =
            active_thresholds_in(&mut *conn, &prepared.scope, reading.sensor_type_id, reading.asset_sensor_id)
                .await?;
        if thresholds.is_empty() {
            return Ok(Vec::new());
        }
        self.alerts.evaluate(conn, reading, &thresholds).await
    }
}

fn outcome(prepared: Prepared, migration: MigrationReport, alerts: Vec<AlertTransition>) -> IngestOutcome {
    IngestOutcome {
        reading_id: prepared.reading.id,
        tenant_id: prepared.reading.tenant_id,
        validation: prepared.validation,
        migration,
        alerts,
    }
}
