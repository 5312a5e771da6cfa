//! # Sensorhub Common Library
//!
//! Core of the sensorhub telemetry services:
//! - Tenant scoping shared by every store (`scope`)
//! - Schema Registry for sensor types, measurement types and fields
//! - Validation Engine coercing payloads into typed field values
//! - Storage Schema Migrator for the wide reading table
//! - Threshold Store and Alert Lifecycle Manager
//! - Database bootstrap, configuration loading and utilities

pub mod alerts;
pub mod config;
pub mod db;
pub mod deadline;
pub mod error;
pub mod ingest;
pub mod migrator;
pub mod readings;
pub mod registry;
pub mod scope;
pub mod thresholds;
pub mod time;
pub mod uuid_utils;
pub mod validation;
pub mod values;

pub use error::{Error, Result};
pub use ingest::Ingestor;
pub use scope::{Caller, Role, Scope};
