//! UUID utilities

use crate::{Error, Result};
use uuid::Uuid;

/// Generate a new UUIDv4
pub fn generate() -> Uuid {
    Uuid::new_v4()
}

/// Parse a UUID read back from storage
pub fn parse_stored(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| Error::Internal(format!("Invalid stored id '{}': {}", s, e)))
}

/// Parse an optional UUID read back from storage
pub fn parse_stored_opt(s: Option<String>) -> Result<Option<Uuid>> {
    s.as_deref().map(parse_stored).transpose()
}
