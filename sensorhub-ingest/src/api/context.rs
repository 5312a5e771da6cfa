//! Per-request caller context
//!
//! Authentication happens in front of this service; the gateway forwards the
//! tenant and role as headers. `X-Deadline-Ms` optionally overrides the
//! configured default deadline.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts, http::HeaderMap};
use sensorhub_common::deadline::Deadline;
use sensorhub_common::scope::{self, Caller, Role, Scope};

use crate::error::ApiError;
use crate::AppState;

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const ROLE_HEADER: &str = "x-role";
pub const DEADLINE_HEADER: &str = "x-deadline-ms";

/// Resolved scope, role and deadline of the current request
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub scope: Scope,
    pub role: Role,
    pub deadline: Deadline,
}

impl RequestContext {
    /// Viewers are read-only
    pub fn require_write(&self) -> Result<(), ApiError> {
        if self.role == Role::Viewer {
            return Err(ApiError::Forbidden(format!("role {} is read-only", self.role)));
        }
        Ok(())
    }
}

#[async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let headers = &parts.headers;

        let role = match header(headers, ROLE_HEADER)? {
            Some(raw) => raw.parse::<Role>()?,
            None => Role::Viewer,
        };
        let caller = Caller::new(header(headers, TENANT_HEADER)?, role);
        let scope = scope::resolve(&caller)?;

        let deadline_ms = match header(headers, DEADLINE_HEADER)? {
            Some(raw) => raw
                .trim()
                .parse::<u64>()
                .map_err(|_| ApiError::BadRequest(format!("{} must be milliseconds", DEADLINE_HEADER)))?,
            None => state.default_deadline_ms,
        };

        Ok(Self {
            scope,
            role,
            deadline: Deadline::from_millis(Some(deadline_ms)),
        })
    }
}

fn header(headers: &HeaderMap, name: &str) -> Result<Option<String>, ApiError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map(str::to_string)
                .map_err(|_| ApiError::BadRequest(format!("{} is not valid text", name)))
        })
        .transpose()
}
