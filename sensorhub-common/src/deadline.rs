//! Caller-supplied deadlines
//!
//! Work run under a [`Deadline`] is dropped when the deadline elapses. Any
//! sqlx transaction owned by the dropped future rolls back, so a cancelled
//! migration or batch insert leaves no partial state behind.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Optional point in time by which an operation must complete
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// No deadline
    pub fn none() -> Self {
        Self { at: None }
    }

    /// Deadline `timeout` from now
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    /// Deadline from an optional millisecond budget (`None` or 0 = no deadline)
    pub fn from_millis(millis: Option<u64>) -> Self {
        match millis {
            Some(ms) if ms > 0 => Self::after(Duration::from_millis(ms)),
            _ => Self::none(),
        }
    }

    /// True once the deadline has passed
    pub fn is_expired(&self) -> bool {
        self.at.map(|at| Instant::now() >= at).unwrap_or(false)
    }

    /// Run `fut`, failing with [`Error::DeadlineExceeded`] if it does not finish in time
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.at {
            None => fut.await,
            Some(at) => match tokio::time::timeout_at(at, fut).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(operation, "Deadline exceeded, operation abandoned");
                    Err(Error::DeadlineExceeded(operation.to_string()))
                }
            },
        }
    }
}
