use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SessionPhase;

/// Broad error category used for caller-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionErrorCategory {
    /// Invalid input, unsupported state, or other configuration issue.
    Config,
    /// Token rejected by the remote service.
    Auth,
    /// Requested record does not exist on the remote service.
    NotFound,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the remote service.
    RateLimited,
    /// Local persistence failure.
    Storage,
    /// Serialization/deserialization failure.
    Serialization,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable session error payload surfaced to synchronizer callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct SessionError {
    /// High-level error category.
    pub category: SessionErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl SessionError {
    /// Construct a new session error.
    pub fn new(
        category: SessionErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(u64::try_from(retry_after.as_millis()).unwrap_or(u64::MAX));
        self
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: SessionPhase, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            SessionErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while session is in phase {current:?}"),
        )
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category,
            SessionErrorCategory::Network | SessionErrorCategory::RateLimited
        )
    }
}

/// Map HTTP status codes to session error categories.
pub fn classify_http_status(status: u16) -> SessionErrorCategory {
    match status {
        401 | 403 => SessionErrorCategory::Auth,
        404 => SessionErrorCategory::NotFound,
        408 | 429 => SessionErrorCategory::RateLimited,
        400..=499 => SessionErrorCategory::Config,
        500..=599 => SessionErrorCategory::Network,
        _ => SessionErrorCategory::Internal,
    }
}
