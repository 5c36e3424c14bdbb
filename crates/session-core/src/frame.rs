use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Message type tag expected by the embedding frame.
pub const AUTH_CHANGED_MESSAGE_TYPE: &str = "miniapp_auth_changed";

/// Structured payload posted to the embedding frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FrameMessage {
    #[serde(rename = "type")]
    pub kind: String,
    pub is_authenticated: bool,
    /// Epoch milliseconds, strictly increasing per notifier.
    pub timestamp: u64,
}

impl FrameMessage {
    pub fn auth_changed(is_authenticated: bool, timestamp: u64) -> Self {
        Self {
            kind: AUTH_CHANGED_MESSAGE_TYPE.to_owned(),
            is_authenticated,
            timestamp,
        }
    }
}

/// Errors returned while validating a target origin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OriginError {
    #[error("origin is empty")]
    Empty,
    #[error("origin '{0}' is not a valid URL: {1}")]
    Malformed(String, String),
    #[error("origin '{0}' must use http or https")]
    UnsupportedScheme(String),
    #[error("origin '{0}' must not carry a path, query or fragment")]
    NotAnOrigin(String),
}

/// Destination origin for frame messages.
///
/// `Any` (`"*"`) is the default and delivers to whatever document is loaded in
/// the parent frame. It is insecure: production embeddings must configure the
/// exact parent origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TargetOrigin {
    #[default]
    Any,
    Exact(String),
}

impl TargetOrigin {
    /// Validate a caller-supplied origin string.
    pub fn parse(raw: &str) -> Result<Self, OriginError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(OriginError::Empty);
        }
        if raw == "*" {
            return Ok(Self::Any);
        }

        let url =
            Url::parse(raw).map_err(|err| OriginError::Malformed(raw.to_owned(), err.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(OriginError::UnsupportedScheme(raw.to_owned()));
        }
        if url.host_str().is_none() {
            return Err(OriginError::Malformed(raw.to_owned(), "missing host".to_owned()));
        }
        if url.path() != "/" || url.query().is_some() || url.fragment().is_some() {
            return Err(OriginError::NotAnOrigin(raw.to_owned()));
        }

        Ok(Self::Exact(url.origin().ascii_serialization()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Any => "*",
            Self::Exact(origin) => origin,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl fmt::Display for TargetOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
