//! Unified error handling for the run-tracker library.
//!
//! Rejected samples are not errors: they are encoded in
//! [`EvaluationResult`](crate::EvaluationResult) flags. This type covers the
//! storage, network, configuration and lifecycle failures that can occur
//! around a run.

use thiserror::Error;

/// Unified error type for run-tracker operations.
#[derive(Debug, Clone, Error)]
#[cfg_attr(feature = "ffi", derive(uniffi::Error))]
pub enum TrackerError {
    /// Persistence/storage error
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// HTTP/API error
    #[error("HTTP error{}: {message}", status_suffix(.status_code))]
    Http {
        message: String,
        status_code: Option<u16>,
    },

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Configuration error
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Run lifecycle misuse (e.g. stopping a session that never started)
    #[error("Lifecycle error: {message}")]
    Lifecycle { message: String },

    /// Generic internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl TrackerError {
    pub fn config(message: impl Into<String>) -> Self {
        TrackerError::Config {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        TrackerError::Persistence {
            message: message.into(),
        }
    }

    /// Whether a retry could plausibly succeed.
    ///
    /// Client errors other than 408/429 mean the server rejected the payload
    /// itself, so retrying the same bytes is pointless.
    pub fn is_transient(&self) -> bool {
        match self {
            TrackerError::Http {
                status_code: Some(code),
                ..
            } => !(400..500).contains(code) || matches!(*code, 408 | 429),
            TrackerError::Http { .. } | TrackerError::Persistence { .. } => true,
            _ => false,
        }
    }
}

fn status_suffix(status_code: &Option<u16>) -> String {
    status_code
        .map(|code| format!(" ({})", code))
        .unwrap_or_default()
}

/// Result type alias for run-tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;

#[cfg(feature = "persistence")]
impl From<rusqlite::Error> for TrackerError {
    fn from(e: rusqlite::Error) -> Self {
        TrackerError::Persistence {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::encode::Error> for TrackerError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        TrackerError::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "persistence")]
impl From<rmp_serde::decode::Error> for TrackerError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        TrackerError::Serialization {
            message: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for TrackerError {
    fn from(e: serde_json::Error) -> Self {
        TrackerError::Serialization {
            message: e.to_string(),
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for TrackerError {
    fn from(e: reqwest::Error) -> Self {
        TrackerError::Http {
            status_code: e.status().map(|s| s.as_u16()),
            message: e.to_string(),
        }
    }
}

/// Extension trait for converting Option to TrackerError.
pub trait OptionExt<T> {
    /// Convert Option to Result with generic internal error.
    fn ok_or_internal(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_internal(self, message: &str) -> Result<T> {
        self.ok_or_else(|| TrackerError::Internal {
            message: message.to_string(),
        })
    }
}
