//! Error types for blinkrelay.
//!
//! This module defines all error types used throughout the blinkrelay crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for blinkrelay operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Report Errors ===
    /// A device report is missing a required field.
    #[error("{field} required")]
    Validation {
        /// Name of the missing field, as it appears on the wire.
        field: &'static str,
    },

    /// A request body could not be decoded.
    #[error("malformed request: {message}")]
    MalformedRequest {
        /// Description of what went wrong.
        message: String,
    },

    // === Dispatch Errors ===
    /// The downstream automation webhook call failed.
    #[error("downstream delivery failed: {message}")]
    DownstreamDelivery {
        /// Description of what went wrong.
        message: String,
    },

    /// No downstream webhook is configured.
    #[error("no downstream webhook configured")]
    DispatchNotConfigured,

    // === Transport Errors ===
    /// A subscriber connection failed or closed.
    #[error("transport error: {0}")]
    Transport(String),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === I/O Errors ===
    /// File system or socket operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to bind the listening socket.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// Address that couldn't be bound.
        address: String,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to read a configuration file.
    #[error("failed to read {path}: {source}")]
    FileRead {
        /// Path that couldn't be read.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for blinkrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a validation error for a missing field.
    #[must_use]
    pub fn missing(field: &'static str) -> Self {
        Self::Validation { field }
    }

    /// Create a malformed request error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedRequest {
            message: message.into(),
        }
    }

    /// Create a downstream delivery error.
    #[must_use]
    pub fn downstream(message: impl Into<String>) -> Self {
        Self::DownstreamDelivery {
            message: message.into(),
        }
    }

    /// Create a new transport error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error is the client's fault (never worth retrying).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::MalformedRequest { .. }
        )
    }

    /// Check if this error came from the downstream workflow.
    #[must_use]
    pub fn is_downstream_error(&self) -> bool {
        matches!(
            self,
            Self::DownstreamDelivery { .. } | Self::DispatchNotConfigured
        )
    }
}
