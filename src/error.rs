//! Error types for the instance discovery service
//!
//! Separates "not found" conditions (absent documents, empty searches) from
//! protocol and transport failures so the route layer can map them to 404
//! and 500 respectively.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the registry
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Not Found
    // =========================================================================
    #[error("Instance not found: {id}")]
    InstanceNotFound { id: String },

    #[error("No instances matched query: {query}")]
    NoResults { query: String },

    // =========================================================================
    // Membership Errors
    // =========================================================================
    #[error("Player {player_id} is not a member of instance {instance_id}")]
    NotAMember {
        instance_id: String,
        player_id: String,
    },

    #[error("Player {player_id} is blocked from instance {instance_id}")]
    PlayerBlocked {
        instance_id: String,
        player_id: String,
    },

    // =========================================================================
    // Registration Errors
    // =========================================================================
    #[error("Invalid location string {location:?}: {reason}")]
    InvalidLocation { location: String, reason: String },

    #[error("Could not mint a unique instance name after {attempts} attempts")]
    NameCollision { attempts: u32 },

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Store error: {0}")]
    Store(#[from] redis::RedisError),

    #[error("Store operation {operation} timed out after {timeout:?}")]
    StoreTimeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("Store protocol error: {0}")]
    Protocol(String),

    // =========================================================================
    // Parse / IO Errors
    // =========================================================================
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether this error means "nothing there" rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::InstanceNotFound { .. } | Error::NoResults { .. }
        )
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        match self {
            Error::StoreTimeout { .. } => true,
            Error::Store(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            _ => false,
        }
    }

    /// HTTP status the route layer reports for this error
    pub fn status_code(&self) -> u16 {
        if self.is_not_found() {
            404
        } else {
            500
        }
    }

    pub(crate) fn instance_not_found(id: impl Into<String>) -> Self {
        Error::InstanceNotFound { id: id.into() }
    }
}

/// Result type alias for the registry
pub type Result<T> = std::result::Result<T, Error>;
