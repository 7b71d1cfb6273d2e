//! Error types for the ZFS Provisioner
//!
//! Provides structured error types for the volume lifecycle engine, the
//! storage engine and export daemon adapters, and the API surface.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the provisioner
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
    // Request Errors
    // =========================================================================
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Capacity parse error: {0}")]
    CapacityParse(String),

    #[error("Hostname lookup failed: {0}")]
    Hostname(String),

    // =========================================================================
    // Storage Engine Errors
    // =========================================================================
    #[error("Storage engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error("Listing children of {parent} failed: {reason}")]
    Lookup { parent: String, reason: String },

    #[error("Dataset already exists: {dataset}")]
    AlreadyExists { dataset: String },

    #[error("Dataset not found: {dataset}")]
    DatasetNotFound { dataset: String },

    #[error("Creating dataset {dataset} failed: {reason}")]
    Create { dataset: String, reason: String },

    #[error("Destroying dataset {dataset} failed: {reason}")]
    Destroy { dataset: String, reason: String },

    #[error("Storage engine command failed: {command} - {reason}")]
    EngineCommand { command: String, reason: String },

    // =========================================================================
    // Export Errors
    // =========================================================================
    #[error("Export daemon action failed: {action} - {reason}")]
    ExportDaemon { action: String, reason: String },

    #[error("Export target config {path} failed: {reason}")]
    ExportConfig { path: String, reason: String },

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Property {property} of {dataset} is not a number: {value:?}")]
    MetricParse {
        dataset: String,
        property: String,
        value: String,
    },

    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Action the orchestrator should take when an operation fails
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Engine could not be reached - retry with backoff
            Error::EngineUnavailable(_)
            | Error::Lookup { .. }
            | Error::EngineCommand { .. }
            | Error::Io(_) => ErrorAction::RequeueWithBackoff,

            // Data is still on disk, give the engine time to settle
            Error::Destroy { .. } => ErrorAction::RequeueAfter(Duration::from_secs(30)),

            // Caller must change the request before retrying
            Error::InvalidArgument(_)
            | Error::CapacityParse(_)
            | Error::Configuration(_)
            | Error::AlreadyExists { .. } => ErrorAction::NoRequeue,

            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::EngineUnavailable(_) | Error::Lookup { .. } | Error::Io(_)
        )
    }

    /// Whether the error means the dataset does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::DatasetNotFound { .. })
    }
}

/// Result type alias for the provisioner
pub type Result<T> = std::result::Result<T, Error>;
