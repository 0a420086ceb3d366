//! Custom error types for the application.
//!
//! This module defines the primary error type, `DaqError`, for the whole logger.
//! Using the `thiserror` crate it keeps recoverable faults (a bad sensor frame, a
//! malformed control datagram, a stale convenience link) apart from the fatal
//! ones that must stop the process.
//!
//! ## Error Hierarchy
//!
//! - **`Config`** / **`Configuration`**: figment extraction failures and semantic
//!   validation errors. Fatal at startup.
//! - **`LogDirectory`**, **`LogFile`**, **`SchemaMismatch`**: storage faults. A
//!   telemetry logger that silently loses rows is worse than one that exits, so
//!   these are always fatal.
//! - **`Sensor`**, **`Link`**, **`Network`**: absorbed locally by the worker that
//!   hit them and only ever logged.
//!
//! Fatal variants map onto distinct process exit codes through
//! [`DaqError::exit_code`].

use std::path::PathBuf;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised anywhere in the telemetry pipeline.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be loaded or extracted.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but holds a logically invalid value.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// The log directory is missing and could not be created, or is not a directory.
    #[error("Cannot access log directory {path}: {source}")]
    LogDirectory {
        /// Directory that was checked.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// Opening, rotating, or appending to the log file failed.
    #[error("Log file error on {path}: {source}")]
    LogFile {
        /// File that was being opened or written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A row does not match the configured header schema.
    #[error("Row schema mismatch: expected {expected} columns [{fields}], got {actual}")]
    SchemaMismatch {
        /// Number of configured columns.
        expected: usize,
        /// Number of columns in the submitted row.
        actual: usize,
        /// Configured field list, comma separated.
        fields: String,
    },

    /// The sensor transport failed to deliver a usable frame.
    #[error("Sensor error: {0}")]
    Sensor(String),

    /// Updating a `current`/`previous` convenience link failed.
    #[error("Link update failed for {path}: {source}")]
    Link {
        /// Link that was being updated.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// A UDP socket operation failed.
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// Encoding a visualization message failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Serial support was not compiled in.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// A worker task panicked or was aborted.
    #[error("Worker '{0}' terminated abnormally")]
    WorkerAborted(String),
}

impl From<figment::Error> for DaqError {
    fn from(value: figment::Error) -> Self {
        DaqError::Config(Box::new(value))
    }
}

impl DaqError {
    /// Whether this error must terminate the process.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DaqError::Config(_)
                | DaqError::Configuration(_)
                | DaqError::LogDirectory { .. }
                | DaqError::LogFile { .. }
                | DaqError::SchemaMismatch { .. }
                | DaqError::WorkerAborted(_)
        )
    }

    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DaqError::LogDirectory { .. } => 2,
            DaqError::LogFile { .. } => 3,
            DaqError::SchemaMismatch { .. } => 4,
            DaqError::Config(_) | DaqError::Configuration(_) => 5,
            _ => 1,
        }
    }
}
