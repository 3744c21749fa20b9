//! Error types for the migration library.

use thiserror::Error;

use crate::orchestrator::MigrationResult;
use crate::state::JobStatus;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source schema could not be read.
    #[error("Cannot read schema of source index {index}: {message}")]
    SchemaFetch { index: String, message: String },

    /// Destination index could not be (re)created. Fatal before any read starts.
    #[error("Cannot provision destination index {index}: {message}")]
    SchemaProvision { index: String, message: String },

    /// The named index does not exist.
    #[error("No such index: {0}")]
    IndexNotFound(String),

    /// Cluster unreachable or transport-level failure.
    #[error("Cannot reach {endpoint}: {message}")]
    Connectivity { endpoint: String, message: String },

    /// Scroll context expired or was released; terminal for one slice.
    #[error("Cursor expired for slice {slice}: {message}")]
    CursorExpired { slice: String, message: String },

    /// A whole bulk request failed; terminal for one writer.
    #[error("Bulk write failed in writer {worker} ({records} records not written): {message}")]
    BulkWrite {
        worker: usize,
        records: usize,
        message: String,
    },

    /// The cluster answered with something we cannot interpret.
    #[error("Unexpected response: {0}")]
    Protocol(String),

    /// Job status cannot move between the given states.
    #[error("Invalid job transition from {from} to {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    /// The run finished but at least one writer failed fatally.
    #[error(
        "Migration failed: {} (scrolled: {}, written: {}, errored: {})",
        result.stop_reason, result.scrolled, result.written, result.errored
    )]
    JobFailed { result: Box<MigrationResult> },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl MigrateError {
    /// Create a Connectivity error for an endpoint.
    pub fn connectivity(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::Connectivity {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Create a SchemaProvision error.
    pub fn provision(index: impl Into<String>, message: impl Into<String>) -> Self {
        MigrateError::SchemaProvision {
            index: index.into(),
            message: message.into(),
        }
    }

    /// Whether a retry of the same request could succeed.
    ///
    /// Only transport-level failures qualify. Expired cursors, schema errors and
    /// malformed responses never do.
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrateError::Connectivity { .. } => true,
            MigrateError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            _ => false,
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_) | MigrateError::Yaml(_) => 2,
            MigrateError::Connectivity { .. } | MigrateError::Http(_) => 3,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;
