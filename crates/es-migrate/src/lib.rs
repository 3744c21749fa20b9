//! # es-migrate
//!
//! Concurrent document migration between Elasticsearch-compatible clusters.
//!
//! This library copies every document of one index into an index on another
//! (or the same) cluster with support for:
//!
//! - **Schema provisioning** from the source mapping and settings
//! - **Sliced reads** with one scroll cursor per slice
//! - **Parallel bulk writes** with per-document failure accounting
//! - **Item budgets** that cap the number of forwarded documents
//! - **Cancellation** through a single stop entry point
//!
//! ## Example
//!
//! ```rust,no_run
//! use es_migrate::{Config, MigrationController, Session};
//!
//! #[tokio::main]
//! async fn main() -> es_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?.with_auto_tuning();
//!     let session = Session::from_config(&config)?;
//!     let controller = MigrationController::new(session, config.to_job());
//!     let result = controller.migrate().await?;
//!     println!("Migrated {} documents", result.written);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod drivers;
pub mod error;
pub mod orchestrator;
pub mod schema;
pub mod source;
pub mod state;
pub mod transfer;

// Re-exports for convenient access
pub use config::{Config, Endpoint, MigrationConfig};
pub use self::core::{
    BulkOutcome, DestinationConnector, DestinationStore, DocumentFailure, IndexSchema, Record,
    SliceId, SourceStore,
};
pub use drivers::{ElasticClient, HttpConnector, MemoryCluster};
pub use error::{MigrateError, Result};
pub use orchestrator::{
    health_check, HealthCheckResult, MigrationController, MigrationJob, MigrationResult, Session,
};
pub use schema::{sanitize_settings, SchemaProvisioner};
pub use source::{SliceOutcome, SliceReport, SlicedCursorReader};
pub use state::{JobStatus, StopHandle, StopReason};
pub use transfer::{ProgressSnapshot, ProgressTracker, RetryPolicy};
