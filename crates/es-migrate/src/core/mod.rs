//! Core abstractions for store-agnostic migration.
//!
//! - [`record`]: documents, pages, schemas and bulk outcomes
//! - [`traits`]: source, destination and connector capabilities
//!
//! The engine only talks to stores through these traits, so the pipeline can be
//! driven by the HTTP driver in production and by the in-memory driver in tests.

pub mod record;
pub mod traits;

pub use record::{
    BulkOutcome, CursorPage, DocumentFailure, FailureCause, IndexSchema, Page, Record, SliceId,
};
pub use traits::{DestinationConnector, DestinationStore, SourceStore};
