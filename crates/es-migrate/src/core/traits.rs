//! Store capabilities consumed by the migration engine.
//!
//! - [`SourceStore`]: schema introspection and sliced cursor paging
//! - [`DestinationStore`]: index lifecycle and bulk writes
//! - [`DestinationConnector`]: builds a destination from an endpoint
//!
//! Drivers under `drivers/` implement these for a real HTTP cluster and for an
//! in-process store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Endpoint;
use crate::error::Result;

use super::record::{BulkOutcome, CursorPage, IndexSchema, Record, SliceId};

/// Read schema and documents from a source cluster.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Mapping document keyed by index name.
    async fn get_mapping(&self, index: &str) -> Result<Value>;

    /// Settings document keyed by index name.
    async fn get_settings(&self, index: &str) -> Result<Value>;

    /// Open a cursor over one slice of `index`.
    ///
    /// Returns the first page together with the slice's total-hit estimate.
    async fn open_sliced_cursor(
        &self,
        index: &str,
        slice: SliceId,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<CursorPage>;

    /// Fetch the next page of a cursor, renewing its keep-alive window.
    ///
    /// An empty page means the cursor is exhausted.
    async fn advance_cursor(&self, token: &str, keep_alive: Duration) -> Result<CursorPage>;

    /// Release a cursor before its keep-alive window elapses.
    async fn clear_cursor(&self, token: &str) -> Result<()>;

    /// Address used in log lines and errors.
    fn endpoint(&self) -> &str;
}

/// Write schema and documents to a destination cluster.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Check if an index exists.
    async fn exists(&self, index: &str) -> Result<bool>;

    /// Delete an index. Returns `MigrateError::IndexNotFound` if it is absent.
    async fn delete(&self, index: &str) -> Result<()>;

    /// Create an index with the given schema.
    async fn create(&self, index: &str, schema: &IndexSchema) -> Result<()>;

    /// Write a batch of documents in one request.
    ///
    /// Returns one outcome per record, in request order. `Err` means the
    /// request as a whole failed.
    async fn bulk_write(&self, index: &str, records: &[Record]) -> Result<Vec<BulkOutcome>>;

    /// Address used in log lines and errors.
    fn endpoint(&self) -> &str;
}

/// Opens a destination from connection parameters.
#[async_trait]
pub trait DestinationConnector: Send + Sync {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn DestinationStore>>;
}
