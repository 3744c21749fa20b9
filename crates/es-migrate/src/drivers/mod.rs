//! Store driver implementations.
//!
//! - [`elastic`]: Elasticsearch-compatible clusters over HTTP
//! - [`memory`]: in-process cluster with fault injection, used by tests
//!
//! Each driver implements the [`SourceStore`](crate::core::SourceStore),
//! [`DestinationStore`](crate::core::DestinationStore) and
//! [`DestinationConnector`](crate::core::DestinationConnector) traits.

pub mod elastic;
pub mod memory;

pub use elastic::{ElasticClient, HttpConnector};
pub use memory::MemoryCluster;
