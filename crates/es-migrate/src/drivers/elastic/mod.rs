//! Elasticsearch-compatible HTTP driver.
//!
//! - [`ElasticClient`]: source and destination over the REST API
//! - [`HttpConnector`]: opens destination clients from endpoints
//!
//! Reads use sliced scroll searches sorted by `_doc`; writes use NDJSON
//! `_bulk` requests, with an optional document type for 6.x clusters.

mod client;
mod reader;
mod writer;

pub use client::{ElasticClient, HttpConnector};
