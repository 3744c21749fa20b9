//! Explicit connection context for migrations.

use std::sync::Arc;

use crate::config::Config;
use crate::core::{DestinationConnector, SourceStore};
use crate::drivers::{ElasticClient, HttpConnector};
use crate::error::Result;

/// The source a caller is connected to plus the means to reach destinations.
///
/// Every controller gets its session explicitly; nothing is process-wide.
#[derive(Clone)]
pub struct Session {
    pub source: Arc<dyn SourceStore>,
    pub connector: Arc<dyn DestinationConnector>,
    /// Human name of the source cluster.
    pub alias: String,
}

impl Session {
    pub fn new(
        source: Arc<dyn SourceStore>,
        connector: Arc<dyn DestinationConnector>,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            source,
            connector,
            alias: alias.into(),
        }
    }

    /// HTTP session for the configured source cluster.
    pub fn from_config(config: &Config) -> Result<Self> {
        let source = ElasticClient::new(&config.source)?;
        Ok(Self::new(
            Arc::new(source),
            Arc::new(HttpConnector),
            config.source.display_name(),
        ))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("source", &self.source.endpoint())
            .field("alias", &self.alias)
            .finish()
    }
}
