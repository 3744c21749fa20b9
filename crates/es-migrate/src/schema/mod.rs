//! Destination index provisioning.
//!
//! The destination index is rebuilt from the source's mapping and settings
//! before any document is read. Settings that a cluster assigns to an index
//! on its own are stripped first, since create requests carrying them are
//! rejected.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::core::{DestinationStore, IndexSchema, SourceStore};
use crate::error::{MigrateError, Result};

/// Index settings owned by the cluster that created the index.
pub const SERVER_MANAGED_SETTINGS: [&str; 4] = ["provided_name", "creation_date", "uuid", "version"];

/// Copies a source index definition onto the destination.
pub struct SchemaProvisioner {
    source: Arc<dyn SourceStore>,
    dest: Arc<dyn DestinationStore>,
}

impl SchemaProvisioner {
    pub fn new(source: Arc<dyn SourceStore>, dest: Arc<dyn DestinationStore>) -> Self {
        Self { source, dest }
    }

    /// Read mapping and settings of `index` from the source.
    pub async fn fetch_source_schema(&self, index: &str) -> Result<IndexSchema> {
        let fetch_err = |message: String| MigrateError::SchemaFetch {
            index: index.to_string(),
            message,
        };

        let mapping = self
            .source
            .get_mapping(index)
            .await
            .map_err(|e| fetch_err(format!("mapping: {}", e)))?;
        let settings = self
            .source
            .get_settings(index)
            .await
            .map_err(|e| fetch_err(format!("settings: {}", e)))?;

        let mappings = index_entry(&mapping, index)
            .and_then(|entry| entry.get("mappings"))
            .cloned()
            .ok_or_else(|| fetch_err("no mapping returned for index".into()))?;
        let settings = index_entry(&settings, index)
            .and_then(|entry| entry.get("settings"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));

        Ok(IndexSchema { settings, mappings })
    }

    /// Drop `dest_index` if present and create it from `schema`.
    pub async fn provision(&self, dest_index: &str, schema: &IndexSchema) -> Result<()> {
        let endpoint = self.dest.endpoint().to_string();
        info!("Provisioning index {} on {}", dest_index, endpoint);

        let exists = self.dest.exists(dest_index).await.map_err(|e| {
            MigrateError::provision(dest_index, format!("cannot check index: {}", e))
        })?;
        if exists {
            // Removed concurrently between the check and the delete is fine
            match self.dest.delete(dest_index).await {
                Ok(()) | Err(MigrateError::IndexNotFound(_)) => {
                    info!("Deleted existing index {}", dest_index)
                }
                Err(e) => {
                    return Err(MigrateError::provision(
                        dest_index,
                        format!("cannot delete index: {}", e),
                    ))
                }
            }
        } else {
            debug!("Index {} does not exist yet", dest_index);
        }

        let sanitized = IndexSchema {
            settings: sanitize_settings(&schema.settings),
            mappings: schema.mappings.clone(),
        };
        self.dest
            .create(dest_index, &sanitized)
            .await
            .map_err(|e| MigrateError::provision(dest_index, format!("cannot create index: {}", e)))?;

        info!("Created index {}", dest_index);
        Ok(())
    }
}

/// The entry for `index` in a response keyed by index name.
///
/// An alias resolves to a single concrete index whose name differs from the
/// requested one; that lone entry is used as is.
fn index_entry<'a>(response: &'a Value, index: &str) -> Option<&'a Value> {
    let entries = response.as_object()?;
    entries.get(index).or_else(|| {
        if entries.len() == 1 {
            entries.values().next()
        } else {
            None
        }
    })
}

/// Remove server-managed keys from an index settings document.
///
/// Handles both the nested form (`{"index": {"uuid": ..}}`) and the flat
/// dotted form (`{"index.uuid": ..}`). Anything that is not an object is
/// returned unchanged.
pub fn sanitize_settings(settings: &Value) -> Value {
    let Value::Object(mut root) = settings.clone() else {
        return settings.clone();
    };

    for key in SERVER_MANAGED_SETTINGS {
        root.remove(&format!("index.{}", key));
    }
    if let Some(index) = root.get_mut("index").and_then(Value::as_object_mut) {
        for key in SERVER_MANAGED_SETTINGS {
            index.remove(key);
        }
        // `version` may also be nested as `index.version.created`
        index.retain(|k, _| !k.starts_with("version."));
    }
    root.retain(|k, _| !k.starts_with("index.version."));

    Value::Object(root)
}
