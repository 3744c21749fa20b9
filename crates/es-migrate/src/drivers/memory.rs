//! In-process cluster.
//!
//! [`MemoryCluster`] implements the source, destination and connector traits
//! against plain collections, with switches to inject the failures a real
//! cluster produces: rejected documents, failed bulk requests, failed index
//! creation, expired cursors and slow responses. Clones share state.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::config::Endpoint;
use crate::core::{
    BulkOutcome, CursorPage, DestinationConnector, DestinationStore, DocumentFailure,
    FailureCause, IndexSchema, Record, SliceId, SourceStore,
};
use crate::error::{MigrateError, Result};

#[derive(Debug, Default)]
struct StoredIndex {
    settings: Value,
    mappings: Value,
    docs: Vec<Record>,
    positions: HashMap<String, usize>,
}

impl StoredIndex {
    fn upsert(&mut self, record: Record) {
        match self.positions.get(&record.id) {
            Some(&pos) => self.docs[pos] = record,
            None => {
                self.positions.insert(record.id.clone(), self.docs.len());
                self.docs.push(record);
            }
        }
    }
}

#[derive(Debug)]
struct Cursor {
    slice: SliceId,
    docs: Vec<Record>,
    pos: usize,
    page_size: usize,
}

impl Cursor {
    fn next_page(&mut self) -> Vec<Record> {
        let end = (self.pos + self.page_size).min(self.docs.len());
        let page = self.docs[self.pos..end].to_vec();
        self.pos = end;
        page
    }
}

#[derive(Debug, Default)]
struct Faults {
    rejected_ids: HashSet<String>,
    bulk_failures: u32,
    create_error: Option<String>,
    expired_slices: HashSet<u32>,
    refuse_connections: bool,
    bulk_latency: Duration,
}

#[derive(Debug, Default)]
struct State {
    indices: BTreeMap<String, StoredIndex>,
    cursors: HashMap<String, Cursor>,
    next_cursor: u64,
    created: Vec<(String, IndexSchema)>,
    deleted: Vec<String>,
    faults: Faults,
}

#[derive(Debug)]
struct Inner {
    endpoint: String,
    state: Mutex<State>,
    advance_calls: AtomicU64,
    bulk_calls: AtomicU64,
}

/// Cluster held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    inner: Arc<Inner>,
}

impl MemoryCluster {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                state: Mutex::new(State::default()),
                advance_calls: AtomicU64::new(0),
                bulk_calls: AtomicU64::new(0),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not hide the state from the others
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Create an index directly, bypassing the create-call log and faults.
    pub fn create_index(&self, name: &str, settings: Value, mappings: Value) {
        self.state().indices.insert(
            name.to_string(),
            StoredIndex {
                settings,
                mappings,
                ..Default::default()
            },
        );
    }

    /// Add `count` generated documents (`doc-0`, `doc-1`, ...) to `index`.
    pub fn seed(&self, index: &str, count: usize) {
        let mut state = self.state();
        let stored = state.indices.entry(index.to_string()).or_default();
        let start = stored.docs.len();
        for n in start..start + count {
            let mut source = Map::new();
            source.insert("n".into(), json!(n));
            source.insert("title".into(), json!(format!("document {}", n)));
            stored.upsert(Record::new(format!("doc-{}", n), source));
        }
    }

    pub fn insert(&self, index: &str, record: Record) {
        self.state()
            .indices
            .entry(index.to_string())
            .or_default()
            .upsert(record);
    }

    pub fn doc_count(&self, index: &str) -> usize {
        self.state().indices.get(index).map_or(0, |i| i.docs.len())
    }

    pub fn documents(&self, index: &str) -> Vec<Record> {
        self.state()
            .indices
            .get(index)
            .map(|i| i.docs.clone())
            .unwrap_or_default()
    }

    /// Every successful `delete` call, in order.
    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    /// Every successful `create` call, in order.
    pub fn created(&self) -> Vec<(String, IndexSchema)> {
        self.state().created.clone()
    }

    pub fn open_cursors(&self) -> usize {
        self.state().cursors.len()
    }

    pub fn advance_calls(&self) -> u64 {
        self.inner.advance_calls.load(Ordering::SeqCst)
    }

    pub fn bulk_calls(&self) -> u64 {
        self.inner.bulk_calls.load(Ordering::SeqCst)
    }

    /// Reject these document ids in every bulk request.
    pub fn reject_ids<I, S>(&self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.state()
            .faults
            .rejected_ids
            .extend(ids.into_iter().map(Into::into));
    }

    /// Fail the next `times` bulk requests as a whole.
    pub fn fail_bulk(&self, times: u32) {
        self.state().faults.bulk_failures = times;
    }

    /// Fail every `create` call with `message`.
    pub fn fail_create(&self, message: impl Into<String>) {
        self.state().faults.create_error = Some(message.into());
    }

    /// Expire the cursors of slice `id`, open or future.
    pub fn expire_cursors_of_slice(&self, id: u32) {
        self.state().faults.expired_slices.insert(id);
    }

    /// Make the connector refuse every endpoint.
    pub fn refuse_connections(&self) {
        self.state().faults.refuse_connections = true;
    }

    pub fn set_bulk_latency(&self, latency: Duration) {
        self.state().faults.bulk_latency = latency;
    }

    fn rejection(id: &str) -> DocumentFailure {
        DocumentFailure {
            id: id.to_string(),
            status: 400,
            kind: "mapper_parsing_exception".into(),
            reason: "failed to parse".into(),
            cause: Some(FailureCause {
                kind: "illegal_argument_exception".into(),
                reason: format!("document {} rejected", id),
            }),
        }
    }
}

/// `{"<index>": {"<field>": value}}`, the shape of per-index admin responses.
fn keyed(index: &str, field: &str, value: Value) -> Value {
    let mut entry = Map::new();
    entry.insert(field.to_string(), value);
    let mut root = Map::new();
    root.insert(index.to_string(), Value::Object(entry));
    Value::Object(root)
}

#[async_trait]
impl SourceStore for MemoryCluster {
    async fn get_mapping(&self, index: &str) -> Result<Value> {
        let state = self.state();
        let stored = state
            .indices
            .get(index)
            .ok_or_else(|| MigrateError::IndexNotFound(index.to_string()))?;
        Ok(keyed(index, "mappings", stored.mappings.clone()))
    }

    async fn get_settings(&self, index: &str) -> Result<Value> {
        let state = self.state();
        let stored = state
            .indices
            .get(index)
            .ok_or_else(|| MigrateError::IndexNotFound(index.to_string()))?;
        Ok(keyed(index, "settings", stored.settings.clone()))
    }

    async fn open_sliced_cursor(
        &self,
        index: &str,
        slice: SliceId,
        page_size: usize,
        _keep_alive: Duration,
    ) -> Result<CursorPage> {
        let mut state = self.state();
        let stored = state
            .indices
            .get(index)
            .ok_or_else(|| MigrateError::IndexNotFound(index.to_string()))?;

        let max = slice.max.max(1) as usize;
        let docs: Vec<Record> = stored
            .docs
            .iter()
            .enumerate()
            .filter(|(pos, _)| pos % max == slice.id as usize)
            .map(|(_, doc)| doc.clone())
            .collect();
        let total = docs.len() as u64;

        let mut cursor = Cursor {
            slice,
            docs,
            pos: 0,
            page_size: page_size.max(1),
        };
        let records = cursor.next_page();

        state.next_cursor += 1;
        let token = format!("cursor-{}", state.next_cursor);
        state.cursors.insert(token.clone(), cursor);

        Ok(CursorPage {
            records,
            token: Some(token),
            total,
        })
    }

    async fn advance_cursor(&self, token: &str, _keep_alive: Duration) -> Result<CursorPage> {
        self.inner.advance_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        let expired_slices = state.faults.expired_slices.clone();
        let expired = || MigrateError::CursorExpired {
            slice: String::new(),
            message: format!("No search context found for id [{}]", token),
        };

        let cursor = state.cursors.get_mut(token).ok_or_else(expired)?;
        if expired_slices.contains(&cursor.slice.id) {
            return Err(expired());
        }
        let total = cursor.docs.len() as u64;
        Ok(CursorPage {
            records: cursor.next_page(),
            token: Some(token.to_string()),
            total,
        })
    }

    async fn clear_cursor(&self, token: &str) -> Result<()> {
        self.state().cursors.remove(token);
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }
}

#[async_trait]
impl DestinationStore for MemoryCluster {
    async fn exists(&self, index: &str) -> Result<bool> {
        Ok(self.state().indices.contains_key(index))
    }

    async fn delete(&self, index: &str) -> Result<()> {
        let mut state = self.state();
        match state.indices.remove(index) {
            Some(_) => {
                state.deleted.push(index.to_string());
                Ok(())
            }
            None => Err(MigrateError::IndexNotFound(index.to_string())),
        }
    }

    async fn create(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        let mut state = self.state();
        if let Some(message) = &state.faults.create_error {
            return Err(MigrateError::Protocol(message.clone()));
        }
        if state.indices.contains_key(index) {
            return Err(MigrateError::Protocol(format!(
                "resource_already_exists_exception: index [{}] already exists",
                index
            )));
        }
        state.indices.insert(
            index.to_string(),
            StoredIndex {
                settings: schema.settings.clone(),
                mappings: schema.mappings.clone(),
                ..Default::default()
            },
        );
        state.created.push((index.to_string(), schema.clone()));
        Ok(())
    }

    async fn bulk_write(&self, index: &str, records: &[Record]) -> Result<Vec<BulkOutcome>> {
        let latency = self.state().faults.bulk_latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.inner.bulk_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.state();
        if state.faults.bulk_failures > 0 {
            state.faults.bulk_failures -= 1;
            return Err(MigrateError::connectivity(
                self.inner.endpoint.clone(),
                "connection reset by peer",
            ));
        }

        let rejected = state.faults.rejected_ids.clone();
        // Writing to a missing index creates it, as a real cluster does
        let stored = state.indices.entry(index.to_string()).or_default();
        let outcomes = records
            .iter()
            .map(|record| {
                if rejected.contains(&record.id) {
                    BulkOutcome::Failed(Self::rejection(&record.id))
                } else {
                    stored.upsert(record.clone());
                    BulkOutcome::Written {
                        id: record.id.clone(),
                    }
                }
            })
            .collect();
        Ok(outcomes)
    }

    fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }
}

#[async_trait]
impl DestinationConnector for MemoryCluster {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn DestinationStore>> {
        if self.state().faults.refuse_connections {
            return Err(MigrateError::connectivity(
                endpoint.url.clone(),
                "connection refused",
            ));
        }
        Ok(Arc::new(self.clone()))
    }
}
