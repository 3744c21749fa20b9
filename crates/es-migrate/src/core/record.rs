//! Documents, pages and bulk outcomes flowing through the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single document: its identifier and its source fields in original order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Document identifier, preserved on the destination.
    pub id: String,

    /// Document body.
    pub source: Map<String, Value>,
}

impl Record {
    /// Create a record from an id and a body.
    pub fn new(id: impl Into<String>, source: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            source,
        }
    }
}

/// One of `max` disjoint partitions of a source index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SliceId {
    pub id: u32,
    pub max: u32,
}

impl SliceId {
    pub fn new(id: u32, max: u32) -> Self {
        Self { id, max }
    }

    /// All slices of an `n`-way split.
    pub fn split(n: u32) -> Vec<SliceId> {
        let n = n.max(1);
        (0..n).map(|id| SliceId::new(id, n)).collect()
    }
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.id, self.max)
    }
}

/// Result of opening or advancing a cursor.
#[derive(Debug, Clone, Default)]
pub struct CursorPage {
    /// Documents of this page; empty once the cursor is exhausted.
    pub records: Vec<Record>,

    /// Token for the next advance.
    pub token: Option<String>,

    /// Total hits the cursor will produce, as reported by the source.
    pub total: u64,
}

impl CursorPage {
    pub fn is_exhausted(&self) -> bool {
        self.records.is_empty()
    }
}

/// A page of records tagged with the slice that produced it.
#[derive(Debug, Clone)]
pub struct Page {
    /// Originating slice.
    pub slice: SliceId,

    /// Position of this page within its slice, starting at 0.
    pub seq: u64,

    /// Page contents.
    pub records: Vec<Record>,
}

impl Page {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Create-index body: mappings and settings of a source index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSchema {
    #[serde(default)]
    pub settings: Value,

    #[serde(default)]
    pub mappings: Value,
}

impl IndexSchema {
    /// Body for a create-index request, omitting empty parts.
    pub fn to_create_body(&self) -> Value {
        let mut body = Map::new();
        if !is_blank(&self.settings) {
            body.insert("settings".into(), self.settings.clone());
        }
        if !is_blank(&self.mappings) {
            body.insert("mappings".into(), self.mappings.clone());
        }
        Value::Object(body)
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(m) => m.is_empty(),
        _ => false,
    }
}

/// Nested cause of a document failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureCause {
    pub kind: String,
    pub reason: String,
}

/// Structured reason a single document was rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub id: String,
    pub status: u16,
    pub kind: String,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<FailureCause>,
}

impl fmt::Display for DocumentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}: {}", self.status, self.id, self.kind, self.reason)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {}: {})", cause.kind, cause.reason)?;
        }
        Ok(())
    }
}

/// Outcome of one document within a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOutcome {
    Written { id: String },
    Failed(DocumentFailure),
}

impl BulkOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, BulkOutcome::Written { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_slice_split() {
        let slices = SliceId::split(5);
        assert_eq!(slices.len(), 5);
        assert_eq!(slices[4], SliceId::new(4, 5));
        assert_eq!(slices[0].to_string(), "0/5");
        assert_eq!(SliceId::split(0), vec![SliceId::new(0, 1)]);
    }

    #[test]
    fn test_create_body_skips_empty_parts() {
        let schema = IndexSchema {
            settings: json!({}),
            mappings: json!({"properties": {"title": {"type": "text"}}}),
        };
        let body = schema.to_create_body();
        assert!(body.get("settings").is_none());
        assert_eq!(body["mappings"]["properties"]["title"]["type"], "text");
    }

    #[test]
    fn test_record_preserves_field_order() {
        let source = json!({"zeta": 1, "alpha": 2, "mid": 3});
        let record = Record::new("1", source.as_object().cloned().unwrap_or_default());
        let keys: Vec<_> = record.source.keys().cloned().collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_failure_display() {
        let failure = DocumentFailure {
            id: "42".into(),
            status: 400,
            kind: "mapper_parsing_exception".into(),
            reason: "failed to parse field [age]".into(),
            cause: Some(FailureCause {
                kind: "number_format_exception".into(),
                reason: "For input string: \"x\"".into(),
            }),
        };
        let text = failure.to_string();
        assert!(text.starts_with("[400] 42: mapper_parsing_exception"));
        assert!(text.contains("caused by number_format_exception"));
    }
}
