//! Index lifecycle and NDJSON bulk indexing.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::core::{BulkOutcome, DestinationStore, DocumentFailure, FailureCause, IndexSchema, Record};
use crate::error::{MigrateError, Result};

use super::client::{classify_error, ElasticClient};

/// Highest per-item status that counts as written (200 updated, 201 created).
const MAX_SUCCESS_STATUS: u16 = 201;

/// Build the `_bulk` request body: one action line and one source line per record.
pub(crate) fn build_bulk_body(records: &[Record]) -> Result<String> {
    let mut body = String::with_capacity(records.len() * 128);
    for record in records {
        let action = json!({ "index": { "_id": record.id } });
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(&record.source)?);
        body.push('\n');
    }
    Ok(body)
}

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    items: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(rename = "_id", default)]
    id: String,
    status: u16,
    #[serde(default)]
    error: Option<ItemError>,
}

#[derive(Debug, Deserialize)]
struct ItemError {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    caused_by: Option<ItemCause>,
}

#[derive(Debug, Deserialize)]
struct ItemCause {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    reason: Option<String>,
}

/// Decode per-item results of a `_bulk` response, in request order.
pub(crate) fn parse_bulk_response(body: &str) -> Result<Vec<BulkOutcome>> {
    let response: BulkResponse = serde_json::from_str(body)
        .map_err(|e| MigrateError::Protocol(format!("unexpected bulk response: {}", e)))?;

    response
        .items
        .into_iter()
        .map(|item| {
            // Each item is keyed by its action: {"index": {...}}
            let (_, result) = item
                .into_iter()
                .next()
                .ok_or_else(|| MigrateError::Protocol("empty bulk response item".into()))?;
            let item: BulkItem = serde_json::from_value(result)
                .map_err(|e| MigrateError::Protocol(format!("unexpected bulk item: {}", e)))?;
            Ok(outcome_of(item))
        })
        .collect()
}

fn outcome_of(item: BulkItem) -> BulkOutcome {
    if item.status <= MAX_SUCCESS_STATUS {
        return BulkOutcome::Written { id: item.id };
    }
    let error = item.error.unwrap_or(ItemError {
        kind: String::new(),
        reason: None,
        caused_by: None,
    });
    BulkOutcome::Failed(DocumentFailure {
        id: item.id,
        status: item.status,
        kind: error.kind,
        reason: error.reason.unwrap_or_default(),
        cause: error.caused_by.map(|c| FailureCause {
            kind: c.kind,
            reason: c.reason.unwrap_or_default(),
        }),
    })
}

#[async_trait]
impl DestinationStore for ElasticClient {
    async fn exists(&self, index: &str) -> Result<bool> {
        let response = self.send(self.request(Method::HEAD, index)).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            s => Err(MigrateError::Protocol(format!(
                "[{}] unexpected status checking index {}",
                s.as_u16(),
                index
            ))),
        }
    }

    async fn delete(&self, index: &str) -> Result<()> {
        let response = self.send(self.request(Method::DELETE, index)).await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await?;
        match classify_error(status, &body) {
            MigrateError::IndexNotFound(_) => Err(MigrateError::IndexNotFound(index.to_string())),
            other => Err(other),
        }
    }

    async fn create(&self, index: &str, schema: &IndexSchema) -> Result<()> {
        let request = self
            .request(Method::PUT, index)
            .json(&schema.to_create_body());
        let ack = self.send_json(request).await?;
        debug!("{}: created index {}: {}", self.name(), index, ack);
        Ok(())
    }

    async fn bulk_write(&self, index: &str, records: &[Record]) -> Result<Vec<BulkOutcome>> {
        let path = match &self.doc_type {
            Some(doc_type) => format!("{}/{}/_bulk", index, doc_type),
            None => format!("{}/_bulk", index),
        };
        let request = self
            .request(Method::POST, &path)
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(build_bulk_body(records)?);

        let response = self.send(request).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_error(status, &body));
        }
        parse_bulk_response(&body)
    }

    fn endpoint(&self) -> &str {
        self.base_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_body_is_ndjson() {
        let mut source = Map::new();
        source.insert("title".into(), json!("a \"quoted\" title"));
        source.insert("n".into(), json!(1));
        let records = vec![
            Record::new("id-1", source),
            Record::new("weird\"id", Map::new()),
        ];

        let body = build_bulk_body(&records).unwrap();
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(body.ends_with('\n'));
        assert_eq!(lines[0], r#"{"index":{"_id":"id-1"}}"#);
        assert_eq!(lines[1], r#"{"title":"a \"quoted\" title","n":1}"#);
        let action: Value = serde_json::from_str(lines[2]).unwrap();
        assert_eq!(action["index"]["_id"], "weird\"id");
        assert_eq!(lines[3], "{}");
    }

    #[test]
    fn test_parse_bulk_response_statuses() {
        let body = r#"{
            "took": 30, "errors": true,
            "items": [
                { "index": { "_id": "1", "result": "created", "status": 201 } },
                { "index": { "_id": "2", "result": "updated", "status": 200 } },
                { "index": { "_id": "3", "status": 400, "error": {
                    "type": "mapper_parsing_exception",
                    "reason": "failed to parse field [n]",
                    "caused_by": { "type": "number_format_exception", "reason": "For input string: \"x\"" }
                } } },
                { "index": { "_id": "4", "status": 429, "error": { "type": "es_rejected_execution_exception" } } }
            ]
        }"#;

        let outcomes = parse_bulk_response(body).unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes[0].is_written());
        assert!(outcomes[1].is_written());
        match &outcomes[2] {
            BulkOutcome::Failed(f) => {
                assert_eq!(f.id, "3");
                assert_eq!(f.status, 400);
                assert_eq!(f.kind, "mapper_parsing_exception");
                let cause = f.cause.as_ref().unwrap();
                assert_eq!(cause.kind, "number_format_exception");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        match &outcomes[3] {
            BulkOutcome::Failed(f) => {
                assert_eq!(f.status, 429);
                assert_eq!(f.reason, "");
                assert!(f.cause.is_none());
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_parse_bulk_response_rejects_malformed() {
        assert!(matches!(
            parse_bulk_response("not json"),
            Err(MigrateError::Protocol(_))
        ));
        assert!(matches!(
            parse_bulk_response(r#"{"items":[{}]}"#),
            Err(MigrateError::Protocol(_))
        ));
    }
}
