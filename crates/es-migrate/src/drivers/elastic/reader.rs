//! Schema introspection and sliced scroll search.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::core::{CursorPage, Record, SliceId, SourceStore};
use crate::error::{MigrateError, Result};

use super::client::ElasticClient;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "_scroll_id", default)]
    scroll_id: Option<String>,
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(default)]
    total: Option<TotalHits>,
    #[serde(default)]
    hits: Vec<Hit>,
}

/// A bare count before 7.0, an object after.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TotalHits {
    Count(u64),
    Object { value: u64 },
}

#[derive(Debug, Deserialize)]
struct Hit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_source", default)]
    source: Map<String, Value>,
}

/// Decode a search or scroll response into a cursor page.
pub(crate) fn parse_search_response(body: Value) -> Result<CursorPage> {
    let response: SearchResponse = serde_json::from_value(body)
        .map_err(|e| MigrateError::Protocol(format!("unexpected search response: {}", e)))?;

    let total = match response.hits.total {
        Some(TotalHits::Count(n)) | Some(TotalHits::Object { value: n }) => n,
        None => 0,
    };
    let records = response
        .hits
        .hits
        .into_iter()
        .map(|hit| Record::new(hit.id, hit.source))
        .collect();

    Ok(CursorPage {
        records,
        token: response.scroll_id,
        total,
    })
}

fn scroll_param(keep_alive: Duration) -> String {
    format!("{}s", keep_alive.as_secs().max(1))
}

/// Body of the initial search for one slice, in index order.
pub(crate) fn slice_query(slice: SliceId, page_size: usize) -> Value {
    let mut body = json!({
        "size": page_size,
        "sort": ["_doc"],
    });
    // A single slice is a plain scroll; the slice clause needs max > 1
    if slice.max > 1 {
        body["slice"] = json!({ "id": slice.id, "max": slice.max });
    }
    body
}

#[async_trait]
impl SourceStore for ElasticClient {
    async fn get_mapping(&self, index: &str) -> Result<Value> {
        self.send_json(self.request(Method::GET, &format!("{}/_mapping", index)))
            .await
    }

    async fn get_settings(&self, index: &str) -> Result<Value> {
        self.send_json(self.request(Method::GET, &format!("{}/_settings", index)))
            .await
    }

    async fn open_sliced_cursor(
        &self,
        index: &str,
        slice: SliceId,
        page_size: usize,
        keep_alive: Duration,
    ) -> Result<CursorPage> {
        let request = self
            .request(Method::POST, &format!("{}/_search", index))
            .query(&[("scroll", scroll_param(keep_alive))])
            .json(&slice_query(slice, page_size));
        let page = parse_search_response(self.send_json(request).await?)?;
        debug!(
            "{}: opened slice {} of {}, {} hits",
            self.name(),
            slice,
            index,
            page.total
        );
        Ok(page)
    }

    async fn advance_cursor(&self, token: &str, keep_alive: Duration) -> Result<CursorPage> {
        let request = self.request(Method::POST, "_search/scroll").json(&json!({
            "scroll": scroll_param(keep_alive),
            "scroll_id": token,
        }));

        let response = self.send(request).await?;
        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::NOT_FOUND {
            // Scroll contexts that timed out answer 404, sometimes without a body
            return Err(MigrateError::CursorExpired {
                slice: String::new(),
                message: format!("scroll context gone: {}", body.trim()),
            });
        }
        if !status.is_success() {
            return Err(super::client::classify_error(status, &body));
        }
        parse_search_response(serde_json::from_str(&body)?)
    }

    async fn clear_cursor(&self, token: &str) -> Result<()> {
        let request = self
            .request(Method::DELETE, "_search/scroll")
            .json(&json!({ "scroll_id": [token] }));
        let response = self.send(request).await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let body = response.text().await?;
            Err(super::client::classify_error(status, &body))
        }
    }

    fn endpoint(&self) -> &str {
        self.base_url()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_search_response_es6() {
        let body = json!({
            "_scroll_id": "DXF1ZXJ5",
            "took": 3,
            "hits": {
                "total": 1500,
                "hits": [
                    { "_id": "1", "_index": "a", "_type": "documents", "_source": { "title": "x", "n": 1 } },
                    { "_id": "2", "_index": "a", "_type": "documents", "_source": { "title": "y", "n": 2 } }
                ]
            }
        });
        let page = parse_search_response(body).unwrap();
        assert_eq!(page.total, 1500);
        assert_eq!(page.token.as_deref(), Some("DXF1ZXJ5"));
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[1].id, "2");
        assert_eq!(page.records[0].source["title"], "x");
    }

    #[test]
    fn test_parse_search_response_total_object_and_empty_page() {
        let body = json!({
            "_scroll_id": "abc",
            "hits": { "total": { "value": 42, "relation": "eq" }, "hits": [] }
        });
        let page = parse_search_response(body).unwrap();
        assert_eq!(page.total, 42);
        assert!(page.is_exhausted());
    }

    #[test]
    fn test_parse_search_response_rejects_garbage() {
        let err = parse_search_response(json!({ "nope": true })).unwrap_err();
        assert!(matches!(err, MigrateError::Protocol(_)));
    }

    #[test]
    fn test_slice_query() {
        let sliced = slice_query(SliceId::new(2, 5), 100);
        assert_eq!(sliced["slice"], json!({ "id": 2, "max": 5 }));
        assert_eq!(sliced["size"], 100);
        assert_eq!(sliced["sort"], json!(["_doc"]));

        let single = slice_query(SliceId::new(0, 1), 100);
        assert!(single.get("slice").is_none());
    }

    #[test]
    fn test_scroll_param() {
        assert_eq!(scroll_param(Duration::from_secs(60)), "60s");
        assert_eq!(scroll_param(Duration::from_millis(10)), "1s");
    }
}
