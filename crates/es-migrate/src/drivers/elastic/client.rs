//! HTTP client and error classification.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::Endpoint;
use crate::core::{DestinationConnector, DestinationStore};
use crate::error::{MigrateError, Result};

/// Connection to one Elasticsearch-compatible cluster.
#[derive(Debug, Clone)]
pub struct ElasticClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<(String, String)>,
    pub(super) doc_type: Option<String>,
    name: String,
}

impl ElasticClient {
    pub fn new(endpoint: &Endpoint) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(endpoint.timeout_secs))
            .build()?;

        let credentials = endpoint
            .has_credentials()
            .then(|| (endpoint.user.clone(), endpoint.password.clone()));

        Ok(Self {
            http,
            base_url: endpoint.url.trim_end_matches('/').to_string(),
            credentials,
            doc_type: endpoint.doc_type.clone().filter(|t| !t.is_empty()),
            name: endpoint.display_name().to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub(super) fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.http.request(method, url);
        match &self.credentials {
            Some((user, password)) => builder.basic_auth(user, Some(password)),
            None => builder,
        }
    }

    /// Send a request, mapping transport failures to connectivity errors.
    pub(super) async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                MigrateError::connectivity(self.base_url.clone(), e.to_string())
            } else {
                MigrateError::Http(e)
            }
        })
    }

    /// Send a request and decode a successful JSON body.
    pub(super) async fn send_json(&self, request: RequestBuilder) -> Result<Value> {
        let response = self.send(request).await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(classify_error(status, &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Cluster info document (`GET /`).
    pub async fn ping(&self) -> Result<Value> {
        let info = self
            .send_json(self.request(Method::GET, "/"))
            .await
            .map_err(|e| match e {
                MigrateError::Connectivity { .. } => e,
                other => MigrateError::connectivity(self.base_url.clone(), other.to_string()),
            })?;
        debug!(
            "{} is up: cluster {}, version {}",
            self.name,
            info["cluster_name"].as_str().unwrap_or("?"),
            info["version"]["number"].as_str().unwrap_or("?")
        );
        Ok(info)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    index: Option<String>,
    #[serde(default)]
    root_cause: Vec<ErrorDetail>,
}

/// Map an error response onto the error taxonomy.
pub(crate) fn classify_error(status: StatusCode, body: &str) -> MigrateError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .ok()
        .and_then(|b| b.error)
        .unwrap_or_default();

    let kinds: Vec<&str> = std::iter::once(detail.kind.as_str())
        .chain(detail.root_cause.iter().map(|c| c.kind.as_str()))
        .collect();
    let reason = detail
        .reason
        .clone()
        .or_else(|| detail.root_cause.iter().find_map(|c| c.reason.clone()))
        .unwrap_or_else(|| body.trim().to_string());

    if kinds.contains(&"search_context_missing_exception") {
        return MigrateError::CursorExpired {
            slice: String::new(),
            message: reason,
        };
    }
    if kinds.contains(&"index_not_found_exception") || reason.contains("no such index") {
        let index = detail
            .index
            .or_else(|| detail.root_cause.iter().find_map(|c| c.index.clone()))
            .unwrap_or_default();
        return MigrateError::IndexNotFound(index);
    }

    let kind = if detail.kind.is_empty() {
        "error"
    } else {
        detail.kind.as_str()
    };
    MigrateError::Protocol(format!("[{}] {}: {}", status.as_u16(), kind, reason))
}

/// Opens destinations over HTTP.
#[derive(Debug, Default, Clone, Copy)]
pub struct HttpConnector;

#[async_trait]
impl DestinationConnector for HttpConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<Arc<dyn DestinationStore>> {
        let client = ElasticClient::new(endpoint)?;
        client.ping().await?;
        Ok(Arc::new(client))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_scroll_context() {
        let body = r#"{"error":{"root_cause":[{"type":"search_context_missing_exception","reason":"No search context found for id [42]"}],"type":"search_phase_execution_exception","reason":"all shards failed"},"status":404}"#;
        match classify_error(StatusCode::NOT_FOUND, body) {
            MigrateError::CursorExpired { message, .. } => assert_eq!(message, "all shards failed"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_classify_missing_index() {
        let body = r#"{"error":{"type":"index_not_found_exception","reason":"no such index","index":"copy"},"status":404}"#;
        assert!(matches!(
            classify_error(StatusCode::NOT_FOUND, body),
            MigrateError::IndexNotFound(index) if index == "copy"
        ));
    }

    #[test]
    fn test_classify_other_errors_as_protocol() {
        let body = r#"{"error":{"type":"mapper_parsing_exception","reason":"Root mapping definition has unsupported parameters"},"status":400}"#;
        let err = classify_error(StatusCode::BAD_REQUEST, body);
        assert_eq!(
            err.to_string(),
            MigrateError::Protocol(
                "[400] mapper_parsing_exception: Root mapping definition has unsupported parameters".into()
            )
            .to_string()
        );

        let err = classify_error(StatusCode::BAD_GATEWAY, "upstream down");
        assert!(matches!(err, MigrateError::Protocol(msg) if msg == "[502] error: upstream down"));
    }

    #[test]
    fn test_client_strips_trailing_slash_and_empty_doc_type() {
        let mut endpoint = Endpoint::new("http://localhost:9200/");
        endpoint.doc_type = Some(String::new());
        let client = ElasticClient::new(&endpoint).unwrap();
        assert_eq!(client.base_url(), "http://localhost:9200");
        assert!(client.doc_type.is_none());
    }
}
