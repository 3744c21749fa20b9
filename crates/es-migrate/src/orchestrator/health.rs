//! Connectivity check for the configured clusters.

use std::time::Instant;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{Config, Endpoint};
use crate::drivers::ElasticClient;

/// Reachability of one cluster.
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub endpoint: String,
    pub connected: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of a health check.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source: EndpointHealth,
    pub destination: EndpointHealth,
    pub healthy: bool,
}

/// Ping the source and destination clusters.
pub async fn health_check(config: &Config) -> HealthCheckResult {
    let (source, destination) = tokio::join!(
        ping_endpoint(&config.source),
        ping_endpoint(&config.destination)
    );
    let healthy = source.connected && destination.connected;
    HealthCheckResult {
        source,
        destination,
        healthy,
    }
}

async fn ping_endpoint(endpoint: &Endpoint) -> EndpointHealth {
    let started = Instant::now();
    let outcome = match ElasticClient::new(endpoint) {
        Ok(client) => client.ping().await,
        Err(e) => Err(e),
    };
    let latency_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(info) => {
            let version = info["version"]["number"].as_str().map(str::to_string);
            info!("{} reachable in {}ms", endpoint.display_name(), latency_ms);
            EndpointHealth {
                endpoint: endpoint.display_name().to_string(),
                connected: true,
                latency_ms,
                version,
                error: None,
            }
        }
        Err(e) => {
            warn!("{} unreachable: {}", endpoint.display_name(), e);
            EndpointHealth {
                endpoint: endpoint.display_name().to_string(),
                connected: false,
                latency_ms,
                version: None,
                error: Some(e.to_string()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MigrationConfig;

    #[tokio::test]
    async fn test_unreachable_endpoints_are_unhealthy() {
        let mut source = Endpoint::new("http://127.0.0.1:1");
        source.timeout_secs = 2;
        source.alias = "local".into();
        let config = Config {
            source: source.clone(),
            destination: source,
            migration: MigrationConfig::default(),
        };

        let result = health_check(&config).await;
        assert!(!result.healthy);
        assert!(!result.source.connected);
        assert_eq!(result.source.endpoint, "local");
        assert!(result.source.error.is_some());
    }
}
