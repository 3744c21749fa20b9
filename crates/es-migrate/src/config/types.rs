//! Configuration type definitions with auto-tuning based on system resources.

use std::fmt;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::info;

/// System resource information for auto-tuning.
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Number of CPU cores.
    pub cpu_cores: usize,
}

impl SystemResources {
    /// Detect system resources.
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_cpu();

        Self {
            cpu_cores: sys.cpus().len(),
        }
    }

    /// Log detected system resources.
    pub fn log(&self) {
        info!(
            "System resources: {} CPU cores",
            self.cpu_cores
        );
    }
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Cluster holding the source index.
    pub source: Endpoint,

    /// Cluster receiving the documents.
    pub destination: Endpoint,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,
}

impl Config {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that weren't explicitly set in the config file.
    pub fn with_auto_tuning(mut self) -> Self {
        let resources = SystemResources::detect();
        resources.log();
        self.migration = self.migration.with_auto_tuning(&resources);
        self
    }
}

/// Connection parameters of one cluster.
#[derive(Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Base URL, e.g. `http://localhost:9200`.
    pub url: String,

    /// Basic-auth user (optional).
    #[serde(default)]
    pub user: String,

    /// Basic-auth password (optional).
    #[serde(default)]
    pub password: String,

    /// Display name used in logs.
    #[serde(default)]
    pub alias: String,

    /// Per-request timeout in seconds (default: 60).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Mapping type for bulk requests on clusters that still require one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,
}

impl Endpoint {
    /// Endpoint with no credentials.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            user: String::new(),
            password: String::new(),
            alias: String::new(),
            timeout_secs: default_timeout_secs(),
            doc_type: None,
        }
    }

    /// Add basic-auth credentials.
    pub fn with_credentials(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }

    /// Whether basic auth should be sent. Both parts are required.
    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty() && !self.password.is_empty()
    }

    /// Alias if set, otherwise the URL.
    pub fn display_name(&self) -> &str {
        if self.alias.is_empty() {
            &self.url
        } else {
            &self.alias
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("alias", &self.alias)
            .field("timeout_secs", &self.timeout_secs)
            .field("doc_type", &self.doc_type)
            .finish()
    }
}

/// Migration behavior configuration.
/// `workers` and `write_buffer` use Option<T> to distinguish between
/// "not set" (use auto-tuned default) and "explicitly set" (use provided value).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Index to read from.
    #[serde(default)]
    pub source_index: String,

    /// Index to (re)create and write to.
    #[serde(default)]
    pub dest_index: String,

    /// Maximum documents to migrate; 0 means no limit.
    #[serde(default)]
    pub item_budget: u64,

    /// Documents per cursor page (default: 100).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Number of parallel cursor slices (default: 5).
    #[serde(default = "default_slices")]
    pub slices: u32,

    /// Parallel bulk writers. Auto-tuned based on CPU cores if not set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Documents per bulk request (default: 1000).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pages buffered between the slices and the coordinator (default: 256).
    #[serde(default = "default_page_buffer")]
    pub page_buffer: usize,

    /// Pages buffered between the coordinator and the writers. Defaults to twice the workers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_buffer: Option<usize>,

    /// Cursor keep-alive window in seconds (default: 60).
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Pages a stalled slice may fetch ahead to keep its cursor alive (default: 4).
    #[serde(default = "default_read_ahead_pages")]
    pub read_ahead_pages: usize,

    /// Retries of transient read/write failures (default: 0, no retry).
    #[serde(default)]
    pub max_retries: u32,

    /// Base delay between retries, doubled per attempt (default: 200ms).
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Seconds between progress log lines (default: 10).
    #[serde(default = "default_progress_interval_secs")]
    pub progress_interval_secs: u64,

    /// Rejected documents kept per writer for the final report (default: 100).
    #[serde(default = "default_failure_samples")]
    pub failure_samples: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            source_index: String::new(),
            dest_index: String::new(),
            item_budget: 0,
            page_size: default_page_size(),
            slices: default_slices(),
            workers: None,
            batch_size: default_batch_size(),
            page_buffer: default_page_buffer(),
            write_buffer: None,
            keep_alive_secs: default_keep_alive_secs(),
            read_ahead_pages: default_read_ahead_pages(),
            max_retries: 0,
            retry_base_delay_ms: default_retry_base_delay_ms(),
            progress_interval_secs: default_progress_interval_secs(),
            failure_samples: default_failure_samples(),
        }
    }
}

impl MigrationConfig {
    /// Apply auto-tuned defaults based on system resources.
    /// Only fills in values that are None (not explicitly set).
    pub fn with_auto_tuning(mut self, resources: &SystemResources) -> Self {
        let cores = resources.cpu_cores;

        // Bulk writes are network-bound: two writers per core, 4-16 range
        if self.workers.is_none() {
            self.workers = Some((cores * 2).clamp(4, 16));
        }

        if self.write_buffer.is_none() {
            self.write_buffer = Some(self.get_workers() * 2);
        }

        info!(
            "Auto-tuned config: workers={}, write_buffer={}, slices={}, page_size={}, batch_size={}",
            self.get_workers(),
            self.get_write_buffer(),
            self.slices,
            self.page_size,
            self.batch_size,
        );

        self
    }

    pub fn get_workers(&self) -> usize {
        self.workers.unwrap_or(10)
    }

    pub fn get_write_buffer(&self) -> usize {
        self.write_buffer.unwrap_or(self.get_workers() * 2)
    }
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_page_size() -> usize {
    100
}

fn default_slices() -> u32 {
    5
}

fn default_batch_size() -> usize {
    1000
}

fn default_page_buffer() -> usize {
    256
}

fn default_keep_alive_secs() -> u64 {
    60
}

fn default_read_ahead_pages() -> usize {
    4
}

fn default_retry_base_delay_ms() -> u64 {
    200
}

fn default_progress_interval_secs() -> u64 {
    10
}

fn default_failure_samples() -> usize {
    100
}
