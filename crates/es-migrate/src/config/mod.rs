//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use std::path::Path;
use std::time::Duration;

use crate::error::Result;
use crate::orchestrator::MigrationJob;
use crate::transfer::RetryPolicy;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Self::load_unvalidated(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a YAML file without validating it, so overrides can be applied first.
    pub fn load_unvalidated<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&content)?)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Build the immutable job description for this configuration.
    pub fn to_job(&self) -> MigrationJob {
        let m = &self.migration;
        MigrationJob {
            source_index: m.source_index.clone(),
            destination: self.destination.clone(),
            dest_index: m.dest_index.clone(),
            item_budget: m.item_budget,
            page_size: m.page_size,
            slices: m.slices,
            workers: m.get_workers(),
            batch_size: m.batch_size,
            page_buffer: m.page_buffer,
            write_buffer: m.get_write_buffer(),
            keep_alive: Duration::from_secs(m.keep_alive_secs),
            read_ahead_pages: m.read_ahead_pages,
            retry: RetryPolicy::new(m.max_retries, Duration::from_millis(m.retry_base_delay_ms)),
            progress_interval: Duration::from_secs(m.progress_interval_secs.max(1)),
            failure_samples: m.failure_samples,
        }
    }
}
