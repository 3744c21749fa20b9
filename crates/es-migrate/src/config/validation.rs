//! Configuration validation.

use super::{Config, Endpoint};
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_endpoint("source", &config.source)?;
    validate_endpoint("destination", &config.destination)?;

    let migration = &config.migration;
    if migration.source_index.is_empty() {
        return Err(MigrateError::Config(
            "migration.source_index is required".into(),
        ));
    }
    if migration.dest_index.is_empty() {
        return Err(MigrateError::Config("migration.dest_index is required".into()));
    }

    // Provisioning deletes the destination first
    if same_cluster(&config.source, &config.destination)
        && migration.source_index == migration.dest_index
    {
        return Err(MigrateError::Config(
            "source and destination cannot be the same index".into(),
        ));
    }

    if migration.page_size == 0 {
        return Err(MigrateError::Config(
            "migration.page_size must be at least 1".into(),
        ));
    }
    if migration.slices == 0 {
        return Err(MigrateError::Config(
            "migration.slices must be at least 1".into(),
        ));
    }
    if migration.batch_size == 0 {
        return Err(MigrateError::Config(
            "migration.batch_size must be at least 1".into(),
        ));
    }
    if migration.page_buffer == 0 {
        return Err(MigrateError::Config(
            "migration.page_buffer must be at least 1".into(),
        ));
    }
    if migration.keep_alive_secs == 0 {
        return Err(MigrateError::Config(
            "migration.keep_alive_secs must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.workers {
        return Err(MigrateError::Config(
            "migration.workers must be at least 1".into(),
        ));
    }
    if let Some(0) = migration.write_buffer {
        return Err(MigrateError::Config(
            "migration.write_buffer must be at least 1".into(),
        ));
    }

    Ok(())
}

fn validate_endpoint(name: &str, endpoint: &Endpoint) -> Result<()> {
    if endpoint.url.is_empty() {
        return Err(MigrateError::Config(format!("{}.url is required", name)));
    }
    if !(endpoint.url.starts_with("http://") || endpoint.url.starts_with("https://")) {
        return Err(MigrateError::Config(format!(
            "{}.url must start with http:// or https://, got '{}'",
            name, endpoint.url
        )));
    }
    if endpoint.timeout_secs == 0 {
        return Err(MigrateError::Config(format!(
            "{}.timeout_secs must be at least 1",
            name
        )));
    }
    Ok(())
}

fn same_cluster(a: &Endpoint, b: &Endpoint) -> bool {
    a.url.trim_end_matches('/') == b.url.trim_end_matches('/')
}
