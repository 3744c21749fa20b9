//! Immutable description of one migration.

use std::time::Duration;

use crate::config::Endpoint;
use crate::transfer::RetryPolicy;

/// What to migrate and how hard to push.
#[derive(Debug, Clone)]
pub struct MigrationJob {
    /// Index read on the session's source.
    pub source_index: String,

    /// Cluster the documents are written to.
    pub destination: Endpoint,

    /// Index created on the destination.
    pub dest_index: String,

    /// Maximum documents to forward; 0 means everything.
    pub item_budget: u64,

    /// Documents per cursor page.
    pub page_size: usize,

    /// Number of disjoint source slices.
    pub slices: u32,

    /// Number of bulk writers.
    pub workers: usize,

    /// Documents per bulk request.
    pub batch_size: usize,

    /// Capacity of the producer buffer, in pages.
    pub page_buffer: usize,

    /// Capacity of the writer buffer, in pages.
    pub write_buffer: usize,

    /// Cursor keep-alive window.
    pub keep_alive: Duration,

    /// Pages a blocked slice may fetch ahead to renew its cursor.
    pub read_ahead_pages: usize,

    pub retry: RetryPolicy,

    /// Period of progress log lines.
    pub progress_interval: Duration,

    /// Rejected documents kept per writer in the result.
    pub failure_samples: usize,
}

impl MigrationJob {
    /// A job with default sizing.
    pub fn new(
        source_index: impl Into<String>,
        destination: Endpoint,
        dest_index: impl Into<String>,
    ) -> Self {
        Self {
            source_index: source_index.into(),
            destination,
            dest_index: dest_index.into(),
            item_budget: 0,
            page_size: 100,
            slices: 5,
            workers: 10,
            batch_size: 1000,
            page_buffer: 256,
            write_buffer: 20,
            keep_alive: Duration::from_secs(60),
            read_ahead_pages: 4,
            retry: RetryPolicy::none(),
            progress_interval: Duration::from_secs(10),
            failure_samples: 100,
        }
    }

    pub fn with_budget(mut self, item_budget: u64) -> Self {
        self.item_budget = item_budget;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_slices(mut self, slices: u32) -> Self {
        self.slices = slices;
        self
    }

    /// Set the writer count; the writer buffer follows at twice that.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self.write_buffer = workers * 2;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_buffers(mut self, page_buffer: usize, write_buffer: usize) -> Self {
        self.page_buffer = page_buffer;
        self.write_buffer = write_buffer;
        self
    }

    pub fn with_keep_alive(mut self, keep_alive: Duration, read_ahead_pages: usize) -> Self {
        self.keep_alive = keep_alive;
        self.read_ahead_pages = read_ahead_pages;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config_defaults() {
        let job = MigrationJob::new("a", Endpoint::new("http://dst:9200"), "b");
        assert_eq!(job.page_size, 100);
        assert_eq!(job.slices, 5);
        assert_eq!(job.batch_size, 1000);
        assert_eq!(job.page_buffer, 256);
        assert_eq!(job.write_buffer, 2 * job.workers);
        assert_eq!(job.retry, RetryPolicy::none());
    }

    #[test]
    fn test_with_workers_scales_write_buffer() {
        let job = MigrationJob::new("a", Endpoint::new("http://dst:9200"), "b").with_workers(3);
        assert_eq!(job.workers, 3);
        assert_eq!(job.write_buffer, 6);
    }
}
