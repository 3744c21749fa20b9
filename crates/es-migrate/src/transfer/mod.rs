//! Transfer engine between the slice producers and the destination.
//!
//! Pages flow through two bounded buffers:
//!
//! ```text
//! producers --mpsc--> Coordinator --async_channel--> BulkWriterPool
//! ```
//!
//! The [`Coordinator`] is the single owner of the downstream sender, so the
//! item budget and the stop request are applied in one place. Writers compete
//! on the shared receiver and account every document in the
//! [`ProgressTracker`].

pub mod coordinator;
pub mod progress;
pub mod retry;
pub mod writer;

pub use coordinator::{Coordinator, FunnelOutcome};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use retry::RetryPolicy;
pub use writer::{BulkWriterPool, PoolReport, WorkerReport, WriterConfig, WriterHandles};
