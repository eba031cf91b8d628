//! Broker engine - job queues and pub/sub built from primitive store
//! operations.
//!
//! ## Module Organization
//!
//! - `job.rs` - Job record, lifecycle states, id/score/backoff helpers
//! - `queue.rs` - Queue config, store-key derivation, per-queue state
//! - `engine.rs` - Broker: registry, admission, stats, dead-letter ops
//! - `worker.rs` - Per-queue worker loop and lifecycle transitions
//! - `pubsub.rs` - In-process channel fan-out

mod engine;
mod job;
mod pubsub;
mod queue;
mod worker;

#[cfg(test)]
mod tests;

pub use engine::{Broker, BrokerError, JobProcessor, ProcessorFuture};
pub use job::{Job, JobOptions, JobState};
pub use pubsub::{Envelope, PubSub};
pub use queue::{BrokerQueue, QueueConfig, QueueStats};
