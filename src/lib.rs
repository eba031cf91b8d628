//! emberq - resilient cache and job broker over a Redis-compatible store.
//!
//! Two coupled capabilities behind one store adapter: a cache/data-structure
//! API that degrades to an in-process emulation when the remote store is
//! unreachable, and a job broker (priority, delay, retry with backoff,
//! dead-lettering, pub/sub fan-out) built from primitive store operations.

pub mod broker;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod runtime;
pub mod store;
pub mod supervisor;
mod time;

pub use broker::{
    Broker, BrokerError, Envelope, Job, JobOptions, JobProcessor, JobState, QueueConfig,
    QueueStats,
};
pub use cache::Cache;
pub use config::StoreConfig;
pub use metrics::{MetricsSnapshot, StoreMetrics};
pub use runtime::Runtime;
pub use store::{BatchCommand, BatchReply, MemoryStore, RemoteStore, Store, StoreError};
pub use supervisor::{ConnectionState, ConnectionSupervisor, HealthReport, LifecycleEvent};
