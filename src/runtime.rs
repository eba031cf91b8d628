//! Process-wide context object.
//!
//! Built once at process start and injected into every collaborator;
//! nothing in the crate reaches for ambient global state.

use std::sync::Arc;

use crate::broker::Broker;
use crate::cache::Cache;
use crate::config::StoreConfig;
use crate::supervisor::{ConnectionSupervisor, HealthReport};

pub struct Runtime {
    supervisor: Arc<ConnectionSupervisor>,
    cache: Arc<Cache>,
    broker: Arc<Broker>,
}

impl Runtime {
    /// Connect to the remote store (falling back to the emulation on
    /// exhaustion) and wire the cache and broker over the shared adapter.
    pub async fn initialize(config: StoreConfig) -> Self {
        let supervisor = ConnectionSupervisor::new(config);
        supervisor.initialize().await;
        Self::assemble(supervisor)
    }

    /// Build a runtime directly on the fallback emulation, skipping the
    /// remote connect entirely. Useful for tests and embedded setups.
    pub fn fallback(config: StoreConfig) -> Self {
        let supervisor = ConnectionSupervisor::new(config);
        supervisor.enable_fallback();
        Self::assemble(supervisor)
    }

    fn assemble(supervisor: Arc<ConnectionSupervisor>) -> Self {
        let store = supervisor.store();
        Self {
            cache: Arc::new(Cache::new(Arc::clone(&store))),
            broker: Broker::new(store),
            supervisor,
        }
    }

    pub fn supervisor(&self) -> Arc<ConnectionSupervisor> {
        Arc::clone(&self.supervisor)
    }

    pub fn cache(&self) -> Arc<Cache> {
        Arc::clone(&self.cache)
    }

    pub fn broker(&self) -> Arc<Broker> {
        Arc::clone(&self.broker)
    }

    pub async fn health_check(&self) -> HealthReport {
        self.supervisor.health_check().await
    }

    /// Halt worker loops and subscriptions first, then release the
    /// connection (or clear the emulation).
    pub async fn shutdown(&self) {
        self.broker.shutdown().await;
        self.supervisor.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::ConnectionState;
    use serde_json::json;
    use std::time::Duration;

    fn unreachable_config() -> StoreConfig {
        StoreConfig {
            port: 1,
            connect_timeout: Duration::from_millis(300),
            max_connect_retries: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_initialize_unreachable_ends_in_fallback() {
        let runtime = Runtime::initialize(unreachable_config()).await;
        assert_eq!(runtime.supervisor().state(), ConnectionState::Fallback);

        // Cache and broker share the degraded store
        assert!(runtime.cache().set("k", &json!(1), None).await);
        let report = runtime.health_check().await;
        assert_eq!(report.mode, "fallback");
        assert_eq!(report.fallback_items, Some(1));
    }

    #[tokio::test]
    async fn test_shutdown_leaves_disconnected() {
        let runtime = Runtime::fallback(unreachable_config());
        runtime.cache().set("k", &json!(1), None).await;
        runtime.shutdown().await;
        assert_eq!(runtime.supervisor().state(), ConnectionState::Disconnected);
        assert_eq!(runtime.cache().get("k").await, None);
    }
}
