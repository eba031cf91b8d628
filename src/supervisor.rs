//! Connection supervision for the dual-mode store.
//!
//! Owns the remote connection lifecycle: bounded-retry connect with capped
//! backoff, a periodic liveness probe while connected, and sticky fallback
//! activation when the remote store cannot be reached. No other component
//! may change connection state.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::StoreConfig;
use crate::metrics::MetricsSnapshot;
use crate::store::{MemoryStore, RemoteStore, Store, StoreBackend};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state. Exactly one holds at a time; transitions are
/// serialized through the supervisor. `Fallback` is sticky until explicit
/// reinitialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Fallback,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Fallback => "fallback",
        }
    }
}

/// Lifecycle notifications for external observers (logging/alerting).
/// Not part of the correctness contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    Connected,
    FallbackActivated,
    HealthFailed,
    Shutdown,
}

/// Health probe result for external monitoring.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub mode: &'static str,
    pub latency_ms: Option<u64>,
    pub fallback_items: Option<usize>,
    pub counters: MetricsSnapshot,
}

pub struct ConnectionSupervisor {
    config: StoreConfig,
    store: Arc<Store>,
    state: RwLock<ConnectionState>,
    fallback: Mutex<Option<Arc<MemoryStore>>>,
    events: broadcast::Sender<LifecycleEvent>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionSupervisor {
    pub fn new(config: StoreConfig) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            config,
            store: Arc::new(Store::new()),
            state: RwLock::new(ConnectionState::Disconnected),
            fallback: Mutex::new(None),
            events,
            tasks: Mutex::new(Vec::new()),
        })
    }

    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }

    /// Attempt to establish the remote connection. On success starts the
    /// liveness probe; on bounded-retry exhaustion activates the fallback
    /// emulation. Returns the resulting state.
    pub async fn initialize(self: &Arc<Self>) -> ConnectionState {
        *self.state.write() = ConnectionState::Connecting;

        let attempts = self.config.max_connect_retries.max(1);
        for attempt in 1..=attempts {
            match tokio::time::timeout(
                self.config.connect_timeout,
                RemoteStore::connect(&self.config),
            )
            .await
            {
                Ok(Ok(remote)) => {
                    self.store.bind(Arc::new(remote));
                    *self.state.write() = ConnectionState::Connected;
                    self.emit(LifecycleEvent::Connected);
                    self.spawn_probe();
                    return ConnectionState::Connected;
                }
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "remote store connect failed");
                }
                Err(_) => {
                    warn!(
                        attempt,
                        timeout_ms = self.config.connect_timeout.as_millis() as u64,
                        "remote store connect timed out"
                    );
                }
            }
            if attempt < attempts {
                tokio::time::sleep(StoreConfig::retry_delay(attempt)).await;
            }
        }

        error!(
            attempts,
            host = %self.config.host,
            port = self.config.port,
            "remote store unreachable, activating fallback emulation"
        );
        self.enable_fallback();
        ConnectionState::Fallback
    }

    /// Activate the in-process emulation. Idempotent: repeated calls return
    /// the already-bound store without re-initializing fallback state.
    pub fn enable_fallback(self: &Arc<Self>) -> Arc<Store> {
        {
            let mut fallback = self.fallback.lock();
            if fallback.is_some() && *self.state.read() == ConnectionState::Fallback {
                return self.store();
            }

            self.halt_tasks();
            let memory = Arc::new(MemoryStore::new());
            self.store
                .bind(Arc::clone(&memory) as Arc<dyn StoreBackend>);
            *fallback = Some(memory);
            *self.state.write() = ConnectionState::Fallback;
        }

        info!("fallback emulation active");
        self.emit(LifecycleEvent::FallbackActivated);
        self.spawn_sweep();
        self.store()
    }

    /// Stop background tasks, release the active backend, and clear any
    /// fallback state. Safe to call from any state; always leaves the
    /// supervisor disconnected.
    pub async fn shutdown(&self) {
        self.halt_tasks();

        if let Some(memory) = self.fallback.lock().take() {
            memory.clear();
        }
        self.store.unbind();
        *self.state.write() = ConnectionState::Disconnected;
        self.emit(LifecycleEvent::Shutdown);
        info!("connection supervisor shut down");
    }

    /// Health probe for external monitoring: mode, round-trip latency when
    /// connected, emulation item count when degraded, and the cumulative
    /// operation counters.
    pub async fn health_check(&self) -> HealthReport {
        let state = self.state();

        let latency_ms = if state == ConnectionState::Connected {
            match self.store.backend() {
                Some(be) => {
                    let started = Instant::now();
                    match tokio::time::timeout(PROBE_TIMEOUT, be.ping()).await {
                        Ok(Ok(())) => Some(started.elapsed().as_millis() as u64),
                        _ => None,
                    }
                }
                None => None,
            }
        } else {
            None
        };

        let fallback_items = if state == ConnectionState::Fallback {
            Some(self.store.item_count().await)
        } else {
            None
        };

        HealthReport {
            mode: state.as_str(),
            latency_ms,
            fallback_items,
            counters: self.store.metrics().snapshot(),
        }
    }

    fn halt_tasks(&self) {
        for handle in self.tasks.lock().drain(..) {
            handle.abort();
        }
    }

    /// Periodic liveness probe. A failed round-trip demotes to
    /// disconnected and raises a health-failed signal; a later success
    /// re-promotes. Never runs in fallback mode.
    fn spawn_probe(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(supervisor.config.probe_interval);
            ticker.tick().await; // immediate first tick

            loop {
                ticker.tick().await;

                let state = supervisor.state();
                if state != ConnectionState::Connected && state != ConnectionState::Disconnected {
                    return;
                }
                let Some(be) = supervisor.store.backend() else {
                    return;
                };

                let healthy = matches!(
                    tokio::time::timeout(PROBE_TIMEOUT, be.ping()).await,
                    Ok(Ok(()))
                );

                if healthy {
                    if supervisor.state() == ConnectionState::Disconnected {
                        *supervisor.state.write() = ConnectionState::Connected;
                        supervisor.emit(LifecycleEvent::Connected);
                        info!("remote store probe recovered");
                    }
                } else if supervisor.state() == ConnectionState::Connected {
                    *supervisor.state.write() = ConnectionState::Disconnected;
                    supervisor.emit(LifecycleEvent::HealthFailed);
                    warn!("remote store probe failed");
                }
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Periodic expired-entry sweep for the fallback emulation. Lazy
    /// eviction on access covers correctness; the sweep bounds memory.
    fn spawn_sweep(self: &Arc<Self>) {
        let supervisor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = interval(supervisor.config.sweep_interval);
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let memory = supervisor.fallback.lock().clone();
                let Some(memory) = memory else { return };
                let swept = memory.sweep_expired();
                if swept > 0 {
                    debug!(swept, "fallback sweep evicted expired entries");
                }
            }
        });
        self.tasks.lock().push(handle);
    }
}
