//! `PoolEngine`: the generic acquisition/lifecycle orchestrator.
//!
//! One engine instance owns exactly one [`Adapter`] implementation and the
//! pool of [`ResourceHandle`]s it has created. Grounded on the teacher's
//! `pool/mod.rs` `Arc<PoolInner>` split (cheap `Clone`, shared state behind
//! one lock) and `manager.rs`'s timer-loop pattern for background upkeep.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;

use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::adapter::Adapter;
use crate::error::{PoolError, PoolResult};
use crate::handle::{AdapterState, NativeHandle, ResourceHandle, UsageSample};
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::config::PoolConfig;
use crate::port;
use crate::signals::LifecycleCoordinator;

/// Read-only projection of a just-acquired resource, handed back to the caller.
///
/// Ownership of the underlying [`ResourceHandle`] (and its native payload)
/// stays with the engine; callers only ever see this view.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquiredHandle {
    /// The handle's canonical name.
    pub name: String,
    /// TCP port the resource is reachable on.
    pub port: u16,
    /// Wall-clock epoch ms at creation.
    pub created_at: i64,
    /// Wall-clock epoch ms at the moment of this acquisition.
    pub last_used: i64,
}

impl From<&ResourceHandle> for AcquiredHandle {
    fn from(h: &ResourceHandle) -> Self {
        Self {
            name: h.name.clone(),
            port: h.port,
            created_at: h.created_at,
            last_used: h.last_used,
        }
    }
}

/// Read-only projection of one pooled resource, as returned by [`PoolEngine::pool_info`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectedHandle {
    /// The handle's canonical name.
    pub name: String,
    /// TCP port the resource is reachable on.
    pub port: u16,
    /// Wall-clock epoch ms at creation.
    pub created_at: i64,
    /// Wall-clock epoch ms at last selection.
    pub last_used: i64,
    /// Cheap, synchronous liveness hint for Worker/Process resources; `None`
    /// for Container/Pod, where liveness can only be known by probing.
    pub alive: Option<bool>,
    /// Container id, present only for Container resources.
    pub id: Option<String>,
    /// Most recent usage sample, if the monitoring timer has run.
    pub usage: Option<UsageSample>,
}

impl From<&ResourceHandle> for ProjectedHandle {
    fn from(h: &ResourceHandle) -> Self {
        let (alive, id) = match &h.native {
            NativeHandle::Worker { task, .. } => (Some(!task.is_finished()), None),
            NativeHandle::Process { exited, .. } => {
                (Some(!exited.load(Ordering::Relaxed)), None)
            }
            NativeHandle::Container { id } => (None, Some(id.clone())),
            NativeHandle::Pod { .. } => (None, None),
        };
        Self {
            name: h.name.clone(),
            port: h.port,
            created_at: h.created_at,
            last_used: h.last_used,
            alive,
            id,
            usage: h.usage,
        }
    }
}

/// Snapshot returned by [`PoolEngine::pool_info`].
#[derive(Debug, Clone, PartialEq)]
pub struct PoolInfo {
    /// Current number of pooled resources.
    pub size: usize,
    /// Configured upper bound.
    pub max: usize,
    /// Whether `shutdown` has been called (or is in progress).
    pub shutting_down: bool,
    /// Whether the idle-eviction watcher has been started.
    pub watcher_started: bool,
    /// Per-resource projections, in pool order.
    pub resources: Vec<ProjectedHandle>,
    /// Current counter values.
    pub metrics: MetricsSnapshot,
}

/// Result of [`PoolEngine::health_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthReport {
    /// Pool size observed at the start of the check.
    pub total: usize,
    /// Number of resources whose liveness probe failed and were removed.
    pub dead_removed: usize,
    /// `(size after removal > 0) || !shutting_down`.
    pub healthy: bool,
}

struct PoolState {
    resources: VecDeque<ResourceHandle>,
}

struct Inner<A: Adapter> {
    adapter: A,
    config: PoolConfig,
    pre_warm_config: Option<A::Config>,
    manager_name: String,
    state: AsyncMutex<PoolState>,
    metrics: MetricsRegistry,
    last_request_time: AtomicI64,
    shutting_down: AtomicBool,
    watcher_started: AtomicBool,
    monitor_started: AtomicBool,
    cancel: CancellationToken,
    eviction_handle: SyncMutex<Option<JoinHandle<()>>>,
    monitor_handle: SyncMutex<Option<JoinHandle<()>>>,
    signals: SyncMutex<Option<LifecycleCoordinator>>,
}

/// A pool of one resource kind, behind a single uniform acquisition API.
///
/// Cheap to clone (an `Arc` around the shared state); every background timer
/// and the signal listener hold their own clone, so the engine stays alive
/// exactly as long as something still references it or a caller still holds
/// the original handle.
pub struct PoolEngine<A: Adapter>(Arc<Inner<A>>);

impl<A: Adapter> Clone for PoolEngine<A> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<A: Adapter> PoolEngine<A> {
    /// Build a new engine around `adapter`. `pre_warm_config`, if given, is
    /// used to fill the pool up to `config.min_pool_size` on first use and
    /// after every idle eviction. Installs its own SIGINT/SIGTERM listener,
    /// calling `shutdown` exactly once.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn new(
        adapter: A,
        config: PoolConfig,
        pre_warm_config: Option<A::Config>,
        manager_name: impl Into<String>,
    ) -> Self {
        let inner = Arc::new(Inner {
            adapter,
            config: config.normalized(),
            pre_warm_config,
            manager_name: manager_name.into(),
            state: AsyncMutex::new(PoolState {
                resources: VecDeque::new(),
            }),
            metrics: MetricsRegistry::new(),
            last_request_time: AtomicI64::new(ResourceHandle::now_ms()),
            shutting_down: AtomicBool::new(false),
            watcher_started: AtomicBool::new(false),
            monitor_started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            eviction_handle: SyncMutex::new(None),
            monitor_handle: SyncMutex::new(None),
            signals: SyncMutex::new(None),
        });
        let engine = Self(inner);

        let shutdown_engine = engine.clone();
        let coordinator = LifecycleCoordinator::spawn(move || {
            let engine = shutdown_engine.clone();
            tokio::spawn(async move {
                engine.shutdown().await;
            });
        });
        *engine.0.signals.lock() = Some(coordinator);
        engine
    }

    /// Acquire a resource, creating one if there's room or falling back to
    /// round-robin selection over the existing pool. See the acquisition
    /// algorithm in the design notes for the full step sequence.
    pub async fn acquire(&self, config: &A::Config) -> PoolResult<AcquiredHandle> {
        if self.0.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        self.0.adapter.check_config(config)?;

        let now = ResourceHandle::now_ms();
        self.0.last_request_time.store(now, Ordering::SeqCst);

        self.start_pool_watcher().await;
        self.start_resource_monitoring().await;

        let have_room = { self.0.state.lock().await.resources.len() < self.0.config.max_pool_size };
        if have_room {
            match self.create_and_admit(config).await {
                Ok(Some(view)) => {
                    self.0.metrics.record_request();
                    self.0.metrics.record_hit();
                    return Ok(view);
                }
                Ok(None) => {
                    tracing::debug!(
                        resource_type = A::TYPE_TAG,
                        "pool filled during creation, falling back to selection"
                    );
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        resource_type = A::TYPE_TAG,
                        "creation failed, falling back to pool selection"
                    );
                }
            }
        }

        self.select(now).await
    }

    /// Create one resource and admit it to the pool if there's still room,
    /// terminating it instead if a concurrent caller won the race.
    ///
    /// Returns `Ok(None)` when the pool filled up while `create` was
    /// in flight (a lost race, not a failure).
    async fn create_and_admit(&self, config: &A::Config) -> PoolResult<Option<AcquiredHandle>> {
        let port = port::allocate().map_err(|e| PoolError::CreationFailure {
            resource_type: A::TYPE_TAG,
            reason: e.to_string(),
        })?;
        let created_at = ResourceHandle::now_ms();
        let name = ResourceHandle::make_name(A::TYPE_TAG, port, created_at);

        let timeout = self.0.adapter.creation_timeout();
        let native = match tokio::time::timeout(
            timeout,
            self.0.adapter.create(port, name.clone(), config),
        )
        .await
        {
            Ok(Ok(native)) => native,
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(PoolError::CreationTimeout {
                    resource_type: A::TYPE_TAG,
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        };

        let mut handle = ResourceHandle {
            name,
            port,
            created_at,
            last_used: created_at,
            native,
            usage: None,
            adapter_state: AdapterState::None,
        };
        let view = AcquiredHandle::from(&handle);

        let mut state = self.0.state.lock().await;
        if state.resources.len() < self.0.config.max_pool_size {
            state.resources.push_back(handle);
            let new_size = state.resources.len();
            drop(state);
            self.0.metrics.record_addition(new_size);
            Ok(Some(view))
        } else {
            drop(state);
            self.0.adapter.terminate(&mut handle).await;
            Ok(None)
        }
    }

    /// Round-robin selection with a liveness probe and single-retry dead-handle fallback.
    async fn select(&self, now_ms: i64) -> PoolResult<AcquiredHandle> {
        self.0.metrics.record_request();
        let now_seconds = (now_ms / 1000).max(0) as usize;

        let mut state = self.0.state.lock().await;
        if state.resources.is_empty() {
            drop(state);
            self.0.metrics.record_miss();
            return Err(PoolError::NoResource {
                resource_type: A::TYPE_TAG,
            });
        }

        let idx = now_seconds % state.resources.len();
        let alive = self.0.adapter.liveness(&state.resources[idx]).await;
        if alive {
            let handle = &mut state.resources[idx];
            handle.last_used = now_ms;
            let view = AcquiredHandle::from(&*handle);
            drop(state);
            self.0.metrics.record_hit();
            return Ok(view);
        }

        let mut dead = state.resources.remove(idx).expect("idx is in bounds");
        let new_size = state.resources.len();
        self.0.metrics.record_removal(new_size);
        let fallback = state.resources.front().map(AcquiredHandle::from);
        drop(state);

        self.0.adapter.terminate(&mut dead).await;

        match fallback {
            // A fallback acquisition still serves the caller a live handle,
            // so it counts as a hit, not neither — keeps hits + misses == requests.
            Some(handle) => {
                self.0.metrics.record_hit();
                Ok(handle)
            }
            None => Err(PoolError::NoResource {
                resource_type: A::TYPE_TAG,
            }),
        }
    }

    /// Start the idle-eviction timer (idempotent). Pre-warms up to
    /// `min_pool_size` the first time it runs.
    pub async fn start_pool_watcher(&self) {
        if self.0.watcher_started.swap(true, Ordering::SeqCst) {
            return;
        }
        self.replenish_to_min().await;

        let engine = self.clone();
        let cancel = self.0.cancel.clone();
        let interval = self.0.config.pool_check_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        engine.eviction_tick().await;
                    }
                }
            }
        });
        *self.0.eviction_handle.lock() = Some(handle);
    }

    /// Start the usage-sampling timer (idempotent).
    pub async fn start_resource_monitoring(&self) {
        if self.0.monitor_started.swap(true, Ordering::SeqCst) {
            return;
        }
        let engine = self.clone();
        let cancel = self.0.cancel.clone();
        let interval = self.0.config.monitor_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        engine.monitor_tick().await;
                    }
                }
            }
        });
        *self.0.monitor_handle.lock() = Some(handle);
    }

    async fn eviction_tick(&self) {
        if self.0.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let now = ResourceHandle::now_ms();
        let last_request = self.0.last_request_time.load(Ordering::SeqCst);
        let idle_for_ms = now.saturating_sub(last_request);
        let threshold_ms = self.0.config.pool_check_interval.as_millis() as i64;

        let evicted = {
            let mut state = self.0.state.lock().await;
            if state.resources.is_empty() || idle_for_ms <= threshold_ms {
                None
            } else {
                state.resources.pop_front()
            }
        };

        if let Some(mut handle) = evicted {
            let new_size = self.0.state.lock().await.resources.len();
            self.0.metrics.record_eviction(new_size);
            tracing::debug!(name = %handle.name, "evicting idle resource");
            self.0.adapter.terminate(&mut handle).await;
        }

        self.replenish_to_min().await;
    }

    async fn replenish_to_min(&self) {
        if self.0.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        let Some(config) = self.0.pre_warm_config.clone() else {
            return;
        };
        loop {
            let size = self.0.state.lock().await.resources.len();
            if size >= self.0.config.min_pool_size {
                break;
            }
            if let Err(err) = self.create_and_admit(&config).await {
                tracing::warn!(error = %err, resource_type = A::TYPE_TAG, "pre-warm creation failed");
                break;
            }
        }
    }

    async fn monitor_tick(&self) {
        let names: Vec<String> = {
            self.0
                .state
                .lock()
                .await
                .resources
                .iter()
                .map(|h| h.name.clone())
                .collect()
        };
        for name in names {
            let sample = {
                let state = self.0.state.lock().await;
                let Some(handle) = state.resources.iter().find(|h| h.name == name) else {
                    continue;
                };
                self.0.adapter.usage(handle).await
            };
            if let Some(sample) = sample {
                let mut state = self.0.state.lock().await;
                if let Some(handle) = state.resources.iter_mut().find(|h| h.name == name) {
                    handle.usage = Some(sample);
                }
            }
        }
    }

    /// Probe liveness for every pooled resource, removing and terminating
    /// any whose probe fails.
    pub async fn health_check(&self) -> HealthReport {
        let mut state = self.0.state.lock().await;
        let total = state.resources.len();

        let mut dead_indices = Vec::new();
        for (i, handle) in state.resources.iter().enumerate() {
            if !self.0.adapter.liveness(handle).await {
                dead_indices.push(i);
            }
        }

        let mut removed = Vec::new();
        for &i in dead_indices.iter().rev() {
            if let Some(handle) = state.resources.remove(i) {
                removed.push(handle);
            }
        }
        let new_size = state.resources.len();
        let shutting_down = self.0.shutting_down.load(Ordering::SeqCst);
        drop(state);

        let dead_removed = removed.len();
        for (i, mut handle) in removed.into_iter().enumerate() {
            self.0.metrics.record_removal(total - (i + 1));
            self.0.adapter.terminate(&mut handle).await;
        }
        if dead_removed > 0 {
            self.0.metrics.set_size(new_size);
        }

        HealthReport {
            total,
            dead_removed,
            healthy: new_size > 0 || !shutting_down,
        }
    }

    /// Read-only snapshot of pool membership and counters.
    pub async fn pool_info(&self) -> PoolInfo {
        let state = self.0.state.lock().await;
        let resources = state.resources.iter().map(ProjectedHandle::from).collect();
        let size = state.resources.len();
        drop(state);
        PoolInfo {
            size,
            max: self.0.config.max_pool_size,
            shutting_down: self.0.shutting_down.load(Ordering::SeqCst),
            watcher_started: self.0.watcher_started.load(Ordering::SeqCst),
            resources,
            metrics: self.0.metrics.snapshot(),
        }
    }

    /// Render the manager's current counters in the Prometheus-style text format.
    #[must_use]
    pub fn metrics_text(&self) -> String {
        self.0.metrics.to_text(A::TYPE_TAG, &self.0.manager_name)
    }

    /// Idempotently drain and terminate every pooled resource, stop both
    /// background timers, detach the signal listener, and call the
    /// adapter's own teardown hook.
    pub async fn shutdown(&self) {
        if self.0.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.0.cancel.cancel();

        if let Some(handle) = self.0.eviction_handle.lock().take() {
            handle.abort();
        }
        if let Some(handle) = self.0.monitor_handle.lock().take() {
            handle.abort();
        }

        let drained: Vec<ResourceHandle> = {
            let mut state = self.0.state.lock().await;
            state.resources.drain(..).collect()
        };
        for mut handle in drained {
            self.0.adapter.terminate(&mut handle).await;
        }
        self.0.metrics.set_size(0);

        if let Some(mut signals) = self.0.signals.lock().take() {
            signals.detach();
        }

        self.0.adapter.on_shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PoolError;
    use std::sync::atomic::AtomicU32;

    #[derive(Clone, Default)]
    struct FakeConfig {
        fail_create: bool,
    }

    #[derive(Default)]
    struct FakeAdapter {
        created: AtomicU32,
        terminated: AtomicU32,
    }

    impl Adapter for FakeAdapter {
        type Config = FakeConfig;
        const TYPE_TAG: &'static str = "fake";

        fn check_config(&self, _config: &Self::Config) -> PoolResult<()> {
            Ok(())
        }

        async fn create(
            &self,
            _port: u16,
            _name: String,
            config: &Self::Config,
        ) -> PoolResult<NativeHandle> {
            if config.fail_create {
                return Err(PoolError::CreationFailure {
                    resource_type: Self::TYPE_TAG,
                    reason: "forced failure".into(),
                });
            }
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(NativeHandle::Container { id: "fake".into() })
        }

        async fn terminate(&self, _handle: &mut ResourceHandle) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }

        async fn liveness(&self, _handle: &ResourceHandle) -> bool {
            true
        }

        fn creation_timeout(&self) -> Duration {
            Duration::from_millis(200)
        }
    }

    fn test_config() -> PoolConfig {
        PoolConfig {
            max_pool_size: 2,
            min_pool_size: 0,
            pool_check_interval: Duration::from_secs(3600),
            monitor_interval: Duration::from_secs(3600),
        }
    }

    #[tokio::test]
    async fn acquire_creates_up_to_max_pool_size() {
        let engine = PoolEngine::new(FakeAdapter::default(), test_config(), None, "t");
        let a = engine.acquire(&FakeConfig::default()).await.unwrap();
        let b = engine.acquire(&FakeConfig::default()).await.unwrap();
        assert_ne!(a.name, b.name);

        let info = engine.pool_info().await;
        assert_eq!(info.size, 2);
        assert_eq!(info.metrics.additions, 2);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn acquire_rejects_after_shutdown() {
        let engine = PoolEngine::new(FakeAdapter::default(), test_config(), None, "t");
        engine.shutdown().await;
        let err = engine.acquire(&FakeConfig::default()).await.unwrap_err();
        assert!(matches!(err, PoolError::ShuttingDown));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_drains_pool() {
        let adapter = FakeAdapter::default();
        let engine = PoolEngine::new(adapter, test_config(), None, "t");
        engine.acquire(&FakeConfig::default()).await.unwrap();
        engine.shutdown().await;
        engine.shutdown().await;
        let info = engine.pool_info().await;
        assert_eq!(info.size, 0);
    }

    #[tokio::test]
    async fn acquire_falls_back_to_selection_when_max_is_zero() {
        let config = PoolConfig {
            max_pool_size: 0,
            ..test_config()
        };
        let engine = PoolEngine::new(FakeAdapter::default(), config, None, "t");
        let err = engine.acquire(&FakeConfig::default()).await.unwrap_err();
        assert!(matches!(err, PoolError::NoResource { .. }));
    }

    #[tokio::test]
    async fn creation_failure_falls_back_to_selection() {
        let engine = PoolEngine::new(FakeAdapter::default(), test_config(), None, "t");
        engine.acquire(&FakeConfig::default()).await.unwrap();
        let err = engine
            .acquire(&FakeConfig {
                fail_create: true,
            })
            .await;
        // max_pool_size is 2, so this should still create rather than select.
        assert!(err.is_ok());
    }

    #[tokio::test]
    async fn health_check_reports_healthy_when_pool_has_live_resources() {
        let engine = PoolEngine::new(FakeAdapter::default(), test_config(), None, "t");
        engine.acquire(&FakeConfig::default()).await.unwrap();
        let report = engine.health_check().await;
        assert_eq!(report.total, 1);
        assert_eq!(report.dead_removed, 0);
        assert!(report.healthy);
    }

    #[tokio::test]
    async fn metrics_text_reflects_manager_and_resource_type() {
        let engine = PoolEngine::new(FakeAdapter::default(), test_config(), None, "mgr-a");
        engine.acquire(&FakeConfig::default()).await.unwrap();
        let text = engine.metrics_text();
        assert!(text.contains("resource_type=\"fake\",manager=\"mgr-a\""));
    }
}
