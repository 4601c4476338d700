//! Shutdown idempotence, the metrics text format, and the concurrent
//! single-slot creation race.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use respool::{Adapter, NativeHandle, PoolConfig, PoolEngine, PoolError, PoolResult, ResourceHandle};

#[derive(Clone, Default)]
struct Config;

#[derive(Default)]
struct SlowCreateAdapter {
    created: Arc<AtomicU32>,
    terminated: Arc<AtomicU32>,
}

impl Adapter for SlowCreateAdapter {
    type Config = Config;
    const TYPE_TAG: &'static str = "slow";

    fn check_config(&self, _config: &Self::Config) -> PoolResult<()> {
        Ok(())
    }

    async fn create(
        &self,
        _port: u16,
        _name: String,
        _config: &Self::Config,
    ) -> PoolResult<NativeHandle> {
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(NativeHandle::Container { id: "slow".into() })
    }

    async fn terminate(&self, _handle: &mut ResourceHandle) {
        self.terminated.fetch_add(1, Ordering::SeqCst);
    }

    async fn liveness(&self, _handle: &ResourceHandle) -> bool {
        true
    }
}

fn quiet_config(max: usize) -> PoolConfig {
    PoolConfig {
        max_pool_size: max,
        min_pool_size: 0,
        pool_check_interval: Duration::from_secs(3600),
        monitor_interval: Duration::from_secs(3600),
    }
}

#[tokio::test]
async fn shutdown_is_idempotent() {
    let engine = PoolEngine::new(SlowCreateAdapter::default(), quiet_config(1), None, "t");
    engine.acquire(&Config).await.unwrap();

    engine.shutdown().await;
    engine.shutdown().await;
    engine.shutdown().await;

    let info = engine.pool_info().await;
    assert_eq!(info.size, 0);
    assert!(info.shutting_down);

    let err = engine.acquire(&Config).await.unwrap_err();
    assert!(matches!(err, PoolError::ShuttingDown));
}

#[tokio::test]
async fn metrics_text_has_the_documented_lines() {
    let engine = PoolEngine::new(SlowCreateAdapter::default(), quiet_config(2), None, "metrics-mgr");
    engine.acquire(&Config).await.unwrap();

    let text = engine.metrics_text();
    for name in [
        "requests_total",
        "hits_total",
        "misses_total",
        "additions_total",
        "evictions_total",
        "removals_total",
        "size",
    ] {
        assert!(
            text.contains(&format!("serverless_manager_pool_{name}")),
            "missing metric line for {name} in:\n{text}"
        );
    }
    assert!(text.contains("resource_type=\"slow\",manager=\"metrics-mgr\""));

    engine.shutdown().await;
}

#[tokio::test]
async fn concurrent_acquire_at_max_one_admits_exactly_once() {
    let created = Arc::new(AtomicU32::new(0));
    let terminated = Arc::new(AtomicU32::new(0));
    let adapter = SlowCreateAdapter {
        created: Arc::clone(&created),
        terminated: Arc::clone(&terminated),
    };
    let engine = PoolEngine::new(adapter, quiet_config(1), None, "t");

    let (a, b) = tokio::join!(engine.acquire(&Config), engine.acquire(&Config));
    let a = a.unwrap();
    let b = b.unwrap();

    // Both callers got a resource (selection falls back once the winner is
    // admitted), and exactly one ended up in the pool.
    let names: HashSet<String> = [a.name, b.name].into_iter().collect();
    assert!(names.len() <= 2);
    assert_eq!(engine.pool_info().await.size, 1);
    assert_eq!(engine.pool_info().await.metrics.additions, 1);

    // One creation raced and lost: it was created then immediately
    // terminated without ever being admitted.
    assert_eq!(created.load(Ordering::SeqCst), terminated.load(Ordering::SeqCst) + 1);

    engine.shutdown().await;
}
