//! Boundary cases from the acquisition algorithm's testable properties:
//! a zero-sized pool, and `min_pool_size` clamping.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use respool::{Adapter, NativeHandle, PoolConfig, PoolEngine, PoolError, PoolResult, ResourceHandle};

#[derive(Clone, Default)]
struct Config;

#[derive(Default)]
struct CountingAdapter {
    creates: Arc<AtomicU32>,
}

impl Adapter for CountingAdapter {
    type Config = Config;
    const TYPE_TAG: &'static str = "boundary";

    fn check_config(&self, _config: &Self::Config) -> PoolResult<()> {
        Ok(())
    }

    async fn create(
        &self,
        _port: u16,
        _name: String,
        _config: &Self::Config,
    ) -> PoolResult<NativeHandle> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(NativeHandle::Container {
            id: "boundary".into(),
        })
    }

    async fn terminate(&self, _handle: &mut ResourceHandle) {}

    async fn liveness(&self, _handle: &ResourceHandle) -> bool {
        true
    }
}

fn quiet_config(max: usize, min: usize) -> PoolConfig {
    PoolConfig {
        max_pool_size: max,
        min_pool_size: min,
        pool_check_interval: Duration::from_secs(3600),
        monitor_interval: Duration::from_secs(3600),
    }
}

#[tokio::test]
async fn max_pool_size_zero_never_creates() {
    let creates = Arc::new(AtomicU32::new(0));
    let adapter = CountingAdapter {
        creates: Arc::clone(&creates),
    };
    let engine = PoolEngine::new(adapter, quiet_config(0, 0), None, "t");

    let err = engine.acquire(&Config).await.unwrap_err();
    assert!(matches!(err, PoolError::NoResource { .. }));
    assert_eq!(creates.load(Ordering::SeqCst), 0);

    engine.shutdown().await;
}

#[tokio::test]
async fn min_pool_size_greater_than_max_is_clamped() {
    let adapter = CountingAdapter::default();
    let engine = PoolEngine::new(adapter, quiet_config(2, 10), None, "t");

    // start_pool_watcher would try to pre-warm to min_pool_size; since it's
    // clamped to max_pool_size (2) and there's no pre_warm_config, it's a
    // no-op rather than looping forever trying to reach an unreachable 10.
    engine.start_pool_watcher().await;
    let info = engine.pool_info().await;
    assert_eq!(info.max, 2);
    assert_eq!(info.size, 0);

    engine.shutdown().await;
}
