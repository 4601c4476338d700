//! In-process worker adapter.
//!
//! Each resource is a plain Tokio task bound to its assigned port rather
//! than an OS process or external service — the cheapest resource kind the
//! engine manages. Grounded on the teacher's health-checker timer-loop shape
//! (`tokio::select!` between a cancellation signal and work), adapted here
//! to a per-resource listener loop instead of a shared interval.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex as SyncMutex;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::adapter::Adapter;
use crate::config::WorkerConfig;
use crate::error::{PoolError, PoolResult};
use crate::handle::{NativeHandle, ResourceHandle, UsageSample};

/// Pools in-process worker tasks.
///
/// What a worker actually does with an accepted connection — running the
/// configured script bundle against the request — is outside this engine's
/// concern; accepting and closing the connection is enough to prove the
/// listener, and therefore the resource, is alive.
#[derive(Debug, Default)]
pub struct WorkerAdapter;

impl Adapter for WorkerAdapter {
    type Config = WorkerConfig;
    const TYPE_TAG: &'static str = "worker";

    fn check_config(&self, config: &Self::Config) -> PoolResult<()> {
        config.scripts.check()
    }

    async fn create(
        &self,
        port: u16,
        name: String,
        config: &Self::Config,
    ) -> PoolResult<NativeHandle> {
        let listener =
            TcpListener::bind(("127.0.0.1", port))
                .await
                .map_err(|e| PoolError::CreationFailure {
                    resource_type: Self::TYPE_TAG,
                    reason: format!("binding worker listener on port {port}: {e}"),
                })?;

        let cancel = CancellationToken::new();
        let busy_ns = Arc::new(AtomicU64::new(0));
        let last_sample = Arc::new(SyncMutex::new((ResourceHandle::now_ms(), 0u64)));
        let task_cancel = cancel.clone();
        let task_busy = Arc::clone(&busy_ns);
        let scripts = config.scripts.script_files.clone();

        let task = tokio::spawn(async move {
            tracing::debug!(name = %name, ?scripts, "worker task started");
            loop {
                tokio::select! {
                    () = task_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let Ok((mut stream, _addr)) = accepted else { continue };
                        let start = Instant::now();
                        // Running the script bundle itself happens elsewhere; draining
                        // whatever the client already sent is the only work this loop
                        // does, bounded so a silent client can't stall the accept loop.
                        let mut buf = [0u8; 1024];
                        let _ = tokio::time::timeout(Duration::from_millis(50), stream.read(&mut buf)).await;
                        task_busy.fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
                    }
                }
            }
        });

        Ok(NativeHandle::Worker {
            task,
            cancel,
            busy_ns,
            last_sample,
        })
    }

    async fn terminate(&self, handle: &mut ResourceHandle) {
        let NativeHandle::Worker { task, cancel, .. } = &mut handle.native else {
            return;
        };
        cancel.cancel();
        if tokio::time::timeout(self.shutdown_timeout(), &mut *task)
            .await
            .is_err()
        {
            task.abort();
        }
    }

    async fn liveness(&self, handle: &ResourceHandle) -> bool {
        matches!(&handle.native, NativeHandle::Worker { task, .. } if !task.is_finished())
    }

    async fn usage(&self, handle: &ResourceHandle) -> Option<UsageSample> {
        let NativeHandle::Worker {
            busy_ns,
            last_sample,
            ..
        } = &handle.native
        else {
            return None;
        };
        let now = ResourceHandle::now_ms();
        let busy_now = busy_ns.load(Ordering::Relaxed);

        let mut last = last_sample.lock();
        let (last_at, last_busy) = *last;
        let elapsed_ns = (now - last_at).max(1) as u64 * 1_000_000;
        let busy_delta_ns = busy_now.saturating_sub(last_busy);
        *last = (now, busy_now);
        drop(last);

        Some(UsageSample {
            cpu_percent: (busy_delta_ns as f64 / elapsed_ns as f64) * 100.0,
            memory_bytes: 0,
            sampled_at: now,
        })
    }
}
