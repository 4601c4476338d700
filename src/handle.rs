//! The pooled resource record and its backend-specific payload.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// A single CPU/memory sample taken by an adapter's usage probe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UsageSample {
    /// CPU utilization, as a percentage (0.0–100.0, may exceed 100 on multi-core workloads).
    pub cpu_percent: f64,
    /// Resident memory in bytes. `0` where the adapter cannot measure it (see `Worker`).
    pub memory_bytes: u64,
    /// Wall-clock epoch ms when this sample was taken.
    pub sampled_at: i64,
}

/// Backend-specific payload carried by a [`ResourceHandle`].
///
/// A tagged union rather than `Box<dyn Any>`: the engine never inspects this,
/// but each adapter's `match` over its own variant is exhaustive and total.
pub enum NativeHandle {
    /// In-process worker: the task running the isolated execution context,
    /// plus a token to request cooperative shutdown.
    Worker {
        /// Join handle for the spawned task.
        task: tokio::task::JoinHandle<()>,
        /// Cooperative cancellation token observed by the task's run loop.
        cancel: CancellationToken,
        /// Busy-time accumulator (nanoseconds) used to derive CPU%.
        busy_ns: std::sync::Arc<std::sync::atomic::AtomicU64>,
        /// `(sampled_at_ms, busy_ns)` as of the previous `usage()` call, so
        /// CPU% reflects utilization since the last sample rather than a
        /// lifetime average since creation.
        last_sample: std::sync::Arc<parking_lot::Mutex<(i64, u64)>>,
    },
    /// OS child process.
    ///
    /// The `Child` itself lives inside the task spawned by `create` (so that
    /// a single task owns both the exit-wait and the kill request); this
    /// variant only carries what the rest of the engine needs without `&mut`
    /// access to that task.
    Process {
        /// Cooperative stop request observed by the task that owns the child;
        /// cancelling it triggers a graceful-then-forceful kill.
        cancel: CancellationToken,
        /// Flipped once the child has exited, by itself or via `cancel`.
        exited: std::sync::Arc<std::sync::atomic::AtomicBool>,
        /// OS process id, cached since `Child::id()` returns `None` after exit.
        pid: u32,
    },
    /// Local container daemon container.
    Container {
        /// Container id as reported by the daemon.
        id: String,
    },
    /// Remote cluster pod.
    Pod {
        /// Cluster namespace the pod was created in.
        namespace: String,
        /// Pod name within that namespace.
        pod_name: String,
        /// Port-forwarder task, if one is currently running.
        forwarder: Option<tokio::task::JoinHandle<()>>,
    },
}

impl std::fmt::Debug for NativeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker { .. } => f.debug_struct("Worker").finish_non_exhaustive(),
            Self::Process { pid, exited, .. } => f
                .debug_struct("Process")
                .field("pid", pid)
                .field("exited", &exited.load(std::sync::atomic::Ordering::Relaxed))
                .finish(),
            Self::Container { id } => f.debug_struct("Container").field("id", id).finish(),
            Self::Pod {
                namespace,
                pod_name,
                ..
            } => f
                .debug_struct("Pod")
                .field("namespace", namespace)
                .field("pod_name", pod_name)
                .finish(),
        }
    }
}

/// The engine's record for one pooled resource.
///
/// `name` is assigned once at creation (`<type>-<port>-<createdAtEpochMs>`)
/// and never changes; `last_used` is the only field the engine mutates after
/// admission (on each successful selection).
#[derive(Debug)]
pub struct ResourceHandle {
    /// Unique identifier: `<type>-<port>-<createdAtEpochMs>`.
    pub name: String,
    /// TCP port the resource is reachable on (0 if not applicable).
    pub port: u16,
    /// Wall-clock epoch ms at successful creation.
    pub created_at: i64,
    /// Wall-clock epoch ms, bumped on successful selection.
    pub last_used: i64,
    /// Backend-specific payload, opaque to the engine.
    pub native: NativeHandle,
    /// Most recent usage sample, if the monitoring timer has run at least once.
    pub usage: Option<UsageSample>,
    /// Opaque scratch space used by adapters (e.g. a previous CPU-time sample).
    pub adapter_state: AdapterState,
}

/// Adapter-private scratch data carried alongside a handle.
///
/// Kept as an explicit enum (rather than `Box<dyn Any>`) for the same reason
/// as `NativeHandle`: adapters match on their own variant exhaustively. No
/// adapter currently needs cross-call scratch state that can't live on its
/// own `NativeHandle` variant (Worker's `busy_ns`, Process's `sysinfo`
/// handle inside the adapter itself); kept as an extension point.
#[derive(Debug, Default, Clone, Copy)]
pub enum AdapterState {
    /// No scratch data needed.
    #[default]
    None,
}

impl ResourceHandle {
    /// Build the canonical handle name for a newly created resource.
    pub fn make_name(type_tag: &str, port: u16, created_at_ms: i64) -> String {
        format!("{type_tag}-{port}-{created_at_ms}")
    }

    /// Current wall-clock epoch milliseconds.
    #[must_use]
    pub fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// How long this handle has been idle, relative to `now_ms`.
    #[must_use]
    pub fn idle_for(&self, now_ms: i64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.last_used).max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_name_matches_expected_format() {
        assert_eq!(
            ResourceHandle::make_name("worker", 8080, 1_700_000_000_000),
            "worker-8080-1700000000000"
        );
    }

    #[test]
    fn idle_for_is_zero_when_just_used() {
        let handle = ResourceHandle {
            name: "process-9000-1".into(),
            port: 9000,
            created_at: 1,
            last_used: 1_000,
            native: NativeHandle::Container { id: "c1".into() },
            usage: None,
            adapter_state: AdapterState::None,
        };
        assert_eq!(handle.idle_for(1_000), Duration::from_millis(0));
        assert_eq!(handle.idle_for(1_500), Duration::from_millis(500));
    }
}
