//! The backend-specific adapter contract.
//!
//! One [`PoolEngine`](crate::engine::PoolEngine) is generic over exactly one
//! `Adapter` implementation — heterogeneous pools are a non-goal, so the
//! trait is plain (not `dyn`-safe) and methods are written in `bb8`-style
//! return-position `impl Future`, matching the core `Resource` trait this
//! engine is grounded on.

use std::future::Future;
use std::time::Duration;

use crate::error::PoolResult;
use crate::handle::{NativeHandle, ResourceHandle, UsageSample};

/// Adapter-specific configuration passed through `acquire`.
///
/// Implementors validate their own mandatory fields (e.g. a script path must
/// exist and be readable) and return [`PoolError::BadConfig`](crate::error::PoolError::BadConfig)
/// from [`Adapter::check_config`] when violated.
pub trait AdapterConfig: Send + Sync + Clone + 'static {}

impl<T: Send + Sync + Clone + 'static> AdapterConfig for T {}

/// The contract every resource-kind backend implements.
pub trait Adapter: Send + Sync + 'static {
    /// Adapter-specific configuration type threaded through `create`.
    type Config: AdapterConfig;

    /// The resource-type tag: `"worker"`, `"process"`, `"container"`, or `"pod"`.
    const TYPE_TAG: &'static str;

    /// Validate that `config` carries everything this adapter needs.
    ///
    /// Called before every `acquire`, independent of whether creation will
    /// actually happen this call (the precondition must hold even when the
    /// pool is merely being read from).
    fn check_config(&self, config: &Self::Config) -> PoolResult<()>;

    /// Create a new resource bound to `port`/`name`.
    ///
    /// Must complete within the caller's creation deadline; on timeout the
    /// caller aborts the future, at which point the adapter's own drop glue
    /// (or a subsequent orphan sweep) is responsible for not leaking the
    /// partially-created resource. Adapters that spawn a background task or
    /// child process should tie its lifetime to something droppable so an
    /// aborted `create` future cannot leave an orphan.
    fn create(
        &self,
        port: u16,
        name: String,
        config: &Self::Config,
    ) -> impl Future<Output = PoolResult<NativeHandle>> + Send;

    /// Attempt graceful termination, falling back to a forceful one.
    ///
    /// Idempotent: terminating an already-gone resource is success, not an error.
    fn terminate(&self, handle: &mut ResourceHandle) -> impl Future<Output = ()> + Send;

    /// Cheap liveness probe. Any failure is treated as "not alive".
    fn liveness(&self, handle: &ResourceHandle) -> impl Future<Output = bool> + Send;

    /// Optional one-shot CPU/memory sample. `None` if unavailable right now.
    fn usage(&self, handle: &ResourceHandle) -> impl Future<Output = Option<UsageSample>> + Send {
        async { None }
    }

    /// Adapter-wide teardown invoked once, from `PoolEngine::shutdown`.
    fn on_shutdown(&self) -> impl Future<Output = ()> + Send {
        async {}
    }

    /// Deadline `PoolEngine` enforces around `create`. Per-kind defaults
    /// match the spec's table (30s for Worker/Process/Container, 60s Pod);
    /// adapters override by reading their own `Config`.
    fn creation_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Deadline `PoolEngine` allows an adapter's own graceful-stop attempt
    /// inside `terminate` before it must fall back to a forceful one.
    fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(5)
    }
}
