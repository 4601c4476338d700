//! OS-process adapter: spawns an interpreter subprocess per resource.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::adapter::Adapter;
use crate::config::ProcessConfig;
use crate::error::{PoolError, PoolResult};
use crate::handle::{NativeHandle, ResourceHandle, UsageSample};

/// Pools OS child processes, one interpreter invocation per resource.
///
/// The port and resource name are handed to the child through its
/// environment (`RESPOOL_PORT`, `RESPOOL_RESOURCE_NAME`); it is the
/// interpreter entrypoint's job to bind that port.
///
/// `terminate` is graceful-then-forceful: the task that owns the child
/// sends it a polite stop signal and races `child.wait()` against
/// `shutdown_timeout`, only calling `start_kill` (`SIGKILL`) if the
/// deadline passes first.
///
/// `sys` is the teacher's own `SYSINFO_SYSTEM`-style shared handle
/// (`nebula-system/src/info.rs`), scoped per-adapter instead of process-wide
/// since this crate has no equivalent global registry.
pub struct ProcessAdapter {
    sys: RwLock<System>,
}

impl ProcessAdapter {
    /// Build a fresh adapter with an empty process table (populated lazily
    /// by `usage()`'s own `refresh_processes` calls).
    #[must_use]
    pub fn new() -> Self {
        Self {
            sys: RwLock::new(System::new()),
        }
    }
}

impl Default for ProcessAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ProcessAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessAdapter").finish_non_exhaustive()
    }
}

impl Adapter for ProcessAdapter {
    type Config = ProcessConfig;
    const TYPE_TAG: &'static str = "process";

    fn check_config(&self, config: &Self::Config) -> PoolResult<()> {
        config.scripts.check()
    }

    async fn create(
        &self,
        port: u16,
        name: String,
        config: &Self::Config,
    ) -> PoolResult<NativeHandle> {
        let dir = config
            .scripts
            .script_dir_path
            .clone()
            .unwrap_or_else(|| ".".to_string());
        let entry = config.scripts.script_files.first().cloned().unwrap_or_default();

        let mut child = Command::new(&config.interpreter)
            .arg(&entry)
            .current_dir(&dir)
            .env("RESPOOL_PORT", port.to_string())
            .env("RESPOOL_RESOURCE_NAME", &name)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| PoolError::CreationFailure {
                resource_type: Self::TYPE_TAG,
                reason: format!("spawning '{} {entry}': {e}", config.interpreter),
            })?;

        let pid = child.id().ok_or_else(|| PoolError::CreationFailure {
            resource_type: Self::TYPE_TAG,
            reason: "child exited before its pid could be read".to_string(),
        })?;

        let cancel = CancellationToken::new();
        let exited = Arc::new(AtomicBool::new(false));
        let task_cancel = cancel.clone();
        let task_exited = Arc::clone(&exited);
        let shutdown_timeout = self.shutdown_timeout();

        tokio::spawn(async move {
            tokio::select! {
                _ = child.wait() => {}
                () = task_cancel.cancelled() => {
                    send_graceful_stop(pid);
                    if tokio::time::timeout(shutdown_timeout, child.wait()).await.is_err() {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                    }
                }
            }
            task_exited.store(true, Ordering::SeqCst);
        });

        Ok(NativeHandle::Process { cancel, exited, pid })
    }

    async fn terminate(&self, handle: &mut ResourceHandle) {
        let NativeHandle::Process { cancel, exited, .. } = &handle.native else {
            return;
        };
        if exited.load(Ordering::SeqCst) {
            return;
        }
        cancel.cancel();
        // The owning task runs the SIGTERM -> shutdown_timeout -> SIGKILL
        // sequence itself; this loop is a safety net against scheduler
        // delay, not the timeout authority, so it's given extra slack.
        let deadline = std::time::Instant::now() + self.shutdown_timeout() + std::time::Duration::from_secs(2);
        while !exited.load(Ordering::SeqCst) && std::time::Instant::now() < deadline {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }

    async fn liveness(&self, handle: &ResourceHandle) -> bool {
        matches!(&handle.native, NativeHandle::Process { exited, .. } if !exited.load(Ordering::SeqCst))
    }

    async fn usage(&self, handle: &ResourceHandle) -> Option<UsageSample> {
        let NativeHandle::Process { exited, pid, .. } = &handle.native else {
            return None;
        };
        if exited.load(Ordering::SeqCst) {
            return None;
        }
        let sys_pid = Pid::from_u32(*pid);
        let mut sys = self.sys.write();
        sys.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        let process = sys.process(sys_pid)?;
        Some(UsageSample {
            cpu_percent: f64::from(process.cpu_usage()),
            memory_bytes: process.memory(),
            sampled_at: ResourceHandle::now_ms(),
        })
    }
}

/// Ask `pid` to stop the polite way (`SIGTERM` on Unix) before the owning
/// task escalates to `Child::start_kill`'s `SIGKILL` on timeout.
///
/// Routed through a throwaway `sysinfo::System` rather than `libc::kill`
/// directly, since this crate forbids `unsafe_code`; best-effort, a process
/// that's already gone or a platform without signal support just falls
/// through to the hard kill once `shutdown_timeout` elapses.
fn send_graceful_stop(pid: u32) {
    let sys_pid = Pid::from_u32(pid);
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
    if let Some(process) = sys.process(sys_pid) {
        process.kill_with(Signal::Term);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScriptBundle;

    fn config() -> ProcessConfig {
        ProcessConfig {
            scripts: ScriptBundle {
                script_dir_path: Some(".".to_string()),
                script_files: vec!["index.js".to_string()],
            },
            interpreter: "true".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn check_config_requires_script_bundle() {
        let adapter = ProcessAdapter::new();
        assert!(adapter.check_config(&ProcessConfig::default()).is_err());
        assert!(adapter.check_config(&config()).is_ok());
    }

    #[tokio::test]
    async fn create_reports_alive_then_dead_after_exit() {
        let adapter = ProcessAdapter::new();
        let port = crate::port::allocate().unwrap();
        let handle = ResourceHandle {
            name: "process-test".to_string(),
            port,
            created_at: ResourceHandle::now_ms(),
            last_used: 0,
            native: adapter
                .create(port, "process-test".to_string(), &config())
                .await
                .unwrap(),
            usage: None,
            adapter_state: crate::handle::AdapterState::None,
        };

        // "true" exits immediately; give the wait task a moment to observe it.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!adapter.liveness(&handle).await);
    }
}
