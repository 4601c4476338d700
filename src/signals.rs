//! One-shot OS signal wiring so every manager has exactly one shutdown path.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Registers interrupt/terminate/exit-intent hooks on construction and
/// guarantees the attached callback runs at most once.
///
/// Each [`PoolEngine`](crate::engine::PoolEngine) owns one of these; there is
/// no process-wide signal registry, so multiple engines in one process each
/// install and detach their own listener independently.
pub struct LifecycleCoordinator {
    listener: Option<JoinHandle<()>>,
    /// Cooperative "exit-intent" trigger: call `.cancel()` to request
    /// shutdown without an actual OS signal (there is no POSIX equivalent of
    /// Node's `beforeExit`).
    pub exit_intent: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl LifecycleCoordinator {
    /// Spawn the signal-listening task. `on_shutdown` runs exactly once, the
    /// first time SIGINT, SIGTERM, or `exit_intent` fires.
    pub fn spawn<F>(on_shutdown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let exit_intent = CancellationToken::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_task = Arc::clone(&fired);
        let exit_intent_task = exit_intent.clone();

        let listener = tokio::spawn(async move {
            #[cfg(unix)]
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            {
                Ok(s) => s,
                Err(_) => return,
            };

            #[cfg(unix)]
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
                () = exit_intent_task.cancelled() => {}
            }

            #[cfg(not(unix))]
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                () = exit_intent_task.cancelled() => {}
            }

            if !fired_task.swap(true, Ordering::SeqCst) {
                on_shutdown();
            }
        });

        Self {
            listener: Some(listener),
            exit_intent,
            fired,
        }
    }

    /// Whether the shutdown callback has already run.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    /// Detach the signal listener so repeated signals after an explicit
    /// `shutdown()` call cannot re-enter the callback.
    pub fn detach(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
        self.fired.store(true, Ordering::SeqCst);
    }
}

impl Drop for LifecycleCoordinator {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[tokio::test]
    async fn exit_intent_triggers_callback_once() {
        let count = Arc::new(AtomicU32::new(0));
        let count_cb = Arc::clone(&count);
        let coordinator = LifecycleCoordinator::spawn(move || {
            count_cb.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.exit_intent.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(coordinator.has_fired());
    }

    #[tokio::test]
    async fn detach_prevents_late_exit_intent_firing_callback() {
        let count = Arc::new(AtomicU32::new(0));
        let count_cb = Arc::clone(&count);
        let mut coordinator = LifecycleCoordinator::spawn(move || {
            count_cb.fetch_add(1, Ordering::SeqCst);
        });

        coordinator.detach();
        coordinator.exit_intent.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
