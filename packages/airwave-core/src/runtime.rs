//! Background task spawning.
//!
//! Core services spawn their housekeeping through [`TaskSpawner`] instead of
//! calling `tokio::spawn` directly, so an embedder can route the work onto
//! its own runtime.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Abstraction for spawning background tasks.
///
/// Implementations should let a task run to completion even if the spawner
/// itself is dropped.
pub trait TaskSpawner: Send + Sync {
    /// Spawns a future as a detached background task.
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Tokio-based spawner.
#[derive(Clone)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioSpawner {
    /// Creates a new `TokioSpawner` with the given runtime handle.
    #[must_use]
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Creates a new `TokioSpawner` using the current runtime's handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    #[must_use]
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::current(),
        }
    }
}

impl TaskSpawner for TokioSpawner {
    fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handle.spawn(future);
    }
}

/// Runs `tick` every `period` until `cancel` fires.
///
/// The first run happens one full period after spawning. Late ticks are
/// delayed rather than bunched up.
pub fn spawn_periodic<S, F>(
    spawner: &S,
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    mut tick: F,
) where
    S: TaskSpawner,
    F: FnMut() + Send + 'static,
{
    spawner.spawn(async move {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    log::debug!("[Runtime] {} stopped", name);
                    break;
                }
                _ = interval.tick() => tick(),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tokio_spawner_executes_task() {
        let spawner = TokioSpawner::current();
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        spawner.spawn(async move {
            executed_clone.store(true, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(executed.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn periodic_task_ticks_until_cancelled() {
        let spawner = TokioSpawner::current();
        let cancel = CancellationToken::new();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        spawn_periodic(&spawner, "test", Duration::from_secs(60), cancel.clone(), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);

        cancel.cancel();
        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 2);
    }
}
