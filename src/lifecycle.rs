//! Background task plumbing
//!
//! Discovery refresh, health monitoring and the registry sweep each run as a
//! spawned interval loop held in a [`TaskSlot`] so teardown can abort them.

use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::error;

/// Holder for at most one running background task
#[derive(Debug, Default)]
pub struct TaskSlot {
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a task; returns false (and aborts the new one) if a task is already running
    pub fn install(&self, handle: JoinHandle<()>) -> bool {
        let mut slot = self.handle.lock().unwrap_or_else(|p| p.into_inner());
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            handle.abort();
            return false;
        }
        *slot = Some(handle);
        true
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Abort the task and wait for it to wind down
    pub async fn stop(&self, name: &str) {
        let handle = self.handle.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    error!(task = name, "Background task shutdown error: {}", e);
                }
            }
        }
    }
}

/// Spawn `tick` every `period`, skipping the immediate first tick
pub fn spawn_periodic<F, Fut>(period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        interval.tick().await; // First tick completes immediately, skip it

        loop {
            interval.tick().await;
            tick().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_task_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);
        let slot = TaskSlot::new();

        assert!(slot.install(spawn_periodic(Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })));
        assert!(slot.is_running());

        tokio::time::sleep(Duration::from_secs(35)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        slot.stop("test").await;
        assert!(!slot.is_running());

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_second_install_is_rejected() {
        let slot = TaskSlot::new();
        assert!(slot.install(spawn_periodic(Duration::from_secs(60), || async {})));
        assert!(!slot.install(spawn_periodic(Duration::from_secs(60), || async {})));
        slot.stop("test").await;
    }
}
