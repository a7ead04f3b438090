//! Fire-and-forget background work (notification toasts, sounds).
//!
//! Tasks run on detached threads and are never joined; shutdown does not wait
//! for them. The runner only counts what is in flight so the count can be
//! logged at shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct BackgroundTasks {
    in_flight: Arc<AtomicUsize>,
}

/// Decrements the in-flight count when the task ends, panics included.
struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks that have been started and not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Run `task` on a detached thread.
    pub fn spawn<F>(&self, name: &str, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let guard = InFlightGuard(self.in_flight.clone());

        let result = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                task();
            });

        match result {
            Ok(_) => debug!("Spawned background task '{}'", name),
            // The closure (and its guard) is dropped with the error
            Err(e) => warn!("Failed to spawn background task '{}': {}", name, e),
        }
    }
}
