//! In-flight transport call tracking.

use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Debug, Default)]
struct ActivityState {
    in_flight: usize,
    total_started: u64,
}

/// Shared counter of transport calls currently in progress.
///
/// Clones share the same counter, so one instance can be handed to several
/// executors to drive a global "network busy" indicator.
#[derive(Debug, Clone, Default)]
pub struct NetworkActivity {
    state: Arc<Mutex<ActivityState>>,
}

impl NetworkActivity {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a call as started; it ends when the guard is dropped
    #[must_use = "activity ends as soon as the guard is dropped"]
    pub fn begin(&self) -> ActivityGuard {
        let mut state = self.state.lock();
        state.in_flight += 1;
        state.total_started += 1;
        ActivityGuard {
            state: Arc::clone(&self.state),
        }
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.state.lock().in_flight
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.in_flight() > 0
    }

    /// Calls started since creation
    #[must_use]
    pub fn total_started(&self) -> u64 {
        self.state.lock().total_started
    }
}

/// Decrements the in-flight count on drop, including on cancellation
#[derive(Debug)]
pub struct ActivityGuard {
    state: Arc<Mutex<ActivityState>>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}
