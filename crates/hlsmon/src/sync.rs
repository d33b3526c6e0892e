// Event: condition-variable signal used for every cross-thread wakeup in the pipeline.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Reset behaviour of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Stays signaled until [`Event::reset`] is called.
    Manual,
    /// A successful [`Event::wait`] consumes the signal.
    Auto,
}

#[derive(Debug, Default)]
struct EventState {
    signaled: bool,
    set_count: u64,
}

/// A manual- or auto-reset signal built on `parking_lot`'s `Mutex` + `Condvar`.
///
/// `set` before `wait` is never lost: the flag is checked under the lock
/// before the waiter parks.
#[derive(Debug)]
pub struct Event {
    mode: ResetMode,
    state: Mutex<EventState>,
    cond: Condvar,
}

impl Event {
    pub fn new(mode: ResetMode) -> Self {
        Self {
            mode,
            state: Mutex::new(EventState::default()),
            cond: Condvar::new(),
        }
    }

    pub fn manual() -> Self {
        Self::new(ResetMode::Manual)
    }

    pub fn auto() -> Self {
        Self::new(ResetMode::Auto)
    }

    pub fn mode(&self) -> ResetMode {
        self.mode
    }

    /// Raise the signal and wake waiters.
    pub fn set(&self) {
        let mut state = self.state.lock();
        state.signaled = true;
        state.set_count = state.set_count.wrapping_add(1);
        match self.mode {
            ResetMode::Manual => {
                self.cond.notify_all();
            }
            ResetMode::Auto => {
                self.cond.notify_one();
            }
        }
    }

    pub fn reset(&self) {
        self.state.lock().signaled = false;
    }

    pub fn is_set(&self) -> bool {
        self.state.lock().signaled
    }

    /// Number of times [`Event::set`] has been called.
    pub fn set_count(&self) -> u64 {
        self.state.lock().set_count
    }

    /// Block until signaled or until `timeout` elapses.
    ///
    /// Returns `true` when woken by the signal, `false` on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.signaled {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                if !state.signaled {
                    return false;
                }
                break;
            }
        }
        if self.mode == ResetMode::Auto {
            state.signaled = false;
        }
        true
    }

    pub fn wait_ms(&self, timeout_ms: u64) -> bool {
        self.wait(Duration::from_millis(timeout_ms))
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::auto()
    }
}
