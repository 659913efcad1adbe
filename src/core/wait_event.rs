//! Auto-resetting wake flag used to hand "a frame is ready" from the pipeline
//! thread to a consumer blocked in `capture`.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A single boolean flag with a condition variable.
///
/// Signals do not queue: two `signal` calls before one `wait` produce one
/// wakeup. A successful `wait` clears the flag.
#[derive(Debug, Default)]
pub struct WaitEvent {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl WaitEvent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes one waiter.
    pub fn signal(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_one();
    }

    /// Blocks until signalled or `timeout` elapses.
    ///
    /// Returns `true` and clears the flag if it was set, `false` on timeout.
    /// Spurious wakeups never end the wait early. A timeout too large to
    /// express as a deadline waits indefinitely.
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut flag = self.flag.lock();
        match Instant::now().checked_add(timeout) {
            Some(deadline) => {
                while !*flag {
                    if self.cond.wait_until(&mut flag, deadline).timed_out() {
                        break;
                    }
                }
            }
            None => {
                while !*flag {
                    self.cond.wait(&mut flag);
                }
            }
        }
        std::mem::replace(&mut *flag, false)
    }

    /// Clears a pending signal without waiting.
    pub fn reset(&self) {
        *self.flag.lock() = false;
    }

    pub fn is_set(&self) -> bool {
        *self.flag.lock()
    }
}
