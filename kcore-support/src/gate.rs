//! Binary gates used for the `exec`/`wait` handshakes described in
//! `spec.md` §3 and §4.6: a load-status gate (parent blocks until the
//! child's `load` either succeeds or fails) and an exited gate (parent
//! blocks in `wait` until the child records its exit status).
//!
//! Grounded on `kernel-rs/src/proc/wait_channel.rs`'s "sleep until
//! signaled" shape, generalized from a scheduler-integrated wait channel
//! (the scheduler itself is external per `spec.md` §1) to a plain
//! `Mutex`+`Condvar` gate so it's usable — and testable — without a real
//! scheduler underneath it.

use std::sync::{Condvar, Mutex};

/// A single-use gate that carries one `i32` result from signaler to
/// waiter. Mirrors the load-status / exited semaphores of a child-process
/// record (`spec.md` §3).
pub struct Gate {
    state: Mutex<Option<i32>>,
    condvar: Condvar,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(None),
            condvar: Condvar::new(),
        }
    }

    /// Signals the gate with `value`, waking exactly the waiters blocked
    /// in [`Gate::wait`]. Idempotent in the sense that signaling an
    /// already-signaled gate simply overwrites the carried value — callers
    /// in this crate signal each gate exactly once.
    pub fn signal(&self, value: i32) {
        let mut state = self.state.lock().unwrap();
        *state = Some(value);
        self.condvar.notify_all();
    }

    /// Blocks until [`Gate::signal`] has been called, then returns the
    /// signaled value.
    pub fn wait(&self) -> i32 {
        let mut state = self.state.lock().unwrap();
        while state.is_none() {
            state = self.condvar.wait(state).unwrap();
        }
        state.unwrap()
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn wait_blocks_until_signal() {
        let gate = Arc::new(Gate::new());
        let signaler = Arc::clone(&gate);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            signaler.signal(7);
        });
        assert_eq!(gate.wait(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn signal_before_wait_is_still_observed() {
        let gate = Gate::new();
        gate.signal(-1);
        assert_eq!(gate.wait(), -1);
    }
}
