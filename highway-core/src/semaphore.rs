// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! A small counting semaphore with a timed wait and a one-shot close.
//!
//! Built over `std::sync::{Mutex, Condvar}` rather than a raw platform semaphore, matching
//! the rest of this crate's preference for std synchronization primitives.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug)]
struct State {
    count: u32,
    closed: bool,
}

pub struct Semaphore {
    state: Mutex<State>,
    condvar: Condvar,
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore").field("state", &self.state).finish()
    }
}

impl Semaphore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                count: 0,
                closed: false,
            }),
            condvar: Condvar::new(),
        }
    }

    /// Blocks until a permit is available or the semaphore is destroyed.
    pub fn wait(&self) {
        let mut state = self.state.lock().expect("semaphore mutex poisoned");
        state = self
            .condvar
            .wait_while(state, |s| s.count == 0 && !s.closed)
            .expect("semaphore mutex poisoned");
        if state.count > 0 {
            state.count -= 1;
        }
    }

    /// Blocks until a permit is available, the semaphore is destroyed, or `timeout`
    /// elapses. Returns `true` if it woke because a permit was consumed.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let state = self.state.lock().expect("semaphore mutex poisoned");
        let (mut state, result) = self
            .condvar
            .wait_timeout_while(state, timeout, |s| s.count == 0 && !s.closed)
            .expect("semaphore mutex poisoned");
        if result.timed_out() {
            return false;
        }
        if state.count > 0 {
            state.count -= 1;
            true
        } else {
            false
        }
    }

    /// Releases one permit, always incrementing the count.
    pub fn signal(&self) {
        let mut state = self.state.lock().expect("semaphore mutex poisoned");
        state.count += 1;
        self.condvar.notify_one();
    }

    /// Releases a permit only if none is outstanding. Used after every mailbox send so a
    /// burst of sends wakes the single consumer once rather than piling up one token per
    /// send (the consumer drains the whole intake stack per wake-up anyway).
    pub fn signal_keep_one(&self) {
        let mut state = self.state.lock().expect("semaphore mutex poisoned");
        if state.count == 0 {
            state.count = 1;
            self.condvar.notify_one();
        }
    }

    /// Marks the semaphore closed and wakes every waiter. Waiters that observe `closed`
    /// return from `wait`/`wait_for` without consuming a permit. Idempotent.
    pub fn destroy(&self) {
        let mut state = self.state.lock().expect("semaphore mutex poisoned");
        state.closed = true;
        self.condvar.notify_all();
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_then_wait_does_not_block() {
        let sem = Semaphore::new();
        sem.signal();
        sem.wait();
    }

    #[test]
    fn signal_keep_one_does_not_accumulate() {
        let sem = Semaphore::new();
        sem.signal_keep_one();
        sem.signal_keep_one();
        assert!(sem.wait_for(Duration::from_millis(10)));
        assert!(!sem.wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn destroy_wakes_blocked_waiter() {
        let sem = Arc::new(Semaphore::new());
        let waiter = {
            let sem = Arc::clone(&sem);
            thread::spawn(move || sem.wait())
        };
        thread::sleep(Duration::from_millis(20));
        sem.destroy();
        waiter.join().expect("waiter thread panicked");
    }

    #[test]
    fn wait_for_times_out_when_nothing_signaled() {
        let sem = Semaphore::new();
        assert!(!sem.wait_for(Duration::from_millis(10)));
    }
}
