// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! The bounded multi-producer, single-consumer mailbox.
//!
//! Two send modes — `send_may_fail` (drop on a full mailbox) and `send_may_blocked`
//! (block the producer until a holder frees) — sit over a semaphore-gated consumer drain
//! and a two-stack free/work-queue cycle backed by [`crate::slab::Slab`], so holders are
//! recycled rather than individually heap-allocated.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::semaphore::Semaphore;
use crate::slab::{Slab, SingleThreadStack, ThreadSafeStack};

pub struct Mailbox<T> {
    slab: Slab<T>,
    intake: ThreadSafeStack,
    free_primary: ThreadSafeStack,
    free_secondary: ThreadSafeStack,
    work_queue: Mutex<SingleThreadStack>,
    intake_semaphore: Semaphore,
    free_semaphore: Semaphore,
    capacity: u32,
    allocated: AtomicU32,
    running: AtomicBool,
}

impl<T> std::fmt::Debug for Mailbox<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mailbox")
            .field("capacity", &self.capacity)
            .field("allocated", &self.allocated.load(Ordering::Relaxed))
            .field("running", &self.is_running())
            .finish()
    }
}

impl<T> Mailbox<T> {
    #[must_use]
    pub fn new(capacity: u32) -> Self {
        Self {
            slab: Slab::with_capacity(capacity),
            intake: ThreadSafeStack::new(),
            free_primary: ThreadSafeStack::new(),
            free_secondary: ThreadSafeStack::new(),
            work_queue: Mutex::new(SingleThreadStack::new()),
            intake_semaphore: Semaphore::new(),
            free_semaphore: Semaphore::new(),
            capacity,
            allocated: AtomicU32::new(0),
            running: AtomicBool::new(true),
        }
    }

    #[must_use]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Acquires a holder either by allocating a fresh slab slot (until `capacity` is
    /// reached) or by recycling one through the `free_secondary -> free_primary` cycle.
    /// Mirrors `aba_safe_get_free_holder`.
    fn aba_safe_get_free_holder(&self) -> Option<u32> {
        loop {
            let allocated = self.allocated.load(Ordering::Relaxed);
            if allocated >= self.capacity {
                break;
            }
            if self
                .allocated
                .compare_exchange_weak(allocated, allocated + 1, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return Some(allocated);
            }
        }

        if let Some(idx) = self.free_primary.pop(&self.slab) {
            return Some(idx);
        }
        self.free_secondary.move_to_threadsafe(&self.slab, &self.free_primary);
        self.free_primary.pop(&self.slab)
    }

    /// Best-effort send: drops the message and returns `false` if no holder is available.
    pub fn send_may_fail(&self, value: T) -> bool {
        let Some(idx) = self.aba_safe_get_free_holder() else {
            return false;
        };
        self.slab.put(idx, value);
        self.intake.push(&self.slab, idx);
        self.intake_semaphore.signal_keep_one();
        true
    }

    /// Blocking send: waits on the free-holder semaphore until a holder is available or
    /// the mailbox is destroyed, in which case the message is silently dropped.
    pub fn send_may_blocked(&self, value: T) {
        let mut value = Some(value);
        loop {
            if let Some(idx) = self.aba_safe_get_free_holder() {
                self.slab.put(idx, value.take().expect("value already sent"));
                self.intake.push(&self.slab, idx);
                self.intake_semaphore.signal_keep_one();
                return;
            }
            if !self.running.load(Ordering::Relaxed) {
                return;
            }
            self.free_semaphore.wait();
        }
    }

    /// Moves the intake stack into the work queue, in FIFO (submission) order. Blocks on
    /// the intake semaphore up to `max_wait` if the work queue and intake are both empty.
    pub fn drain(&self, max_wait: Duration) {
        let mut work_queue = self.work_queue.lock().expect("work queue mutex poisoned");
        if work_queue.is_empty() && self.intake.is_empty() {
            self.intake_semaphore.wait_for(max_wait);
        }
        self.intake.move_to(&self.slab, &mut work_queue);
    }

    /// Pops one already-drained item, without waiting. Returns `None` if the work queue is
    /// empty (callers should `drain` again or stop the current pass).
    pub fn pop_from_work_queue(&self) -> Option<(u32, T)> {
        let mut work_queue = self.work_queue.lock().expect("work queue mutex poisoned");
        let idx = work_queue.pop(&self.slab)?;
        let value = self.slab.take(idx).expect("drained holder had no value");
        Some((idx, value))
    }

    /// Blocking single-item pop used by the multi-thread plant workers (no timer phase,
    /// so there is nothing to interleave with): mirrors `pop_message()`.
    pub fn pop_message(&self) -> Option<(u32, T)> {
        loop {
            if let Some(pair) = self.pop_from_work_queue() {
                return Some(pair);
            }
            if !self.running.load(Ordering::Acquire) {
                return None;
            }
            if self.intake.is_empty() {
                self.intake_semaphore.wait();
            }
            let mut work_queue = self.work_queue.lock().expect("work queue mutex poisoned");
            self.intake.move_to(&self.slab, &mut work_queue);
        }
    }

    /// Non-blocking variant of [`Self::pop_message`]: mirrors `pop_message_no_wait()`.
    pub fn pop_message_no_wait(&self) -> Option<(u32, T)> {
        if let Some(pair) = self.pop_from_work_queue() {
            return Some(pair);
        }
        let mut work_queue = self.work_queue.lock().expect("work queue mutex poisoned");
        self.intake.move_to(&self.slab, &mut work_queue);
        drop(work_queue);
        self.pop_from_work_queue()
    }

    /// Returns a holder to the free pool and wakes one blocked sender. Mirrors
    /// `free_holder`.
    pub fn free(&self, index: u32) {
        let _ = self.slab.take(index);
        self.free_secondary.push(&self.slab, index);
        self.free_semaphore.signal();
    }

    /// Nudges a consumer blocked in [`Self::drain`] to wake up and re-check its own state
    /// (e.g. a freshly-scheduled timer task with an earlier due time) without actually
    /// enqueueing a message.
    pub fn wake(&self) {
        self.intake_semaphore.signal_keep_one();
    }

    /// Stops accepting work and wakes every blocked producer/consumer. Idempotent.
    pub fn destroy(&self) {
        self.running.store(false, Ordering::Release);
        self.free_semaphore.destroy();
        self.intake_semaphore.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_and_pop_preserves_fifo_order() {
        let mailbox: Mailbox<u32> = Mailbox::new(8);
        for i in 0..5 {
            assert!(mailbox.send_may_fail(i));
        }
        mailbox.drain(Duration::from_millis(10));
        let mut out = Vec::new();
        while let Some((idx, value)) = mailbox.pop_from_work_queue() {
            out.push(value);
            mailbox.free(idx);
        }
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn best_effort_send_fails_at_capacity() {
        let mailbox: Mailbox<u32> = Mailbox::new(2);
        assert!(mailbox.send_may_fail(1));
        assert!(mailbox.send_may_fail(2));
        assert!(!mailbox.send_may_fail(3));
    }

    #[test]
    fn freed_holder_is_recycled_after_capacity_reached() {
        let mailbox: Mailbox<u32> = Mailbox::new(1);
        assert!(mailbox.send_may_fail(1));
        let (idx, value) = mailbox.pop_message().unwrap();
        assert_eq!(value, 1);
        mailbox.free(idx);
        assert!(mailbox.send_may_fail(2));
        assert_eq!(mailbox.pop_message().unwrap().1, 2);
    }

    #[test]
    fn destroy_unblocks_pop_message() {
        use std::sync::Arc;
        use std::thread;

        let mailbox: Arc<Mailbox<u32>> = Arc::new(Mailbox::new(4));
        let consumer = {
            let mailbox = Arc::clone(&mailbox);
            thread::spawn(move || mailbox.pop_message())
        };
        thread::sleep(Duration::from_millis(20));
        mailbox.destroy();
        assert_eq!(consumer.join().unwrap(), None);
    }
}
