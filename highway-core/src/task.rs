// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! Type-erased tasks and the unified cancellation signal.
//!
//! Every task body is a plain `FnMut(&CancellationToken)` closure rather than an arbitrary
//! callable whose signature gets introspected at compile time. A highway's shutdown flag
//! and its current worker generation are collapsed into the single [`CancellationToken`]:
//! `is_cancelled()` is true once either the highway is torn down or a watchdog restart has
//! moved the generation past the token's own.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Shared cancellation state for one highway's worker thread, handed to every task it
/// runs. Cheap to clone (two `Arc`s); a task stores the `your_run_id` it was created
/// under and compares it against the live `global_run_id` at dispatch time.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    keep_execution: Arc<AtomicBool>,
    global_run_id: Arc<AtomicU64>,
    your_run_id: u64,
}

impl CancellationToken {
    pub(crate) fn root() -> (Self, Arc<AtomicBool>, Arc<AtomicU64>) {
        let keep_execution = Arc::new(AtomicBool::new(true));
        let global_run_id = Arc::new(AtomicU64::new(0));
        let token = Self {
            keep_execution: Arc::clone(&keep_execution),
            global_run_id: Arc::clone(&global_run_id),
            your_run_id: 0,
        };
        (token, keep_execution, global_run_id)
    }

    /// A token snapshotting the currently-live run id; used when handing a fresh token to
    /// a newly-spawned worker generation after a watchdog restart.
    pub(crate) fn for_current_generation(
        keep_execution: &Arc<AtomicBool>,
        global_run_id: &Arc<AtomicU64>,
    ) -> Self {
        Self {
            keep_execution: Arc::clone(keep_execution),
            global_run_id: Arc::clone(global_run_id),
            your_run_id: global_run_id.load(Ordering::Acquire),
        }
    }

    /// `true` if the owning highway is shutting down, or if the watchdog has restarted
    /// the worker since this token's task was created.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        !self.keep_execution.load(Ordering::Acquire)
            || self.your_run_id != self.global_run_id.load(Ordering::Acquire)
    }
}

/// A type-erased, optionally-guarded fire-and-forget task plus its creation call-site.
pub struct Runnable {
    body: Box<dyn FnMut(&CancellationToken) + Send>,
    protector: Option<Box<dyn Fn() -> bool + Send>>,
    file: &'static str,
    line: u32,
}

impl std::fmt::Debug for Runnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runnable")
            .field("body", &"<fn>")
            .field("guarded", &self.protector.is_some())
            .field("file", &self.file)
            .field("line", &self.line)
            .finish()
    }
}

impl Runnable {
    pub fn new(
        body: impl FnMut(&CancellationToken) + Send + 'static,
        file: &'static str,
        line: u32,
    ) -> Self {
        Self {
            body: Box::new(body),
            protector: None,
            file,
            line,
        }
    }

    /// Attaches a weak-reference guard: if `protector` can no longer be upgraded at
    /// dispatch time, the task body is skipped silently.
    #[must_use]
    pub fn guarded<P: Send + Sync + 'static>(
        body: impl FnMut(&CancellationToken) + Send + 'static,
        protector: std::sync::Weak<P>,
        file: &'static str,
        line: u32,
    ) -> Self {
        Self {
            body: Box::new(body),
            protector: Some(Box::new(move || protector.upgrade().is_some())),
            file,
            line,
        }
    }

    #[must_use]
    pub fn file(&self) -> &'static str {
        self.file
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Runs the task unless its protector has expired.
    pub fn run(&mut self, cancel: &CancellationToken) {
        if let Some(protector) = &self.protector {
            if !protector() {
                return;
            }
        }
        (self.body)(cancel);
    }
}

/// Mutable re-scheduling state a [`ReschedulableRunnable`] body may update on each
/// invocation.
#[derive(Debug)]
pub struct Schedule {
    pub next_execution_time: Instant,
    pub reschedule: bool,
}

/// A timer task that re-enqueues itself on the highway's timer stack when its body sets
/// `schedule.reschedule = true`.
pub struct ReschedulableRunnable {
    body: Box<dyn FnMut(&mut Schedule, &CancellationToken) + Send>,
    schedule: Schedule,
    file: &'static str,
    line: u32,
}

impl std::fmt::Debug for ReschedulableRunnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReschedulableRunnable")
            .field("body", &"<fn>")
            .field("schedule", &self.schedule)
            .field("file", &self.file)
            .field("line", &self.line)
            .finish()
    }
}

impl ReschedulableRunnable {
    pub fn new(
        next_execution_time: Instant,
        body: impl FnMut(&mut Schedule, &CancellationToken) + Send + 'static,
        file: &'static str,
        line: u32,
    ) -> Self {
        Self {
            body: Box::new(body),
            schedule: Schedule {
                next_execution_time,
                reschedule: false,
            },
            file,
            line,
        }
    }

    #[must_use]
    pub fn next_execution_time(&self) -> Instant {
        self.schedule.next_execution_time
    }

    #[must_use]
    pub fn file(&self) -> &'static str {
        self.file
    }

    #[must_use]
    pub fn line(&self) -> u32 {
        self.line
    }

    /// Runs the body if `now` has reached `next_execution_time`, clearing the reschedule
    /// flag first so the body must opt back in. Returns `true` if the task should be kept
    /// on the timer stack (either not yet due, or due and asked to reschedule).
    pub fn run_if_due(&mut self, now: Instant, cancel: &CancellationToken) -> bool {
        if now < self.schedule.next_execution_time {
            return true;
        }
        self.schedule.reschedule = false;
        (self.body)(&mut self.schedule, cancel);
        self.schedule.reschedule
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn cancellation_token_flips_on_shutdown() {
        let (token, keep_execution, _global_run_id) = CancellationToken::root();
        assert!(!token.is_cancelled());
        keep_execution.store(false, Ordering::Release);
        assert!(token.is_cancelled());
    }

    #[test]
    fn cancellation_token_flips_on_generation_bump() {
        let (_root, keep_execution, global_run_id) = CancellationToken::root();
        let token = CancellationToken::for_current_generation(&keep_execution, &global_run_id);
        assert!(!token.is_cancelled());
        global_run_id.fetch_add(1, Ordering::AcqRel);
        assert!(token.is_cancelled());
    }

    #[test]
    fn guarded_runnable_skips_body_once_protector_is_dropped() {
        let guard = Arc::new(());
        let calls = Arc::new(AtomicU32::new(0));
        let (token, _keep, _run_id) = CancellationToken::root();

        let calls_clone = Arc::clone(&calls);
        let mut runnable = Runnable::guarded(
            move |_cancel| {
                calls_clone.fetch_add(1, Ordering::Relaxed);
            },
            Arc::downgrade(&guard),
            file!(),
            line!(),
        );
        runnable.run(&token);
        assert_eq!(calls.load(Ordering::Relaxed), 1);

        drop(guard);
        runnable.run(&token);
        assert_eq!(calls.load(Ordering::Relaxed), 1, "protector expired; body must not run again");
    }

    #[test]
    fn reschedulable_runnable_keeps_itself_alive_until_it_declines() {
        let (token, _keep, _run_id) = CancellationToken::root();
        let mut count = 0;
        let mut task = ReschedulableRunnable::new(
            Instant::now(),
            move |schedule, _cancel| {
                count += 1;
                schedule.reschedule = count < 3;
            },
            file!(),
            line!(),
        );
        assert!(task.run_if_due(Instant::now(), &token));
        assert!(task.run_if_due(Instant::now(), &token));
        assert!(!task.run_if_due(Instant::now(), &token));
    }
}
