// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! The single-thread highway: one dedicated worker, a mailbox, a timer stack, and a
//! watchdog that restarts the worker if a task ignores its cancellation token.
//!
//! Each worker cycles through three phases: run any due timer tasks, compute how long to
//! sleep until the next one (or the next mailbox message), then drain and run mailbox
//! tasks. A task that panics is caught and routed to the configured exception handler; a
//! task that overruns `max_task_execution_time` trips the watchdog, which bumps the
//! highway's run generation (cancelling the stuck task's token) and spawns a replacement
//! worker, up to `max_repairs` attempts.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::HighwayConfig;
use crate::error::{HighwayError, SetupError};
use crate::mailbox::Mailbox;
use crate::task::{CancellationToken, ReschedulableRunnable, Runnable};

const WHAT_SLEEPING: u8 = 0;
const WHAT_MAILBOX_TASK: u8 = 1;
const WHAT_TIMER_TASK: u8 = 2;

/// A long idle poll used when there is no pending timer task and no configured
/// `max_task_execution_time` to derive a shorter watchdog cadence from.
const IDLE_WAIT: Duration = Duration::from_secs(60 * 60 * 24);

struct TimerState {
    stack: Vec<ReschedulableRunnable>,
    next_due: Instant,
}

/// A single dedicated worker thread that runs [`Runnable`]s in submission order and
/// [`ReschedulableRunnable`]s on their own schedule, self-healing if a task overruns
/// `max_task_execution_time`.
///
/// Always held behind an `Arc`; the worker thread itself keeps a clone alive for as long
/// as it runs, so dropping every external `Arc<Highway>` without calling [`Self::destroy`]
/// leaks the worker rather than stopping it — call `destroy()` explicitly.
pub struct Highway {
    config: HighwayConfig,
    mailbox: Mailbox<Runnable>,
    timer: Mutex<TimerState>,
    keep_execution: Arc<AtomicBool>,
    run_id: Arc<AtomicU64>,
    what_running_now: AtomicU8,
    task_started_at: Mutex<Instant>,
    repairs: AtomicU8,
    current_worker: Mutex<Option<JoinHandle<()>>>,
    retired_workers: Mutex<Vec<JoinHandle<()>>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Highway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Highway")
            .field("config", &self.config)
            .field("running", &self.is_running())
            .field("repairs", &self.repairs.load(Ordering::Relaxed))
            .finish()
    }
}

impl Highway {
    /// Builds and starts a new highway: spawns its worker thread and, if
    /// `max_task_execution_time` is non-zero, a watchdog thread alongside it.
    pub fn new(config: HighwayConfig) -> Result<Arc<Self>, SetupError> {
        let (_, keep_execution, run_id) = CancellationToken::root();
        let highway = Arc::new(Self {
            mailbox: Mailbox::new(config.mailbox_capacity),
            timer: Mutex::new(TimerState {
                stack: Vec::new(),
                next_due: Instant::now() + IDLE_WAIT,
            }),
            keep_execution,
            run_id,
            what_running_now: AtomicU8::new(WHAT_SLEEPING),
            task_started_at: Mutex::new(Instant::now()),
            repairs: AtomicU8::new(0),
            current_worker: Mutex::new(None),
            retired_workers: Mutex::new(Vec::new()),
            watchdog: Mutex::new(None),
            config,
        });

        let worker = spawn_worker(Arc::clone(&highway))?;
        *highway
            .current_worker
            .lock()
            .map_err(|_| SetupError::MutexPoisoned { which: "current_worker" })? = Some(worker);

        if !highway.config.max_task_execution_time.is_zero() {
            let watchdog_highway = Arc::clone(&highway);
            let handle = thread::Builder::new()
                .name(format!("{}-watchdog", highway.config.name))
                .spawn(move || run_watchdog(watchdog_highway))
                .map_err(SetupError::ThreadSpawn)?;
            *highway
                .watchdog
                .lock()
                .map_err(|_| SetupError::MutexPoisoned { which: "watchdog" })? = Some(handle);
        }

        Ok(highway)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.keep_execution.load(Ordering::Acquire)
    }

    /// Queues a fire-and-forget task, blocking the caller until a mailbox holder frees up.
    pub fn execute(&self, body: impl FnMut(&CancellationToken) + Send + 'static, file: &'static str, line: u32) {
        self.mailbox.send_may_blocked(Runnable::new(body, file, line));
    }

    /// Queues a fire-and-forget task, dropping it instead of blocking if the mailbox is
    /// full. Returns whether it was accepted.
    #[must_use]
    pub fn try_execute(
        &self,
        body: impl FnMut(&CancellationToken) + Send + 'static,
        file: &'static str,
        line: u32,
    ) -> bool {
        self.mailbox.send_may_fail(Runnable::new(body, file, line))
    }

    /// Adds a timer task to this highway's schedule and wakes the worker if it is asleep
    /// waiting for a later deadline.
    pub fn schedule(&self, task: ReschedulableRunnable) {
        let mut state = self.timer.lock().expect("timer mutex poisoned");
        if task.next_execution_time() < state.next_due {
            state.next_due = task.next_execution_time();
        }
        state.stack.push(task);
        drop(state);
        self.mailbox.wake();
    }

    /// Stops the worker and watchdog and joins every thread this highway ever spawned.
    /// Idempotent: a second call is a no-op.
    pub fn destroy(&self) {
        if self
            .keep_execution
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.mailbox.destroy();
        self.mailbox.wake();

        if let Some(handle) = self.watchdog.lock().expect("watchdog mutex poisoned").take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.current_worker.lock().expect("current_worker mutex poisoned").take() {
            let _ = handle.join();
        }
        for handle in self.retired_workers.lock().expect("retired_workers mutex poisoned").drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Highway {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn spawn_worker(highway: Arc<Highway>) -> Result<JoinHandle<()>, SetupError> {
    let token = CancellationToken::for_current_generation(&highway.keep_execution, &highway.run_id);
    thread::Builder::new()
        .name(highway.config.name.clone())
        .spawn(move || worker_loop(highway, token))
        .map_err(SetupError::ThreadSpawn)
}

fn worker_loop(highway: Arc<Highway>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            return;
        }

        run_timer_phase(&highway, &cancel);
        if cancel.is_cancelled() {
            return;
        }

        let wait_timeout = {
            let state = highway.timer.lock().expect("timer mutex poisoned");
            state.next_due.saturating_duration_since(Instant::now())
        };
        highway.what_running_now.store(WHAT_SLEEPING, Ordering::Relaxed);
        highway.mailbox.drain(wait_timeout);

        while let Some((index, mut runnable)) = highway.mailbox.pop_from_work_queue() {
            if cancel.is_cancelled() {
                highway.mailbox.free(index);
                return;
            }
            run_timed(&highway, WHAT_MAILBOX_TASK, runnable.file(), runnable.line(), || {
                runnable.run(&cancel);
            });
            highway.mailbox.free(index);
        }
    }
}

fn run_timer_phase(highway: &Highway, cancel: &CancellationToken) {
    let now = Instant::now();
    let due = {
        let state = highway.timer.lock().expect("timer mutex poisoned");
        now < state.next_due
    };
    if due {
        return;
    }

    let pending = {
        let mut state = highway.timer.lock().expect("timer mutex poisoned");
        state.next_due = Instant::now() + IDLE_WAIT;
        std::mem::take(&mut state.stack)
    };

    let mut still_pending = Vec::with_capacity(pending.len());
    for mut task in pending {
        if cancel.is_cancelled() {
            still_pending.push(task);
            continue;
        }
        let (file, line) = (task.file(), task.line());
        let mut keep = false;
        run_timed(highway, WHAT_TIMER_TASK, file, line, || {
            keep = task.run_if_due(Instant::now(), cancel);
        });
        if keep {
            still_pending.push(task);
        }
    }

    let mut state = highway.timer.lock().expect("timer mutex poisoned");
    for task in still_pending {
        if task.next_execution_time() < state.next_due {
            state.next_due = task.next_execution_time();
        }
        state.stack.push(task);
    }
}

/// Runs `body`, recording start time for the watchdog and routing a panic or a
/// `max_task_execution_time` overrun through the configured exception handler.
fn run_timed(highway: &Highway, what: u8, file: &'static str, line: u32, body: impl FnOnce()) {
    highway.what_running_now.store(what, Ordering::Relaxed);
    *highway.task_started_at.lock().expect("task_started_at mutex poisoned") = Instant::now();

    let start = Instant::now();
    let result = catch_unwind(AssertUnwindSafe(body));
    let elapsed = start.elapsed();

    if let Err(payload) = result {
        let message = panic_message(&payload);
        (highway.config.exception_handler)(HighwayError::TaskPanicked {
            highway: highway.config.name.clone(),
            file,
            line,
            message,
        });
    }

    if !highway.config.max_task_execution_time.is_zero() && elapsed > highway.config.max_task_execution_time {
        (highway.config.exception_handler)(HighwayError::Stalled {
            highway: highway.config.name.clone(),
            stall: elapsed,
        });
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn watchdog_poll_interval(max_task_execution_time: Duration) -> Duration {
    (max_task_execution_time / 2).max(Duration::from_millis(10))
}

fn run_watchdog(highway: Arc<Highway>) {
    let poll = watchdog_poll_interval(highway.config.max_task_execution_time);
    while highway.keep_execution.load(Ordering::Acquire) {
        thread::sleep(poll);
        if !highway.keep_execution.load(Ordering::Acquire) {
            return;
        }

        if highway.what_running_now.load(Ordering::Relaxed) == WHAT_SLEEPING {
            continue;
        }
        let elapsed = highway
            .task_started_at
            .lock()
            .expect("task_started_at mutex poisoned")
            .elapsed();
        if elapsed <= highway.config.max_task_execution_time {
            continue;
        }

        highway.run_id.fetch_add(1, Ordering::AcqRel);
        let attempted = highway.repairs.fetch_add(1, Ordering::AcqRel) + 1;
        let budget_exhausted = attempted > highway.config.max_repairs;

        // Spawn the replacement (or give up, if the budget is exhausted) before calling
        // into user code below: the default exception_handler re-panics, and a panicking
        // handler must never be able to stop a repair that has already been decided.
        if !budget_exhausted {
            tracing::warn!(highway = %highway.config.name, attempt = attempted, "restarting stalled worker");
            match spawn_worker(Arc::clone(&highway)) {
                Ok(replacement) => {
                    let mut current = highway.current_worker.lock().expect("current_worker mutex poisoned");
                    if let Some(stuck) = current.replace(replacement) {
                        highway
                            .retired_workers
                            .lock()
                            .expect("retired_workers mutex poisoned")
                            .push(stuck);
                    }
                }
                Err(err) => {
                    tracing::error!(highway = %highway.config.name, %err, "failed to spawn replacement worker");
                }
            }
        }

        // catch_unwind here so a panicking exception_handler (the default re-panics)
        // cannot take the watchdog thread down with it and end self-repair for good.
        let _ = catch_unwind(AssertUnwindSafe(|| {
            (highway.config.exception_handler)(HighwayError::Stalled {
                highway: highway.config.name.clone(),
                stall: elapsed,
            });
            if budget_exhausted {
                (highway.config.exception_handler)(HighwayError::RepairBudgetExhausted {
                    highway: highway.config.name.clone(),
                    attempted,
                });
            }
        }));
    }
}

/// A non-owning handle to a [`Highway`] that does not keep it alive, for callers (like
/// subscriptions) that should not extend a highway's lifetime just by holding a reference
/// to it. An optional callback fires once, from `Drop`, if the highway is still alive at
/// that point.
pub struct HighwayProxy {
    highway: Weak<Highway>,
    on_release: Option<Box<dyn FnOnce(&Highway) + Send + Sync>>,
}

impl std::fmt::Debug for HighwayProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighwayProxy")
            .field("alive", &(self.highway.strong_count() > 0))
            .field("has_release_callback", &self.on_release.is_some())
            .finish()
    }
}

impl HighwayProxy {
    #[must_use]
    pub fn new(highway: &Arc<Highway>) -> Self {
        Self {
            highway: Arc::downgrade(highway),
            on_release: None,
        }
    }

    #[must_use]
    pub fn with_release_callback(highway: &Arc<Highway>, on_release: impl FnOnce(&Highway) + Send + Sync + 'static) -> Self {
        Self {
            highway: Arc::downgrade(highway),
            on_release: Some(Box::new(on_release)),
        }
    }

    /// Upgrades to a strong reference, or `None` if the highway has already been dropped.
    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<Highway>> {
        self.highway.upgrade()
    }

    /// Queues a fire-and-forget task on the proxied highway, blocking the caller until a
    /// mailbox holder frees up. Fails with [`HighwayError::AlreadyDestroyed`] if the
    /// highway this proxy points to has already been dropped.
    pub fn execute_checked(
        &self,
        body: impl FnMut(&CancellationToken) + Send + 'static,
        file: &'static str,
        line: u32,
    ) -> Result<(), HighwayError> {
        self.upgrade().ok_or(HighwayError::AlreadyDestroyed)?.execute(body, file, line);
        Ok(())
    }
}

impl Drop for HighwayProxy {
    fn drop(&mut self) {
        if let (Some(callback), Some(highway)) = (self.on_release.take(), self.highway.upgrade()) {
            callback(&highway);
        }
    }
}
