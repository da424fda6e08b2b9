// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! The multi-threaded plant: a fixed pool of worker threads pulling from one shared
//! mailbox, with no timer stack and no per-worker self-repair. Load bookkeeping for a
//! pool of plants lives in [`crate::manager::HighwaysManager`], not here.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crate::config::HighwayConfig;
use crate::error::{HighwayError, SetupError};
use crate::mailbox::Mailbox;
use crate::task::{CancellationToken, Runnable};

/// `N` equally-privileged worker threads draining one shared [`Mailbox`]. Unlike
/// [`crate::highway::Highway`], a plant has no timer stack and no watchdog: a stuck task
/// only blocks the one worker that picked it up. Plant starvation is a caller-visible
/// condition (the queue backs up) rather than something to self-heal.
pub struct Plant {
    config: HighwayConfig,
    mailbox: Arc<Mailbox<Runnable>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Plant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plant")
            .field("config", &self.config)
            .field("mailbox", &self.mailbox)
            .field("worker_count", &self.workers.lock().map(|workers| workers.len()).unwrap_or(0))
            .finish()
    }
}

impl Plant {
    /// Starts `worker_count` threads, each running [`worker_loop`] against a freshly
    /// created shared mailbox.
    pub fn new(config: HighwayConfig, worker_count: usize) -> Result<Arc<Self>, SetupError> {
        let mailbox = Arc::new(Mailbox::new(config.mailbox_capacity));
        let (cancel, _keep_execution, _run_id) = CancellationToken::root();

        let plant = Arc::new(Self {
            mailbox: Arc::clone(&mailbox),
            workers: Mutex::new(Vec::with_capacity(worker_count)),
            config,
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let mailbox = Arc::clone(&mailbox);
            let cancel = cancel.clone();
            let exception_handler = Arc::clone(&plant.config.exception_handler);
            let max_task_execution_time = plant.config.max_task_execution_time;
            let name = format!("{}-{index}", plant.config.name);
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(mailbox, cancel, exception_handler, max_task_execution_time, name))
                .map_err(SetupError::ThreadSpawn)?;
            workers.push(handle);
        }
        *plant
            .workers
            .lock()
            .map_err(|_| SetupError::MutexPoisoned { which: "workers" })? = workers;

        Ok(plant)
    }

    #[must_use]
    pub fn mailbox(&self) -> &Arc<Mailbox<Runnable>> {
        &self.mailbox
    }

    pub fn execute(&self, body: impl FnMut(&CancellationToken) + Send + 'static, file: &'static str, line: u32) {
        self.mailbox.send_may_blocked(Runnable::new(body, file, line));
    }

    #[must_use]
    pub fn try_execute(
        &self,
        body: impl FnMut(&CancellationToken) + Send + 'static,
        file: &'static str,
        line: u32,
    ) -> bool {
        self.mailbox.send_may_fail(Runnable::new(body, file, line))
    }

    /// Stops accepting work and joins every worker thread. Idempotent.
    pub fn destroy(&self) {
        if !self.mailbox.is_running() {
            return;
        }
        self.mailbox.destroy();
        for handle in self.workers.lock().expect("workers mutex poisoned").drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Plant {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// One plant worker's body: pop, time, run, free, repeat until the cancellation token
/// trips or the mailbox is destroyed. Mirrors `worker_loop_without_time_control` when
/// `max_task_execution_time` is zero and `worker_loop_with_time_control` otherwise.
fn worker_loop(
    mailbox: Arc<Mailbox<Runnable>>,
    cancel: CancellationToken,
    exception_handler: Arc<dyn Fn(HighwayError) + Send + Sync>,
    max_task_execution_time: std::time::Duration,
    worker_name: String,
) {
    while !cancel.is_cancelled() {
        let Some((index, mut runnable)) = mailbox.pop_message() else {
            return;
        };
        let (file, line) = (runnable.file(), runnable.line());
        let start = Instant::now();
        let result = catch_unwind(AssertUnwindSafe(|| runnable.run(&cancel)));
        let elapsed = start.elapsed();
        mailbox.free(index);

        if let Err(payload) = result {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            exception_handler(HighwayError::TaskPanicked {
                highway: worker_name.clone(),
                file,
                line,
                message,
            });
        }

        if !max_task_execution_time.is_zero() && elapsed > max_task_execution_time {
            exception_handler(HighwayError::Stalled {
                highway: worker_name.clone(),
                stall: elapsed,
            });
        }
    }
}
