// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! Error types for highway setup, lifecycle and task dispatch.
//!
//! `thiserror` supplies the `Display`/`Error` boilerplate, `miette::Diagnostic` stable
//! codes and platform-conditional remediation text.

use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

/// Failures surfaced to a highway's `exception_handler` during task dispatch.
///
/// These never escape the highway boundary on their own — they are always routed through
/// the configured handler (see [`crate::config::HighwayConfig::exception_handler`]).
#[derive(Debug, Error, Diagnostic)]
pub enum HighwayError {
    #[error("{highway}: task at {file}:{line} panicked: {message}")]
    #[diagnostic(code(thread_highways::highway::task_panicked))]
    TaskPanicked {
        highway: String,
        file: &'static str,
        line: u32,
        message: String,
    },

    #[error("{highway}: stuck for {stall:?}")]
    #[diagnostic(
        code(thread_highways::highway::stalled),
        help("the running task is not respecting the cancellation token; the watchdog is about to spawn a replacement worker")
    )]
    Stalled { highway: String, stall: Duration },

    #[error("{highway}: repair budget exhausted after {attempted} attempt(s)")]
    #[diagnostic(
        code(thread_highways::highway::repair_budget_exhausted),
        help("raise max_repairs or find the task that is ignoring the cancellation token")
    )]
    RepairBudgetExhausted { highway: String, attempted: u8 },

    #[error("operation attempted on an already-destroyed highway")]
    #[diagnostic(code(thread_highways::highway::already_destroyed))]
    AlreadyDestroyed,
}

/// Failures that can occur while constructing a [`crate::highway::Highway`] or
/// [`crate::manager::HighwaysManager`].
#[derive(Debug, Error, Diagnostic)]
pub enum SetupError {
    #[error("failed to spawn worker thread")]
    #[diagnostic(code(thread_highways::setup::thread_spawn))]
    #[cfg_attr(
        target_os = "linux",
        diagnostic(help("check `ulimit -u` for the max-user-processes limit"))
    )]
    #[cfg_attr(
        target_os = "macos",
        diagnostic(help("check `launchctl limit maxproc`"))
    )]
    ThreadSpawn(#[source] std::io::Error),

    #[error("{which} mutex was poisoned by a panicking holder")]
    #[diagnostic(code(thread_highways::setup::mutex_poisoned))]
    MutexPoisoned { which: &'static str },
}

/// Failures from [`crate::manager::HighwaysManager`] lease operations.
#[derive(Debug, Error, Diagnostic)]
pub enum ManagerError {
    #[error("no highways available to satisfy the lease")]
    #[diagnostic(code(thread_highways::manager::no_highways_available))]
    NoHighwaysAvailable,

    #[error("requested load {requested}% exceeds the configured maximum of {max} highways")]
    #[diagnostic(code(thread_highways::manager::capacity_exceeded))]
    CapacityExceeded { requested: u32, max: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_panicked_formats_with_call_site() {
        let err = HighwayError::TaskPanicked {
            highway: "render".into(),
            file: "src/main.rs",
            line: 42,
            message: "boom".into(),
        };
        assert_eq!(
            err.to_string(),
            "render: task at src/main.rs:42 panicked: boom"
        );
    }

    #[test]
    fn already_destroyed_has_stable_code() {
        use miette::Diagnostic as _;
        let err = HighwayError::AlreadyDestroyed;
        assert_eq!(
            err.code().map(|c| c.to_string()),
            Some("thread_highways::highway::already_destroyed".to_string())
        );
    }
}
