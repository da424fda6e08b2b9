// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! Construction options for highways and the highways manager.
//!
//! Expressed as plain struct literals rather than a builder: `HighwayConfig` covers a
//! single highway's name, exception handler, stall timeout and mailbox capacity;
//! `HighwaysManagerConfig` covers the pool's worker count, size bounds and
//! auto-regulation flag.

use std::{sync::Arc, time::Duration};

use crate::error::HighwayError;

/// Default mailbox capacity, chosen to comfortably absorb a burst without unbounded growth.
pub const DEFAULT_MAILBOX_CAPACITY: u32 = 65_000;

/// Construction options for a single [`crate::highway::Highway`].
#[derive(Clone)]
pub struct HighwayConfig {
    /// Diagnostic tag embedded in exception / watchdog messages and tracing spans.
    pub name: String,
    /// Invoked for every uncaught task exception or watchdog stall. The default logs via
    /// `tracing::error!` and re-panics.
    pub exception_handler: Arc<dyn Fn(HighwayError) + Send + Sync>,
    /// `Duration::ZERO` disables the stall watchdog and per-task timing.
    pub max_task_execution_time: Duration,
    /// Maximum concurrently-live holders; caps RAM.
    pub mailbox_capacity: u32,
    /// Cap on watchdog-triggered worker replacements before the highway stops repairing
    /// itself.
    pub max_repairs: u8,
}

impl std::fmt::Debug for HighwayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HighwayConfig")
            .field("name", &self.name)
            .field("exception_handler", &"<fn>")
            .field("max_task_execution_time", &self.max_task_execution_time)
            .field("mailbox_capacity", &self.mailbox_capacity)
            .field("max_repairs", &self.max_repairs)
            .finish()
    }
}

fn default_exception_handler() -> Arc<dyn Fn(HighwayError) + Send + Sync> {
    Arc::new(|err: HighwayError| {
        tracing::error!(%err, "unhandled highway error; re-panicking");
        panic!("{err}");
    })
}

impl Default for HighwayConfig {
    fn default() -> Self {
        Self {
            name: "highway".to_string(),
            exception_handler: default_exception_handler(),
            max_task_execution_time: Duration::ZERO,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            max_repairs: 3,
        }
    }
}

impl HighwayConfig {
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Construction options for a [`crate::manager::HighwaysManager`].
#[derive(Clone, Debug)]
pub struct HighwaysManagerConfig {
    /// Fixed pool of workers dedicated to the shared multi-thread mailbox.
    pub local_workers_count: usize,
    /// The manager never shrinks its single-thread highway pool below this size.
    pub min_highways: usize,
    /// The manager never grows its single-thread highway pool above this size.
    pub max_highways: usize,
    /// Whether the manager may create/destroy highways on its own in response to load.
    pub auto_regulation: bool,
    /// Settings applied to every highway the manager creates. `name` is reused as a
    /// prefix; individual highways get an index suffix.
    pub highway_settings: HighwayConfig,
}

impl Default for HighwaysManagerConfig {
    fn default() -> Self {
        Self {
            local_workers_count: 1,
            min_highways: 1,
            max_highways: usize::MAX,
            auto_regulation: true,
            highway_settings: HighwayConfig::named("HighwaysManager"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_highway_config_matches_spec_defaults() {
        let cfg = HighwayConfig::default();
        assert_eq!(cfg.mailbox_capacity, 65_000);
        assert_eq!(cfg.max_task_execution_time, Duration::ZERO);
        assert_eq!(cfg.max_repairs, 3);
    }

    #[test]
    fn default_manager_config_has_one_local_worker_and_one_min_highway() {
        let cfg = HighwaysManagerConfig::default();
        assert_eq!(cfg.local_workers_count, 1);
        assert_eq!(cfg.min_highways, 1);
        assert!(cfg.auto_regulation);
    }
}
