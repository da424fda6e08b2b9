// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! Worker-thread primitives for `thread_highways`: bounded mailboxes, self-healing
//! single-thread highways, fixed-size plants, and the manager that leases highways out by
//! load.
//!
//! This crate has no notion of dataflow graphs, channels, or nodes — see `highway-flow`
//! for that layer. It only answers "how do I get a closure to run on some worker thread,
//! safely, with bounded memory and a way to recover from a task that never returns."

pub mod config;
pub mod error;
pub mod highway;
pub mod logging;
pub mod mailbox;
pub mod manager;
pub mod plant;
pub mod semaphore;
pub mod slab;
pub mod task;

pub use config::{HighwayConfig, HighwaysManagerConfig, DEFAULT_MAILBOX_CAPACITY};
pub use error::{HighwayError, ManagerError, SetupError};
pub use highway::{Highway, HighwayProxy};
pub use manager::{HighwayLease, HighwaysManager};
pub use plant::Plant;
pub use task::{CancellationToken, ReschedulableRunnable, Runnable, Schedule};
