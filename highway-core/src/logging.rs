// Copyright (c) 2026 thread_highways contributors. Licensed under Apache License, Version 2.0.

//! Optional tracing setup for highway lifecycles and task dispatch.
//!
//! A plain config struct with `install_thread_local()` (for tests, one subscriber per
//! thread) and `install_global()` (for apps, set once). Neither is called automatically —
//! a crate that never calls either gets `tracing`'s built-in no-op subscriber, so the
//! runtime behaves identically whether or not logging is configured.

use std::path::PathBuf;

use tracing::level_filters::LevelFilter;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

/// Where tracing output goes.
#[derive(Debug, Clone)]
pub enum LogWriter {
    Stdout,
    Stderr,
    /// Rolling-free single file at this path, opened in append mode.
    File(PathBuf),
}

/// Tracing configuration for a process or test that wants highway diagnostics.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub writer: LogWriter,
    pub level: LevelFilter,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            writer: LogWriter::Stderr,
            level: LevelFilter::INFO,
        }
    }
}

/// Handle returned by [`LoggingConfig::install_global`] when writing to a file; dropping
/// it flushes the background writer thread. Stdout/stderr writers return `None`.
pub type FileGuard = Option<WorkerGuard>;

impl LoggingConfig {
    /// Installs a subscriber local to the calling thread. Intended for tests: each test
    /// thread can install its own sink without racing a process-global subscriber.
    pub fn install_thread_local(self) -> miette::Result<tracing::dispatcher::DefaultGuard> {
        let (layer, _guard) = self.build_layer()?;
        Ok(tracing_subscriber::registry().with(layer).set_default())
    }

    /// Installs the process-wide default subscriber. Can only be called once per process;
    /// a second call returns an error rather than panicking.
    pub fn install_global(self) -> miette::Result<FileGuard> {
        let (layer, guard) = self.build_layer()?;
        tracing_subscriber::registry()
            .with(layer)
            .try_init()
            .map_err(|e| miette::miette!("tracing subscriber already installed: {e}"))?;
        Ok(guard)
    }

    fn build_layer(
        self,
    ) -> miette::Result<(
        Box<dyn tracing_subscriber::Layer<tracing_subscriber::Registry> + Send + Sync>,
        FileGuard,
    )> {
        use tracing_subscriber::fmt::Layer;
        let level = self.level;
        match self.writer {
            LogWriter::Stdout => {
                let layer = Layer::new().with_writer(std::io::stdout).with_filter(level);
                Ok((Box::new(layer), None))
            }
            LogWriter::Stderr => {
                let layer = Layer::new().with_writer(std::io::stderr).with_filter(level);
                Ok((Box::new(layer), None))
            }
            LogWriter::File(path) => {
                let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
                let file_name = path
                    .file_name()
                    .ok_or_else(|| miette::miette!("log path has no file name: {path:?}"))?;
                let appender = tracing_appender::rolling::never(dir, file_name);
                let (non_blocking, guard) = tracing_appender::non_blocking(appender);
                let layer = Layer::new()
                    .with_ansi(false)
                    .with_writer(non_blocking)
                    .with_filter(level);
                Ok((Box::new(layer), Some(guard)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_logs_to_stderr_at_info() {
        let cfg = LoggingConfig::default();
        assert!(matches!(cfg.writer, LogWriter::Stderr));
        assert_eq!(cfg.level, LevelFilter::INFO);
    }

    #[test]
    fn thread_local_install_does_not_panic() {
        let guard = LoggingConfig {
            writer: LogWriter::Stdout,
            level: LevelFilter::DEBUG,
        }
        .install_thread_local();
        assert!(guard.is_ok());
    }
}
