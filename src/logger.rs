//! Logger handle passed into the server, client and session loop.
//!
//! Sessions never log through a process-wide singleton. They log through an
//! `Arc<dyn Logger>` that the caller supplies, so each session's failure path
//! can be observed in isolation.
//!
//! # Examples
//!
//! ```
//! use pperf::logger::Logger;
//! use log::Level;
//!
//! let logger = |level: Level, message: &str| eprintln!("[{}] {}", level, message);
//! logger.info("session started");
//! ```

use log::Level;
use std::sync::Arc;

/// Sink for log lines produced by the protocol core.
///
/// Implemented for any `Fn(Level, &str)` closure.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: &str);

    fn error(&self, message: &str) {
        self.log(Level::Error, message)
    }

    fn warn(&self, message: &str) {
        self.log(Level::Warn, message)
    }

    fn info(&self, message: &str) {
        self.log(Level::Info, message)
    }

    fn debug(&self, message: &str) {
        self.log(Level::Debug, message)
    }
}

impl<F> Logger for F
where
    F: Fn(Level, &str) + Send + Sync,
{
    fn log(&self, level: Level, message: &str) {
        self(level, message)
    }
}

/// Forwards to the `log` facade under the `pperf` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLogger;

impl Logger for LogLogger {
    fn log(&self, level: Level, message: &str) {
        log::log!(target: "pperf", level, "{}", message);
    }
}

pub type LoggerRef = Arc<dyn Logger>;

/// The default logger: the `log` facade.
pub fn default_logger() -> LoggerRef {
    Arc::new(LogLogger)
}
