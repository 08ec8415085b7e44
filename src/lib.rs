//! pperf - point-to-point network throughput tester
//!
//! One side listens, the other connects and streams framed, checksummed
//! blocks of data. Both sides compute live bandwidth statistics: bytes
//! transferred, elapsed time, bytes/sec and Mbit/s.
//!
//! # Features
//!
//! - Fixed big-endian frame header with a CRC-16 over the payload
//! - Exact-length reads with per-frame deadlines
//! - Ping/pong exchange so the sender learns what actually arrived
//! - One task per connection on the server; no shared session state
//! - Asynchronous I/O using tokio
//!
//! # Examples
//!
//! ```no_run
//! use pperf::{pperf, Config};
//! use std::time::Duration;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = Config::client("127.0.0.1".to_string(), 5201)
//!     .with_duration(Duration::from_secs(5));
//! let results = pperf(config).await;
//! println!("upload {}", results.upload);
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod logger;
pub mod measurements;
pub mod protocol;
pub mod reader;
pub mod server;
pub mod session;
mod socket;

pub use client::{pperf, pperf_with_logger, Client};
pub use config::{Config, Mode};
pub use error::{Error, Result};
pub use logger::{LogLogger, Logger};
pub use measurements::{Results, Stats};
pub use server::Server;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
