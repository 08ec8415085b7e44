use crate::protocol::{DEFAULT_BLOCK_SIZE, HEADER_SIZE, MAX_BLOCK_SIZE};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Default port for both roles.
pub const DEFAULT_PORT: u16 = 5201;

/// How long a session waits for a frame before treating the peer as stalled.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Test mode: client or server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// Listens and runs one session per accepted connection
    Server,
    /// Connects to a server and streams data frames to it
    Client,
}

/// Configuration for a pperf run.
///
/// # Examples
///
/// ```
/// use pperf::Config;
/// use std::time::Duration;
///
/// let config = Config::client("192.168.1.100".to_string(), 5201)
///     .with_duration(Duration::from_secs(30))
///     .with_block_size(64 * 1024);
/// assert!(config.validate().is_ok());
///
/// let server = Config::server(5201).with_interface("eth0".to_string());
/// assert_eq!(server.interface.as_deref(), Some("eth0"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server mode or client mode
    pub mode: Mode,

    /// Server address (for client mode)
    pub target: Option<String>,

    /// Port number to use
    pub port: u16,

    /// Test duration (client mode)
    pub duration: Duration,

    /// Network interface to bind the socket to (Linux only)
    pub interface: Option<String>,

    /// Bind address (for server mode)
    pub bind_addr: Option<IpAddr>,

    /// Frame size sent by the client, and the largest frame either side accepts
    pub block_size: usize,

    /// Per-frame read deadline
    pub read_timeout: Duration,

    /// How often the client asks the server for its receive totals
    pub ping_interval: Duration,

    /// Output in JSON format
    pub json: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Client,
            target: None,
            port: DEFAULT_PORT,
            duration: Duration::from_secs(10),
            interface: None,
            bind_addr: None,
            block_size: DEFAULT_BLOCK_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            ping_interval: Duration::from_secs(1),
            json: false,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a server configuration listening on `port`.
    pub fn server(port: u16) -> Self {
        Self {
            mode: Mode::Server,
            port,
            ..Default::default()
        }
    }

    /// Creates a client configuration that dials `target:port`.
    pub fn client(target: String, port: u16) -> Self {
        Self {
            mode: Mode::Client,
            target: Some(target),
            port,
            ..Default::default()
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Binds sockets to a named interface, e.g. `eth0`.
    ///
    /// Only honoured on Linux. Elsewhere it is ignored with a warning.
    pub fn with_interface(mut self, interface: String) -> Self {
        self.interface = Some(interface);
        self
    }

    pub fn with_bind_addr(mut self, bind_addr: IpAddr) -> Self {
        self.bind_addr = Some(bind_addr);
        self
    }

    /// Sets the frame size in bytes, header included.
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn with_ping_interval(mut self, ping_interval: Duration) -> Self {
        self.ping_interval = ping_interval;
        self
    }

    pub fn with_json(mut self, json: bool) -> Self {
        self.json = json;
        self
    }

    /// Checks the settings the protocol core depends on.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if:
    /// - the block size is smaller than one header or above [`MAX_BLOCK_SIZE`]
    /// - the read timeout or ping interval is zero
    /// - client mode has no target
    pub fn validate(&self) -> Result<()> {
        if self.block_size < HEADER_SIZE || self.block_size > MAX_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "block size {} must be between {} and {}",
                self.block_size, HEADER_SIZE, MAX_BLOCK_SIZE
            )));
        }
        if self.read_timeout.is_zero() {
            return Err(Error::Config("read timeout must be non-zero".to_string()));
        }
        if self.ping_interval.is_zero() {
            return Err(Error::Config("ping interval must be non-zero".to_string()));
        }
        if self.mode == Mode::Client && self.target.is_none() {
            return Err(Error::Config(
                "Server address is required for client mode".to_string(),
            ));
        }
        Ok(())
    }
}
