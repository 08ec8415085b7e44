use crate::config::Config;
use crate::logger::{default_logger, LoggerRef};
use crate::measurements::{Results, Stats};
use crate::protocol::{checksum, write_frame, Command, FrameHeader, HEADER_SIZE};
use crate::reader::read_frame;
use crate::session::{receive, Session, SessionOptions};
use crate::socket::bind_interface;
use crate::{Error, Result};
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpSocket, TcpStream};
use tokio_util::sync::CancellationToken;

/// How long a failed write waits for an error report from the server.
const REMOTE_ERROR_GRACE: Duration = Duration::from_millis(500);

/// Throughput test client.
///
/// Dials the server and streams `Data` frames for the configured duration.
/// Every `ping_interval` it sends a `Ping` and waits for the `Pong`, which
/// reports how much the server has actually received.
///
/// # Examples
///
/// ```no_run
/// use pperf::{Client, Config};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Config::client("192.168.1.100".to_string(), 5201)
///     .with_duration(Duration::from_secs(10));
///
/// let client = Client::new(config)?;
/// let results = client.run().await?;
/// println!("upload: {}", results.upload);
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: Config,
    logger: LoggerRef,
    cancellation_token: CancellationToken,
}

impl Client {
    /// Creates a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration has no target or fails
    /// [`Config::validate`].
    pub fn new(config: Config) -> Result<Self> {
        if config.target.is_none() {
            return Err(Error::Config(
                "Server address is required for client mode".to_string(),
            ));
        }
        config.validate()?;

        Ok(Self {
            config,
            logger: default_logger(),
            cancellation_token: CancellationToken::new(),
        })
    }

    pub fn with_logger(mut self, logger: LoggerRef) -> Self {
        self.logger = logger;
        self
    }

    /// Returns a reference to the cancellation token.
    ///
    /// Cancelling it ends the sending phase early. The client still collects
    /// the server's final totals before returning.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use pperf::{Client, Config};
    /// use std::time::Duration;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
    /// let client = Client::new(Config::client("127.0.0.1".to_string(), 5201))?;
    /// let cancel_token = client.cancellation_token().clone();
    ///
    /// tokio::spawn(async move {
    ///     tokio::time::sleep(Duration::from_secs(5)).await;
    ///     cancel_token.cancel();
    /// });
    ///
    /// client.run().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation_token
    }

    /// Runs one test against the configured server.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Dial`] if the server cannot be reached, and any
    /// session error that ends the run.
    pub async fn run(&self) -> Result<Results> {
        let target = self
            .config
            .target
            .as_ref()
            .ok_or_else(|| Error::Config("Server address not set".to_string()))?;
        let full_addr = format!("{}:{}", target, self.config.port);

        self.logger
            .info(&format!("Connecting to pperf server at {}", full_addr));
        let mut stream = self.dial(&full_addr).await?;
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| full_addr.clone());
        self.logger.info(&format!("Connected to {}", peer));

        let options = SessionOptions::from_config(&self.config, peer.clone());
        let mut session = Session::new();
        let sent = self.stream_frames(&mut stream, &mut session, &options).await?;

        stream
            .shutdown()
            .await
            .map_err(|e| Error::write("shutdown", e))?;

        // Before any pong the server's view is unknown; fall back to ours.
        let upload = if session.send().total > 0 || session.send().elapsed_ms > 0 {
            session.send().stats()
        } else {
            sent
        };

        let results = Results {
            address: peer,
            download: session.recv().stats(),
            upload,
            err: None,
        };
        self.logger.info(&format!(
            "Test completed for {}: upload {}",
            results.address, results.upload
        ));
        Ok(results)
    }

    async fn dial(&self, full_addr: &str) -> Result<TcpStream> {
        let dial_err = |source| Error::Dial {
            addr: full_addr.to_string(),
            source,
        };

        let mut last_err = None;
        for addr in lookup_host(full_addr).await.map_err(dial_err)? {
            match self.connect(addr).await {
                Ok(stream) => return Ok(stream),
                Err(e) => last_err = Some(e),
            }
        }

        Err(dial_err(last_err.unwrap_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "address resolved to no hosts",
            )
        })))
    }

    async fn connect(&self, addr: SocketAddr) -> std::io::Result<TcpStream> {
        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        bind_interface(&socket, self.config.interface.as_deref(), &self.logger)?;
        let stream = socket.connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    /// Sends data frames until the duration passes or the run is cancelled,
    /// pinging the server along the way.
    ///
    /// Returns the client's own view of what it sent.
    async fn stream_frames(
        &self,
        stream: &mut TcpStream,
        session: &mut Session,
        options: &SessionOptions,
    ) -> Result<Stats> {
        let payload: Vec<u8> = (0..self.config.block_size - HEADER_SIZE)
            .map(|i| i as u8)
            .collect();
        let crc = checksum(&payload);
        let frame_size = self.config.block_size as u64;

        let start = Instant::now();
        let mut next_ping = start + self.config.ping_interval;
        let mut count = 0u64;
        let mut total = 0u64;

        while start.elapsed() < self.config.duration {
            if self.cancellation_token.is_cancelled() {
                self.logger.info("Test cancelled by user");
                break;
            }

            // the reset frame is not counted on either side
            let sent = if count == 0 { 0 } else { total + frame_size };
            let elapsed = start.elapsed().as_millis() as u64;
            let header = FrameHeader::data(count, sent, elapsed).with_payload(payload.len(), crc);
            if let Err(e) = write_frame(stream, &header, &payload).await {
                return Err(self.remote_or(stream, e).await);
            }
            total = sent;
            count += 1;

            if Instant::now() >= next_ping {
                let elapsed = start.elapsed().as_millis() as u64;
                self.ping(stream, session, options, count, total, elapsed)
                    .await?;
                count += 1;
                next_ping = Instant::now() + self.config.ping_interval;
            }
        }

        let elapsed = start.elapsed().as_millis() as u64;
        if count > 0 {
            self.ping(stream, session, options, count, total, elapsed)
                .await?;
        }

        Ok(Stats::from_totals(total, elapsed))
    }

    /// Swaps a write failure for the server's own error report when one is
    /// already waiting on the connection.
    async fn remote_or(&self, stream: &mut TcpStream, err: Error) -> Error {
        let deadline = tokio::time::Instant::now() + REMOTE_ERROR_GRACE;
        match read_frame(stream, self.config.block_size, Some(deadline)).await {
            Ok(frame) if frame.header.command == Command::Error => {
                let remote = Error::Remote(frame.message());
                self.logger.error(&remote.to_string());
                remote
            }
            _ => err,
        }
    }

    /// Sends a `Ping` and reads frames until the matching `Pong` arrives.
    async fn ping(
        &self,
        stream: &mut TcpStream,
        session: &mut Session,
        options: &SessionOptions,
        count: u64,
        total: u64,
        elapsed: u64,
    ) -> Result<()> {
        let ping = FrameHeader::ping(count, total, elapsed);
        if let Err(e) = write_frame(stream, &ping, &[]).await {
            return Err(self.remote_or(stream, e).await);
        }

        loop {
            match receive(stream, session, options, self.logger.as_ref()).await {
                Ok(Command::Pong) => break,
                Ok(other) => {
                    self.logger
                        .debug(&format!("Ignoring {:?} frame while waiting for pong", other));
                }
                Err(Error::PeerClosed) => {
                    return Err(Error::read(
                        0,
                        HEADER_SIZE,
                        std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            "server closed before answering ping",
                        ),
                    ))
                }
                Err(e) => return Err(e),
            }
        }

        let send = session.send();
        self.logger.info(&format!(
            "[{}] {:4} sec  server received {}",
            options.label,
            send.elapsed_ms / 1000,
            send.stats()
        ));
        Ok(())
    }
}

/// Runs the role described by `config` and folds any error into the result.
///
/// In server mode this only returns if the listener cannot be set up.
///
/// # Examples
///
/// ```no_run
/// use pperf::{pperf, Config};
///
/// # #[tokio::main]
/// # async fn main() {
/// let results = pperf(Config::client("127.0.0.1".to_string(), 5201)).await;
/// match results.err {
///     Some(e) => eprintln!("test failed: {}", e),
///     None => println!("{}: {}", results.address, results.upload),
/// }
/// # }
/// ```
pub async fn pperf(config: Config) -> Results {
    pperf_with_logger(config, default_logger()).await
}

/// Like [`pperf`], with an explicit logger.
pub async fn pperf_with_logger(config: Config, logger: LoggerRef) -> Results {
    match config.mode {
        crate::config::Mode::Server => {
            let server = crate::Server::new(config).with_logger(logger);
            match server.run().await {
                Ok(()) => Results::default(),
                Err(e) => Results::failed(e),
            }
        }
        crate::config::Mode::Client => {
            let client = match Client::new(config) {
                Ok(client) => client.with_logger(logger),
                Err(e) => return Results::failed(e),
            };
            match client.run().await {
                Ok(results) => results,
                Err(e) => Results::failed(e),
            }
        }
    }
}
