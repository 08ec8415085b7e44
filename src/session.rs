//! Per-connection session state and receive loop.
//!
//! A [`Session`] is owned by the single task driving one connection. It tracks
//! two running statistics:
//!
//! - `recv`: bytes this side received in `Data` frames, measured locally
//! - `send`: the `total`/`elapsed` figures the peer reports in its own frames
//!
//! A frame with `count == 0` marks the start of a new test run. It resets both
//! statistics and the start time, and its own bytes are not counted.
//!
//! # Examples
//!
//! ```
//! use pperf::protocol::{Frame, FrameHeader};
//! use pperf::session::Session;
//! use std::time::{Duration, Instant};
//!
//! let start = Instant::now();
//! let mut session = Session::starting_at(start);
//!
//! session.apply(Frame::new(FrameHeader::data(0, 0, 0), vec![0; 1000]), start).unwrap();
//! session
//!     .apply(
//!         Frame::new(FrameHeader::data(1, 1036, 1000), vec![0; 1000]),
//!         start + Duration::from_secs(1),
//!     )
//!     .unwrap();
//!
//! assert_eq!(session.recv().total, 1036);
//! assert_eq!(session.recv().bps, 1036);
//! ```

use crate::config::Config;
use crate::logger::Logger;
use crate::measurements::{bytes_per_second, Stats};
use crate::protocol::{write_frame, Command, Frame, FrameHeader};
use crate::reader::read_frame;
use crate::{Error, Result};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time;

/// Running totals for one direction of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub total: u64,
    pub elapsed_ms: u64,
    pub bps: u64,
}

impl Stat {
    fn set(&mut self, total: u64, elapsed_ms: u64) {
        self.total = total;
        self.elapsed_ms = elapsed_ms;
        self.bps = bytes_per_second(total, elapsed_ms);
    }

    pub fn stats(&self) -> Stats {
        Stats::from_totals(self.total, self.elapsed_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No frame received yet
    Uninitialized,
    /// At least one frame received, connection healthy
    Active,
    /// A failure ended the session; no further mutation
    Terminated,
}

#[derive(Debug)]
pub struct Session {
    state: SessionState,
    header: Option<FrameHeader>,
    data: Vec<u8>,
    start: Instant,
    secs: u64,
    last: u64,
    recv: Stat,
    send: Stat,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    /// Creates a session whose clock starts at `start`.
    ///
    /// The clock restarts when a `count == 0` frame arrives.
    pub fn starting_at(start: Instant) -> Self {
        Self {
            state: SessionState::Uninitialized,
            header: None,
            data: Vec::new(),
            start,
            secs: 0,
            last: 0,
            recv: Stat::default(),
            send: Stat::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn recv(&self) -> &Stat {
        &self.recv
    }

    pub fn send(&self) -> &Stat {
        &self.send
    }

    /// Header of the last frame applied.
    pub fn last_header(&self) -> Option<&FrameHeader> {
        self.header.as_ref()
    }

    /// Payload of the last frame applied.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Whole seconds since the run started, as of the last frame.
    pub fn elapsed_secs(&self) -> u64 {
        self.secs
    }

    /// True when the last frame moved the elapsed-seconds counter forward.
    pub fn ticked(&self) -> bool {
        self.secs > self.last
    }

    pub fn terminate(&mut self) {
        self.state = SessionState::Terminated;
    }

    fn reset(&mut self, now: Instant) {
        self.start = now;
        self.secs = 0;
        self.last = 0;
        self.recv = Stat::default();
        self.send = Stat::default();
    }

    /// Feeds one decoded frame into the session.
    ///
    /// Returns the reply to write back, if any. Only a `Ping` with
    /// `count > 0` gets one: a `Pong` carrying this side's receive totals.
    ///
    /// # Errors
    ///
    /// An `Error` frame from the peer terminates the session and returns
    /// [`Error::Remote`] with the peer's message.
    pub fn apply(&mut self, frame: Frame, now: Instant) -> Result<Option<FrameHeader>> {
        if self.state == SessionState::Terminated {
            return Ok(None);
        }

        let Frame { header, payload } = frame;
        if header.command == Command::Error {
            self.terminate();
            return Err(Error::Remote(String::from_utf8_lossy(&payload).into_owned()));
        }

        self.state = SessionState::Active;
        self.header = Some(header);
        self.data = payload;

        if header.count == 0 {
            // first frame of a run doesn't count
            self.reset(now);
            return Ok(None);
        }

        let since = now.saturating_duration_since(self.start);
        self.last = self.secs;
        self.secs = since.as_secs();

        let mut total = self.recv.total;
        if header.command == Command::Data {
            total += u64::from(header.size);
        }
        self.recv.set(total, since.as_millis() as u64);
        self.send.set(header.total, header.elapsed);

        match header.command {
            Command::Ping => Ok(Some(FrameHeader::pong(
                header.count,
                self.recv.total,
                self.recv.elapsed_ms,
            ))),
            _ => Ok(None),
        }
    }
}

/// Settings the receive loop needs from the configuration.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Largest frame accepted, header included
    pub max_frame_size: usize,
    /// Deadline for reading each frame
    pub read_timeout: Duration,
    /// Prefix for log lines, usually the peer address
    pub label: String,
}

impl SessionOptions {
    pub fn from_config(config: &Config, label: impl Into<String>) -> Self {
        Self {
            max_frame_size: config.block_size,
            read_timeout: config.read_timeout,
            label: label.into(),
        }
    }
}

/// Logs `err` and tries to tell the peer about it with an error frame.
///
/// The notification is best effort: if it fails, that failure is only logged
/// at debug level. The original error is always returned unchanged.
pub async fn report_error<W: AsyncWrite + Unpin>(
    writer: &mut W,
    err: Error,
    options: &SessionOptions,
    logger: &dyn Logger,
) -> Error {
    logger.error(&format!("[{}] {}", options.label, err));

    if err.is_reportable() {
        let frame = Frame::error_report(&err, options.max_frame_size);
        let sent = time::timeout(
            options.read_timeout,
            write_frame(writer, &frame.header, &frame.payload),
        )
        .await;
        match sent {
            Ok(Ok(())) => {}
            Ok(Err(e)) => logger.debug(&format!(
                "[{}] could not report error to peer: {}",
                options.label, e
            )),
            Err(_) => logger.debug(&format!(
                "[{}] timed out reporting error to peer",
                options.label
            )),
        }
    }

    err
}

/// Reads one frame, applies it to `session` and writes any reply.
///
/// Returns the command of the frame processed. [`Error::PeerClosed`] means
/// the peer closed between frames; it is neither logged nor reported.
pub async fn receive<S>(
    stream: &mut S,
    session: &mut Session,
    options: &SessionOptions,
    logger: &dyn Logger,
) -> Result<Command>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let deadline = time::Instant::now() + options.read_timeout;
    let frame = match read_frame(stream, options.max_frame_size, Some(deadline)).await {
        Ok(frame) => frame,
        Err(Error::PeerClosed) => {
            session.terminate();
            return Err(Error::PeerClosed);
        }
        Err(e) => {
            session.terminate();
            return Err(report_error(stream, e, options, logger).await);
        }
    };

    let command = frame.header.command;
    match session.apply(frame, Instant::now()) {
        Ok(Some(reply)) => {
            if let Err(e) = write_frame(stream, &reply, &[]).await {
                session.terminate();
                return Err(report_error(stream, e, options, logger).await);
            }
        }
        Ok(None) => {}
        Err(e) => return Err(report_error(stream, e, options, logger).await),
    }

    Ok(command)
}

/// Runs the receive loop until the connection ends.
///
/// A close between frames ends the session cleanly. Any other failure
/// terminates it and is returned.
pub async fn run_session<S>(
    stream: &mut S,
    session: &mut Session,
    options: &SessionOptions,
    logger: &dyn Logger,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        match receive(stream, session, options, logger).await {
            Ok(_) => {
                if session.ticked() {
                    logger.info(&format!(
                        "[{}] {:4} sec  recv {}",
                        options.label,
                        session.elapsed_secs(),
                        session.recv().stats()
                    ));
                }
            }
            Err(Error::PeerClosed) => {
                logger.debug(&format!("[{}] peer closed the connection", options.label));
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}
