//! Binary frame format for the pperf wire protocol.
//!
//! Every message on the wire is a frame: a fixed 36-byte header followed by an
//! optional payload.
//!
//! ```text
//! offset  field     size  notes
//! 0       magic     4     0x70706572 ("pper")
//! 4       size      4     total frame length including the header
//! 8       crc       2     CRC-16/IBM-3740 of the payload only
//! 10      command   2     Data | Ping | Pong | Error
//! 12      count     8     sequence number, 0 = start of a new session
//! 20      total     8     sender's cumulative byte total
//! 28      elapsed   8     sender's cumulative elapsed milliseconds
//! 36      payload   size - 36
//! ```
//!
//! All integers are big-endian.
//!
//! # Examples
//!
//! ```
//! use pperf::protocol::{checksum, decode_header, encode, FrameHeader, HEADER_SIZE};
//!
//! let payload = vec![7u8; 1000];
//! let bytes = encode(&FrameHeader::data(1, 1036, 20), &payload);
//!
//! let header = decode_header(&bytes).unwrap();
//! assert_eq!(header.size as usize, HEADER_SIZE + payload.len());
//! assert_eq!(header.crc, checksum(&payload));
//! ```

use crate::{Error, Result};
use crc::{Crc, CRC_16_IBM_3740};
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Sentinel at the start of every frame.
pub const MAGIC: u32 = 0x7070_6572;

/// Size of the encoded frame header in bytes.
pub const HEADER_SIZE: usize = 36;

/// Default frame size, and the default upper bound on accepted frames.
pub const DEFAULT_BLOCK_SIZE: usize = 128 * 1024;

/// Largest block size a configuration may ask for.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024;

const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Computes the frame checksum over payload bytes.
///
/// Header fields are never part of the checksum.
pub fn checksum(payload: &[u8]) -> u16 {
    CRC16.checksum(payload)
}

/// Purpose of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Command {
    /// Ordinary throughput-test payload
    Data = 1,
    /// Request for the peer's running totals
    Ping = 2,
    /// Reply carrying the sender's own receive totals
    Pong = 3,
    /// Protocol or connection failure report, sent before closing
    Error = 4,
}

impl TryFrom<u16> for Command {
    type Error = Error;

    fn try_from(value: u16) -> Result<Self> {
        match value {
            1 => Ok(Command::Data),
            2 => Ok(Command::Ping),
            3 => Ok(Command::Pong),
            4 => Ok(Command::Error),
            other => Err(Error::UnknownCommand(other)),
        }
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub size: u32,
    pub crc: u16,
    pub command: Command,
    pub count: u64,
    pub total: u64,
    pub elapsed: u64,
}

impl FrameHeader {
    /// Creates a header with no payload.
    ///
    /// `size` and `crc` describe an empty payload until [`encode`] or
    /// [`FrameHeader::with_payload`] fills them in.
    pub fn new(command: Command, count: u64, total: u64, elapsed: u64) -> Self {
        Self {
            magic: MAGIC,
            size: HEADER_SIZE as u32,
            crc: checksum(&[]),
            command,
            count,
            total,
            elapsed,
        }
    }

    pub fn data(count: u64, total: u64, elapsed: u64) -> Self {
        Self::new(Command::Data, count, total, elapsed)
    }

    pub fn ping(count: u64, total: u64, elapsed: u64) -> Self {
        Self::new(Command::Ping, count, total, elapsed)
    }

    pub fn pong(count: u64, total: u64, elapsed: u64) -> Self {
        Self::new(Command::Pong, count, total, elapsed)
    }

    /// Header for an error report. The counters are unused and left at zero.
    pub fn error() -> Self {
        Self::new(Command::Error, 0, 0, 0)
    }

    /// Sets `size` and `crc` from a payload length and its precomputed checksum.
    ///
    /// The client streams the same payload for a whole run, so it checksums
    /// it once and stamps every header with the result.
    pub fn with_payload(mut self, payload_len: usize, crc: u16) -> Self {
        self.size = (HEADER_SIZE + payload_len) as u32;
        self.crc = crc;
        self
    }

    /// Number of payload bytes that follow this header.
    pub fn payload_len(&self) -> usize {
        (self.size as usize).saturating_sub(HEADER_SIZE)
    }

    /// Encodes the header in network byte order.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..8].copy_from_slice(&self.size.to_be_bytes());
        buf[8..10].copy_from_slice(&self.crc.to_be_bytes());
        buf[10..12].copy_from_slice(&(self.command as u16).to_be_bytes());
        buf[12..20].copy_from_slice(&self.count.to_be_bytes());
        buf[20..28].copy_from_slice(&self.total.to_be_bytes());
        buf[28..36].copy_from_slice(&self.elapsed.to_be_bytes());
        buf
    }

    /// Checks the magic and the size bounds.
    ///
    /// Runs before any payload is read, so a corrupt or hostile `size` never
    /// drives an allocation larger than `max_size`.
    pub fn validate(&self, max_size: usize) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::WrongMagic(self.magic));
        }
        let size = self.size as usize;
        if size < HEADER_SIZE || size > max_size {
            return Err(Error::InvalidFrameSize {
                size: self.size,
                min: HEADER_SIZE as u32,
                max: max_size.min(u32::MAX as usize) as u32,
            });
        }
        Ok(())
    }

    /// Checks the header's `crc` against the received payload.
    pub fn verify_payload(&self, payload: &[u8]) -> Result<()> {
        let actual = checksum(payload);
        if actual != self.crc {
            return Err(Error::ChecksumMismatch {
                expected: self.crc,
                actual,
            });
        }
        Ok(())
    }
}

/// Decodes the fixed-width header fields from the front of `bytes`.
///
/// The magic is checked before any other field is interpreted, so a foreign
/// or misaligned stream fails with [`Error::WrongMagic`]. Size bounds are
/// checked by [`FrameHeader::validate`].
pub fn decode_header(bytes: &[u8]) -> Result<FrameHeader> {
    if bytes.len() < HEADER_SIZE {
        return Err(Error::MalformedHeader {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }

    let u16_at = |at: usize| u16::from_be_bytes([bytes[at], bytes[at + 1]]);
    let u32_at = |at: usize| {
        let mut b = [0u8; 4];
        b.copy_from_slice(&bytes[at..at + 4]);
        u32::from_be_bytes(b)
    };
    let u64_at = |at: usize| {
        let mut b = [0u8; 8];
        b.copy_from_slice(&bytes[at..at + 8]);
        u64::from_be_bytes(b)
    };

    let magic = u32_at(0);
    if magic != MAGIC {
        return Err(Error::WrongMagic(magic));
    }

    Ok(FrameHeader {
        magic,
        size: u32_at(4),
        crc: u16_at(8),
        command: Command::try_from(u16_at(10))?,
        count: u64_at(12),
        total: u64_at(20),
        elapsed: u64_at(28),
    })
}

/// Encodes a header and payload into one buffer.
///
/// `size` and `crc` in the output always describe `payload`, whatever the
/// passed header said.
pub fn encode(header: &FrameHeader, payload: &[u8]) -> Vec<u8> {
    let header = header.with_payload(payload.len(), checksum(payload));
    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    buf.extend_from_slice(&header.to_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// A decoded frame: header plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(header: FrameHeader, payload: Vec<u8>) -> Self {
        let header = header.with_payload(payload.len(), checksum(&payload));
        Self { header, payload }
    }

    /// Builds the error report frame for `err`.
    ///
    /// The message is truncated on a character boundary so the frame never
    /// exceeds `max_size`.
    pub fn error_report(err: &Error, max_size: usize) -> Self {
        let message = err.to_string();
        let room = max_size.saturating_sub(HEADER_SIZE);
        let mut end = message.len().min(room);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        Frame::new(
            FrameHeader::error(),
            message.as_bytes()[..end].to_vec(),
        )
    }

    /// Returns the payload of an error frame as text.
    pub fn message(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        encode(&self.header, &self.payload)
    }
}

/// Writes an encoded frame to `writer`.
///
/// `header` is written as given. Use [`encode`] or [`Frame::new`] to get a
/// header whose `size` and `crc` match the payload.
///
/// # Errors
///
/// Returns [`Error::ConnectionWrite`] if the write fails.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    header: &FrameHeader,
    payload: &[u8],
) -> Result<()> {
    let context = match header.command {
        Command::Data => "data",
        Command::Ping => "ping",
        Command::Pong => "pong",
        Command::Error => "error report",
    };
    writer
        .write_all(&header.to_bytes())
        .await
        .map_err(|e| Error::write(context, e))?;
    if !payload.is_empty() {
        writer
            .write_all(payload)
            .await
            .map_err(|e| Error::write(context, e))?;
    }
    writer.flush().await.map_err(|e| Error::write(context, e))?;
    Ok(())
}
