use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// The server could not bind or listen. Fatal to the server.
    #[error("Listen error on {addr}: {source}")]
    ListenSetup {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A single `accept` failed. The accept loop logs it and keeps going.
    #[error("Accept error: {0}")]
    Accept(#[source] std::io::Error),

    #[error("Dial error to {addr}: {source}")]
    Dial {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// A read failed after `read` of `wanted` bytes had been assembled.
    #[error("Read error after {read} of {wanted} bytes: {source}")]
    ConnectionRead {
        read: usize,
        wanted: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Write error ({context}): {source}")]
    ConnectionWrite {
        context: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed header: need {expected} bytes, got {actual}")]
    MalformedHeader { expected: usize, actual: usize },

    #[error("Received frame with wrong magic 0x{0:08x}")]
    WrongMagic(u32),

    #[error("Received frame with invalid size {size} (allowed {min}..={max})")]
    InvalidFrameSize { size: u32, min: u32, max: u32 },

    #[error("Received wrong data crc: header 0x{expected:04x}, payload 0x{actual:04x}")]
    ChecksumMismatch { expected: u16, actual: u16 },

    #[error("Received frame with unknown command {0}")]
    UnknownCommand(u16),

    /// The peer sent an error report frame before closing.
    #[error("Peer reported error: {0}")]
    Remote(String),

    /// The peer closed the connection on a frame boundary.
    #[error("Peer closed the connection")]
    PeerClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the peer should be told about this error with an error frame.
    ///
    /// Errors that originate from the peer, or that mean the connection can no
    /// longer carry a frame, are not echoed back.
    pub fn is_reportable(&self) -> bool {
        !matches!(
            self,
            Error::Remote(_) | Error::PeerClosed | Error::ConnectionWrite { .. }
        )
    }

    pub(crate) fn read(read: usize, wanted: usize, source: std::io::Error) -> Self {
        Error::ConnectionRead {
            read,
            wanted,
            source,
        }
    }

    pub(crate) fn write(context: &'static str, source: std::io::Error) -> Self {
        Error::ConnectionWrite { context, source }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
