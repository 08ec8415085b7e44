//! Exact-length reads over a byte stream that may deliver data in arbitrary
//! chunks.

use crate::protocol::{decode_header, Frame, HEADER_SIZE};
use crate::{Error, Result};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::{self, Instant};

/// Reads exactly `n` bytes from `reader`.
///
/// Short reads are retried for the remaining count. A read that returns zero
/// bytes means the stream ended and fails with [`Error::ConnectionRead`]
/// carrying [`io::ErrorKind::UnexpectedEof`].
pub async fn read_exact<R: AsyncRead + Unpin>(reader: &mut R, n: usize) -> Result<Vec<u8>> {
    read_exact_until(reader, n, None).await
}

/// Like [`read_exact`], with every read bounded by `deadline`.
///
/// A read still pending at the deadline fails with
/// [`io::ErrorKind::TimedOut`].
pub async fn read_exact_until<R: AsyncRead + Unpin>(
    reader: &mut R,
    n: usize,
    deadline: Option<Instant>,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut have = 0;

    while have < n {
        let read = match deadline {
            Some(deadline) => match time::timeout_at(deadline, reader.read(&mut buf[have..])).await
            {
                Ok(read) => read,
                Err(_) => {
                    return Err(Error::read(
                        have,
                        n,
                        io::Error::new(io::ErrorKind::TimedOut, "read deadline exceeded"),
                    ))
                }
            },
            None => reader.read(&mut buf[have..]).await,
        };

        match read {
            Ok(0) => {
                return Err(Error::read(
                    have,
                    n,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed"),
                ))
            }
            Ok(add) => have += add,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(Error::read(have, n, e)),
        }
    }

    Ok(buf)
}

/// Reads, decodes and validates one frame.
///
/// The header's magic and size are checked before the payload is read, so an
/// oversized `size` field never causes an allocation. A stream that ends
/// before the first header byte yields [`Error::PeerClosed`].
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
    deadline: Option<Instant>,
) -> Result<Frame> {
    let header_bytes = match read_exact_until(reader, HEADER_SIZE, deadline).await {
        Ok(bytes) => bytes,
        Err(Error::ConnectionRead { read: 0, source, .. })
            if source.kind() == io::ErrorKind::UnexpectedEof =>
        {
            return Err(Error::PeerClosed)
        }
        Err(e) => return Err(e),
    };

    let header = decode_header(&header_bytes)?;
    header.validate(max_size)?;

    let payload = match header.payload_len() {
        0 => Vec::new(),
        len => read_exact_until(reader, len, deadline).await?,
    };
    header.verify_payload(&payload)?;

    Ok(Frame { header, payload })
}
