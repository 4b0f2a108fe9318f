// ABOUTME: TCP connection management for the proprietary inference-server transport
// ABOUTME: Implements frame-based I/O with buffering plus the split reader/writer used by streams

use crate::address::ServerAddress;
use crate::client::error::{ClientError, Result};
use crate::codec;
use bytes::{Bytes, BytesMut};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// How many times a connect is attempted before giving up.
const CONNECT_ATTEMPTS: usize = 3;

/// Resolve the address over IPv4 DNS and connect, retrying up to
/// [`CONNECT_ATTEMPTS`] times with each attempt bounded by `timeout`.
pub async fn connect_with_retry(
    address: &ServerAddress,
    timeout: Duration,
) -> Result<TcpStream> {
    let targets: Vec<SocketAddr> = tokio::net::lookup_host(address.authority())
        .await?
        .filter(SocketAddr::is_ipv4)
        .collect();
    if targets.is_empty() {
        return Err(ClientError::System(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("no IPv4 address found for '{}'", address.host()),
        )));
    }

    let mut last_err = None;
    for attempt in 1..=CONNECT_ATTEMPTS {
        match tokio::time::timeout(timeout, TcpStream::connect(&targets[..])).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => {
                tracing::warn!(attempt, error = %e, "connect to {} failed", address);
                last_err = Some(ClientError::System(e));
            }
            Err(_) => {
                tracing::warn!(attempt, "connect to {} timed out", address);
                last_err = Some(ClientError::Timeout(format!(
                    "connect to {address} timed out after {timeout:?}"
                )));
            }
        }
    }
    Err(last_err.expect("at least one attempt was made"))
}

/// A buffered frame-level connection, used for the command socket.
///
/// Write-side buffering comes from tokio's `BufWriter`; the read side
/// accumulates into a `BytesMut` until the codec can split a full frame
/// off the front. Data left over after a parsed frame stays buffered for
/// the next call.
#[derive(Debug)]
pub struct Connection {
    stream: BufWriter<TcpStream>,
    buffer: BytesMut,
}

impl Connection {
    /// Create a new `Connection`, backed by `socket`.
    pub fn new(socket: TcpStream) -> Connection {
        Connection {
            stream: BufWriter::new(socket),
            buffer: BytesMut::with_capacity(4 * 1024),
        }
    }

    /// Read a single frame payload from the underlying stream.
    ///
    /// Waits until enough data has arrived to parse one frame. Returns
    /// `None` when the peer closes the connection on a frame boundary;
    /// a close mid-frame is an error.
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(payload) = codec::take_frame(&mut self.buffer)? {
                return Ok(Some(payload));
            }

            if 0 == self.stream.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(ClientError::OperationFailed(
                        "connection reset by peer".into(),
                    ))
                };
            }
        }
    }

    /// Write a single frame: length prefix first, then the payload, as
    /// two writes on the buffered stream, flushed to the socket.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.stream
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Split into the stream-channel halves, carrying over any bytes that
    /// were read past the last parsed frame.
    pub fn into_split(self) -> (FrameReader, FrameWriter) {
        let (read, write) = self.stream.into_inner().into_split();
        (
            FrameReader {
                half: read,
                buffer: self.buffer,
            },
            FrameWriter { half: write },
        )
    }
}

/// Read half of a stream-channel socket, owned by the receiver task.
#[derive(Debug)]
pub struct FrameReader {
    half: OwnedReadHalf,
    buffer: BytesMut,
}

impl FrameReader {
    /// Same contract as [`Connection::read_frame`].
    pub async fn read_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(payload) = codec::take_frame(&mut self.buffer)? {
                return Ok(Some(payload));
            }

            if 0 == self.half.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(ClientError::OperationFailed(
                        "connection reset by peer".into(),
                    ))
                };
            }
        }
    }
}

/// Write half of a stream-channel socket, owned by the submitting side.
#[derive(Debug)]
pub struct FrameWriter {
    half: OwnedWriteHalf,
}

impl FrameWriter {
    /// Write one frame: length prefix, then payload.
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.half
            .write_all(&(payload.len() as u32).to_be_bytes())
            .await?;
        self.half.write_all(payload).await?;
        Ok(())
    }
}
