//! Point-to-point connections over 'some' medium.
//! The medium can be anything that implements `AsyncRead`/`AsyncWrite`,
//! with built-in support for TCP and in-memory duplex streams.
//!
//! Payloads are framed with a [`LengthDelimitedCodec`] using an 8-byte header
//! (see [`crate::net::codec`]), and structured messages are serialized with
//! bincode on top of the byte frames.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
};
use tokio_util::{
    bytes::Bytes,
    codec::{FramedRead, FramedWrite, LengthDelimitedCodec},
};

use crate::net::codec::{self, DEFAULT_MAX_FRAME};

pub struct Connection<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> {
    reader: FramedRead<R, LengthDelimitedCodec>,
    writer: FramedWrite<W, LengthDelimitedCodec>,
}

#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error("Deserialization failed: {0}")]
    MalformedMessage(#[from] bincode::Error),
    #[error("Framing failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("No message to receive")]
    Closed,
}

impl ConnectionError {
    /// Whether the peer sent something we could not make sense of,
    /// as opposed to the channel itself failing.
    pub fn is_malformed(&self) -> bool {
        match self {
            ConnectionError::MalformedMessage(_) => true,
            ConnectionError::Io(e) => codec::is_oversized(e),
            ConnectionError::Closed => false,
        }
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// Construct a new connection from a reader and writer
    ///
    /// * `reader`: Reader to receive frames from
    /// * `writer`: Writer to send frames to
    pub fn new(reader: R, writer: W) -> Self {
        Self::with_max_frame(reader, writer, DEFAULT_MAX_FRAME)
    }

    /// Like [`Connection::new`], rejecting frames above `max_frame` bytes.
    pub fn with_max_frame(reader: R, writer: W, max_frame: usize) -> Self {
        let codec = codec::length_delimited(max_frame);
        let reader = FramedRead::new(reader, codec.clone());
        let writer = FramedWrite::new(writer, codec);
        Connection { reader, writer }
    }

    /// Destroy the connection, returning the internal reader and writer.
    pub fn destroy(self) -> (R, W) {
        let Self { reader, writer } = self;
        (reader.into_inner(), writer.into_inner())
    }

    /// Send a raw payload, waiting until it has been handed to the medium.
    ///
    /// An empty payload is sent as a bare length header.
    pub async fn send_bytes(&mut self, payload: Bytes) -> Result<(), ConnectionError> {
        self.writer.send(payload).await?;
        Ok(())
    }

    /// Receive the next raw payload, waiting for arrival.
    pub async fn recv_bytes(&mut self) -> Result<Bytes, ConnectionError> {
        let frame = self.reader.next().await.ok_or(ConnectionError::Closed)??;
        Ok(frame.freeze())
    }

    /// Send a message, waiting until it has been handed to the medium
    ///
    /// * `msg`: Message to send
    pub async fn send(&mut self, msg: &impl serde::Serialize) -> Result<(), ConnectionError> {
        let msg = bincode::serialize(msg)?;
        self.send_bytes(msg.into()).await
    }

    /// Receive a message waiting for arrival
    pub async fn recv<T: serde::de::DeserializeOwned>(&mut self) -> Result<T, ConnectionError> {
        let buf = self.recv_bytes().await?;
        Ok(bincode::deserialize(&buf)?)
    }
}

pub type TcpConnection = Connection<OwnedReadHalf, OwnedWriteHalf>;
impl TcpConnection {
    /// New TCP-based connection from a stream
    ///
    /// * `stream`: TCP stream to use
    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    pub fn to_tcp(self) -> Result<TcpStream, ConnectionError> {
        let (r, w) = self.destroy();
        // Only fails if the halves were not split from the same stream,
        // which `from_tcp` guarantees.
        r.reunite(w).map_err(|_| ConnectionError::Closed)
    }
}

/// Connection to a in-memory data stream.
/// This always have a corresponding other connection in the same process.
pub type DuplexConnection = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;
impl DuplexConnection {
    /// Construct a duplex/in-memory connection pair
    pub fn in_memory() -> (Self, Self) {
        let (s1, s2) = tokio::io::duplex(64 * 1024);

        let (r1, w1) = tokio::io::split(s1);
        let (r2, w2) = tokio::io::split(s2);

        (Self::new(r1, w1), Self::new(r2, w2))
    }
}
