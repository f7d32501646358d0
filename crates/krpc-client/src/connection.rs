use std::fmt;

use bytes::Bytes;
use krpc_frame::{FrameReader, FrameWriter};
use prost::Message;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::Result;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A framed, message-typed duplex connection to the server.
///
/// The read and write halves are owned separately so they can be driven
/// from different tasks once the handshake is done.
pub struct Connection {
    reader: FrameReader<BoxedReader>,
    writer: FrameWriter<BoxedWriter>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection").finish_non_exhaustive()
    }
}

impl Connection {
    pub fn new(
        reader: impl AsyncRead + Send + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        Self {
            reader: FrameReader::new(Box::new(reader)),
            writer: FrameWriter::new(Box::new(writer)),
        }
    }

    /// Wrap any bidirectional stream, e.g. one end of `tokio::io::duplex`.
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::new(reader, writer)
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    /// Send one protocol message as a frame.
    pub async fn send<M: Message>(&mut self, message: &M) -> Result<()> {
        self.writer.write_frame(&message.encode_to_vec()).await?;
        Ok(())
    }

    /// Receive one frame and decode it as `M`.
    pub async fn recv<M: Message + Default>(&mut self) -> Result<M> {
        let frame = self.recv_frame().await?;
        Ok(M::decode(frame)?)
    }

    pub async fn recv_frame(&mut self) -> Result<Bytes> {
        Ok(self.reader.read_frame().await?)
    }

    /// Shut down the write half, signalling EOF to the server.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }

    pub fn into_parts(self) -> (FrameReader<BoxedReader>, FrameWriter<BoxedWriter>) {
        (self.reader, self.writer)
    }
}
