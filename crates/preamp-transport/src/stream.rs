//! Byte-stream connection.
//!
//! Frames arrive with no delimiter, so the read half buffers bytes and
//! carves frames off by their fixed per-type sizes, using the same gain
//! layout the session decodes with. Works over any
//! `AsyncRead + AsyncWrite`, which keeps TCP and in-memory test streams on
//! the same code path.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use preamp_protocol::FrameCodec;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tracing::{debug, trace, warn};

use crate::traits::{Connection, ConnectionId, FrameReader, FrameWriter, TransportError};

/// Initial read buffer size.
const READ_BUFFER_SIZE: usize = 1024;

/// A connection over an arbitrary byte stream.
pub struct StreamConnection<S> {
    id: ConnectionId,
    stream: S,
    remote_addr: Option<String>,
    codec: FrameCodec,
}

impl<S> StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    /// Wrap a connected stream.
    #[must_use]
    pub fn new(stream: S, remote_addr: Option<String>) -> Self {
        Self {
            id: ConnectionId::generate(),
            stream,
            remote_addr,
            codec: FrameCodec::default(),
        }
    }

    /// Split inbound frames for a specific gain layout.
    #[must_use]
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Use a specific connection id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<ConnectionId>) -> Self {
        self.id = id.into();
        self
    }
}

impl<S> Connection for StreamConnection<S>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn remote_addr(&self) -> Option<String> {
        self.remote_addr.clone()
    }

    fn split(self: Box<Self>) -> (Box<dyn FrameReader>, Box<dyn FrameWriter>) {
        let this = *self;
        let (reader, writer) = tokio::io::split(this.stream);
        (
            Box::new(StreamReader::new(reader, this.id.clone(), this.codec)),
            Box::new(StreamWriter::new(writer, this.id)),
        )
    }
}

/// Read half of a [`StreamConnection`].
pub struct StreamReader<R> {
    id: ConnectionId,
    reader: R,
    codec: FrameCodec,
    buffer: BytesMut,
    eof: bool,
}

impl<R> StreamReader<R> {
    fn new(reader: R, id: ConnectionId, codec: FrameCodec) -> Self {
        Self {
            id,
            reader,
            codec,
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
            eof: false,
        }
    }
}

#[async_trait]
impl<S> FrameReader for StreamReader<ReadHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            if let Some(frame) = self.codec.split_frame(&mut self.buffer) {
                trace!(connection = %self.id, len = frame.len(), "Frame received");
                return Ok(Some(frame));
            }

            if self.eof {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                // Trailing partial frame; hand it over so it is logged as unrecognized
                warn!(connection = %self.id, len = self.buffer.len(), "Stream ended mid-frame");
                return Ok(Some(self.buffer.split().freeze()));
            }

            self.buffer.reserve(READ_BUFFER_SIZE);
            let read = self
                .reader
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;

            if read == 0 {
                debug!(connection = %self.id, "Stream ended");
                self.eof = true;
            }
        }
    }
}

/// Write half of a [`StreamConnection`].
pub struct StreamWriter<W> {
    id: ConnectionId,
    writer: W,
    is_open: bool,
}

impl<W> StreamWriter<W> {
    fn new(writer: W, id: ConnectionId) -> Self {
        Self {
            id,
            writer,
            is_open: true,
        }
    }
}

#[async_trait]
impl<S> FrameWriter for StreamWriter<WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
{
    async fn send_raw(&mut self, data: Bytes) -> Result<(), TransportError> {
        if !self.is_open {
            return Err(TransportError::ConnectionClosed);
        }

        let written = async {
            self.writer.write_all(&data).await?;
            self.writer.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!(connection = %self.id, error = %e, "Write failed");
            self.is_open = false;
            return Err(TransportError::SendFailed(e.to_string()));
        }

        trace!(connection = %self.id, len = data.len(), "Frame sent");
        Ok(())
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if !self.is_open {
            return Ok(()); // Already closed
        }
        self.is_open = false;
        self.writer.shutdown().await?;
        debug!(connection = %self.id, "Write side closed");
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.is_open
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use preamp_protocol::codec::{HEARTBEAT_FRAME, IDLE_ACK_FRAME};
    use preamp_protocol::{ChannelConfig, DecodedEvent, GainEncoding};

    #[tokio::test]
    async fn test_reader_reassembles_split_writes() {
        let (client, mut unit) = tokio::io::duplex(256);
        let conn: Box<dyn Connection> = Box::new(StreamConnection::new(client, None));
        let (mut reader, _writer) = conn.split();

        unit.write_all(&IDLE_ACK_FRAME[..4]).await.unwrap();
        unit.write_all(&IDLE_ACK_FRAME[4..]).await.unwrap();
        unit.write_all(&IDLE_ACK_FRAME).await.unwrap();

        let first = reader.recv().await.unwrap().unwrap();
        let second = reader.recv().await.unwrap().unwrap();
        assert_eq!(first, &IDLE_ACK_FRAME[..]);
        assert_eq!(second, &IDLE_ACK_FRAME[..]);
    }

    #[tokio::test]
    async fn test_reader_separates_command_echo_from_ack() {
        let (client, mut unit) = tokio::io::duplex(256);
        let conn = Box::new(StreamConnection::new(client, None));
        let (mut reader, _writer) = conn.split();

        let codec = FrameCodec::default();
        let config = ChannelConfig::new(2).with_gain(10);
        unit.write_all(&codec.encode_command(&config).unwrap()).await.unwrap();
        unit.write_all(&IDLE_ACK_FRAME).await.unwrap();

        let echo = reader.recv().await.unwrap().unwrap();
        assert_eq!(codec.decode(&echo), DecodedEvent::ChannelUpdate(config));
        let ack = reader.recv().await.unwrap().unwrap();
        assert_eq!(codec.decode(&ack), DecodedEvent::Idle);
    }

    #[tokio::test]
    async fn test_reader_uses_configured_gain_layout() {
        let (client, mut unit) = tokio::io::duplex(256);
        let codec = FrameCodec::new(GainEncoding::PerInputVariableWidth);
        let conn = Box::new(StreamConnection::new(client, None).with_codec(codec));
        let (mut reader, _writer) = conn.split();

        let command = codec.encode_command(&ChannelConfig::new(1).with_gain(7)).unwrap();
        unit.write_all(&command).await.unwrap();
        unit.write_all(&IDLE_ACK_FRAME).await.unwrap();

        assert_eq!(reader.recv().await.unwrap().unwrap(), command);
        assert_eq!(reader.recv().await.unwrap().unwrap(), &IDLE_ACK_FRAME[..]);
    }

    #[tokio::test]
    async fn test_reader_flushes_tail_then_ends() {
        let (client, mut unit) = tokio::io::duplex(256);
        let conn = Box::new(StreamConnection::new(client, None));
        let (mut reader, _writer) = conn.split();

        unit.write_all(&HEARTBEAT_FRAME[..12]).await.unwrap();
        drop(unit);

        let tail = reader.recv().await.unwrap().unwrap();
        assert_eq!(tail.len(), 12);
        assert!(reader.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_sends_and_closes() {
        let (client, mut unit) = tokio::io::duplex(256);
        let conn = Box::new(StreamConnection::new(client, Some("test".into())).with_id("c1"));
        assert_eq!(conn.id().as_str(), "c1");
        assert_eq!(conn.remote_addr().as_deref(), Some("test"));

        let (_reader, mut writer) = conn.split();
        writer
            .send_raw(Bytes::from_static(&HEARTBEAT_FRAME))
            .await
            .unwrap();

        let mut received = [0u8; 28];
        unit.read_exact(&mut received).await.unwrap();
        assert_eq!(received, HEARTBEAT_FRAME);

        writer.close().await.unwrap();
        assert!(!writer.is_open());
        assert!(matches!(
            writer.send_raw(Bytes::from_static(&HEARTBEAT_FRAME)).await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
