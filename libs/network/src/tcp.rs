//! TCP Transport Implementation
//!
//! Length-prefixed frame I/O over any async byte stream, plus the TCP
//! connect helper remotes use. Reader and writer are separate so one task
//! can block on inbound frames while another writes.

use crate::error::{Result, TransportError};
use crate::frame::Frame;
use bytes::BytesMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

/// Connect to a peer with a timeout
pub async fn connect(host: &str, timeout: Duration) -> Result<TcpStream> {
    info!("Connecting to TCP peer at {}", host);

    let stream = tokio::time::timeout(timeout, TcpStream::connect(host))
        .await
        .map_err(|_| TransportError::timeout(format!("TCP connect to {}", host), timeout.as_millis() as u64))?
        .map_err(|e| TransportError::network_with_source(format!("Failed to connect to {}", host), e))?;

    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    debug!("Connected to TCP peer at {}", host);
    Ok(stream)
}

/// Split a TCP stream into framed halves
pub fn split(stream: TcpStream, max_frame_size: usize) -> (FrameReader<OwnedReadHalf>, FrameWriter<OwnedWriteHalf>) {
    let (read, write) = stream.into_split();
    (FrameReader::new(read, max_frame_size), FrameWriter::new(write))
}

/// Reads length-prefixed frames
pub struct FrameReader<R> {
    inner: R,
    max_frame_size: usize,
    /// Reusable read buffer
    buffer: BytesMut,
    frames_received: u64,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, max_frame_size: usize) -> Self {
        Self {
            inner,
            max_frame_size,
            buffer: BytesMut::with_capacity(64 * 1024),
            frames_received: 0,
        }
    }

    /// Next frame, or `None` when the peer closed cleanly between frames
    pub async fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut len_bytes = [0u8; 4];
        match self.inner.read_exact(&mut len_bytes).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let frame_len = u32::from_be_bytes(len_bytes) as usize;
        if frame_len > self.max_frame_size {
            return Err(TransportError::protocol(format!(
                "Frame size {} exceeds maximum {}",
                frame_len, self.max_frame_size
            )));
        }

        self.buffer.clear();
        self.buffer.resize(frame_len, 0);
        self.inner.read_exact(&mut self.buffer[..]).await?;

        let frame = Frame::decode(&self.buffer)?;
        self.frames_received += 1;
        trace!(kind = frame.kind(), bytes = frame_len, "Received frame");
        Ok(Some(frame))
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }
}

/// Writes length-prefixed frames
pub struct FrameWriter<W> {
    inner: W,
    /// Reusable write buffer
    buffer: BytesMut,
    frames_sent: u64,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(64 * 1024),
            frames_sent: 0,
        }
    }

    pub async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let payload = frame.encode()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| TransportError::protocol(format!("Frame of {} bytes is too large", payload.len())))?;

        self.buffer.clear();
        self.buffer.extend_from_slice(&len.to_be_bytes());
        self.buffer.extend_from_slice(&payload);

        // Single write call for the whole frame
        self.inner.write_all(&self.buffer).await?;
        self.inner.flush().await?;

        self.frames_sent += 1;
        trace!(kind = frame.kind(), bytes = payload.len(), "Sent frame");
        Ok(())
    }

    /// Flush and close the write side
    pub async fn shutdown(&mut self) -> Result<()> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::Message;

    #[tokio::test]
    async fn test_frames_cross_a_duplex_pipe() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 1024 * 1024);

        writer.write_frame(&Frame::Hello { target: "/ris".into() }).await.unwrap();
        writer
            .write_frame(&Frame::Publish { message: Message::empty("/ris/update").into_shared() })
            .await
            .unwrap();
        drop(writer);

        assert_eq!(
            reader.read_frame().await.unwrap(),
            Some(Frame::Hello { target: "/ris".into() })
        );
        assert!(matches!(reader.read_frame().await.unwrap(), Some(Frame::Publish { .. })));
        assert_eq!(reader.read_frame().await.unwrap(), None);
        assert_eq!(reader.frames_received(), 2);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (client, server) = tokio::io::duplex(4096);
        let mut writer = FrameWriter::new(client);
        let mut reader = FrameReader::new(server, 8);

        writer.write_frame(&Frame::Register { paths: vec!["/a".into()] }).await.unwrap();
        assert!(matches!(reader.read_frame().await, Err(TransportError::Protocol { .. })));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(&addr.to_string(), Duration::from_millis(500)).await;
        assert!(result.is_err());
    }
}
