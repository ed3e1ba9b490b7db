//! Line-framed stanza transport over any byte stream.

use std::fmt;
use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_rustls::TlsConnector;

use super::{Transport, TransportFuture};
use crate::protocol::{Stanza, MAX_STANZA_BYTES};

/// Byte stream a [`StreamTransport`] can run over.
pub trait Io: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Stream type after a TLS upgrade. Erased so that the upgraded transport
/// has a single concrete type whatever it started on.
pub type UpgradedStream = Box<dyn Io>;

/// Newline-delimited JSON stanzas over a byte stream.
pub struct StreamTransport<S> {
    io: BufReader<S>,
    name: &'static str,
    peer: String,
    max_stanza_bytes: usize,
    line: Vec<u8>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wrap a connected stream.
    pub fn new(stream: S, name: &'static str, peer: impl Into<String>) -> Self {
        Self {
            io: BufReader::new(stream),
            name,
            peer: peer.into(),
            max_stanza_bytes: MAX_STANZA_BYTES,
            line: Vec::new(),
        }
    }

    /// Set the maximum encoded stanza size.
    pub fn with_max_stanza_bytes(mut self, max: usize) -> Self {
        self.max_stanza_bytes = max;
        self
    }

    /// Reclaim the underlying stream. Buffered input is discarded.
    pub fn into_inner(self) -> S {
        self.io.into_inner()
    }

    async fn write_stanza(&mut self, stanza: &Stanza) -> io::Result<()> {
        let mut encoded = stanza
            .encode()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        if encoded.len() > self.max_stanza_bytes {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} stanza is {} bytes, limit is {}",
                    stanza.name(),
                    encoded.len(),
                    self.max_stanza_bytes
                ),
            ));
        }
        encoded.push('\n');

        let stream = self.io.get_mut();
        stream.write_all(encoded.as_bytes()).await?;
        stream.flush().await
    }

    // Partial lines stay in `self.line` so a cancelled read resumes cleanly.
    async fn read_stanza(&mut self) -> io::Result<Option<Stanza>> {
        loop {
            let budget = (self.max_stanza_bytes + 1).saturating_sub(self.line.len()) as u64;
            let n = (&mut self.io)
                .take(budget)
                .read_until(b'\n', &mut self.line)
                .await?;

            if self.line.last() != Some(&b'\n') {
                if self.line.len() > self.max_stanza_bytes {
                    self.line.clear();
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("stanza exceeds {} bytes", self.max_stanza_bytes),
                    ));
                }
                if n == 0 {
                    if self.line.is_empty() {
                        return Ok(None);
                    }
                    self.line.clear();
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "stream ended mid-stanza",
                    ));
                }
                continue;
            }

            let line = std::mem::take(&mut self.line);
            let text = std::str::from_utf8(&line)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            if text.trim().is_empty() {
                continue;
            }

            return Stanza::decode(text)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        }
    }
}

impl<S> fmt::Debug for StreamTransport<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTransport")
            .field("name", &self.name)
            .field("peer", &self.peer)
            .field("max_stanza_bytes", &self.max_stanza_bytes)
            .finish_non_exhaustive()
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn send<'a>(&'a mut self, stanza: &'a Stanza) -> TransportFuture<'a, ()> {
        Box::pin(self.write_stanza(stanza))
    }

    fn recv(&mut self) -> TransportFuture<'_, Option<Stanza>> {
        Box::pin(self.read_stanza())
    }

    fn shutdown(&mut self) -> TransportFuture<'_, ()> {
        Box::pin(async move { self.io.get_mut().shutdown().await })
    }

    fn upgrade(
        self: Box<Self>,
        tls: Arc<rustls::ClientConfig>,
        server_name: rustls::ServerName,
    ) -> TransportFuture<'static, Box<dyn Transport>> {
        Box::pin(async move {
            let this = *self;
            if !this.io.buffer().is_empty() || !this.line.is_empty() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "peer sent data before the TLS handshake",
                ));
            }

            let peer = this.peer;
            let max = this.max_stanza_bytes;
            let stream = this.io.into_inner();
            let tls_stream = TlsConnector::from(tls).connect(server_name, stream).await?;
            tracing::debug!("TLS established with {}", peer);

            let erased: UpgradedStream = Box::new(tls_stream);
            let upgraded: Box<dyn Transport> =
                Box::new(StreamTransport::new(erased, "TLS", peer).with_max_stanza_bytes(max));
            Ok(upgraded)
        })
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Identity, MessageKind};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_stanza_roundtrip_over_pipe() {
        let (a, b) = duplex(4096);
        let mut left = StreamTransport::new(a, "pipe", "left");
        let mut right = StreamTransport::new(b, "pipe", "right");

        let bob = Identity::parse("bob@localhost").unwrap();
        let stanza = Stanza::message(&bob, MessageKind::Chat, "ping");
        left.send(&stanza).await.unwrap();
        left.send(&Stanza::StreamClose).await.unwrap();

        assert_eq!(right.recv().await.unwrap(), Some(stanza));
        assert_eq!(right.recv().await.unwrap(), Some(Stanza::StreamClose));
    }

    #[test]
    fn test_debug_shows_name_and_peer() {
        let (a, _b) = duplex(64);
        let transport = StreamTransport::new(a, "pipe", "left");
        let debug = format!("{transport:?}");
        assert!(debug.contains("pipe"));
        assert!(debug.contains("left"));
    }

    #[tokio::test]
    async fn test_erased_stream_carries_stanzas() {
        let (a, b) = duplex(4096);
        let erased: UpgradedStream = Box::new(a);
        let mut left: Box<dyn Transport> = Box::new(StreamTransport::new(erased, "TLS", "left"));
        let mut right = StreamTransport::new(b, "pipe", "right");

        left.send(&Stanza::Proceed).await.unwrap();
        assert_eq!(right.recv().await.unwrap(), Some(Stanza::Proceed));
        assert_eq!(left.name(), "TLS");
    }

    #[tokio::test]
    async fn test_eof_yields_none() {
        let (a, b) = duplex(64);
        let mut reader = StreamTransport::new(b, "pipe", "peer");
        drop(a);
        assert!(reader.recv().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let (mut raw, b) = duplex(256);
        let mut reader = StreamTransport::new(b, "pipe", "peer");
        raw.write_all(b"\n  \n{\"type\":\"proceed\"}\n").await.unwrap();
        assert_eq!(reader.recv().await.unwrap(), Some(Stanza::Proceed));
    }

    #[tokio::test]
    async fn test_oversized_line_rejected() {
        let (mut raw, b) = duplex(1024);
        let mut reader = StreamTransport::new(b, "pipe", "peer").with_max_stanza_bytes(16);
        raw.write_all(&[b'x'; 64]).await.unwrap();
        raw.write_all(b"\n").await.unwrap();

        let err = reader.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_garbage_is_invalid_data() {
        let (mut raw, b) = duplex(256);
        let mut reader = StreamTransport::new(b, "pipe", "peer");
        raw.write_all(b"<stream:stream>\n").await.unwrap();

        let err = reader.recv().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[tokio::test]
    async fn test_oversized_send_rejected_without_writing() {
        let (a, b) = duplex(4096);
        let mut writer = StreamTransport::new(a, "pipe", "w").with_max_stanza_bytes(32);
        let mut reader = StreamTransport::new(b, "pipe", "r");

        let bob = Identity::parse("bob@localhost").unwrap();
        let big = Stanza::message(&bob, MessageKind::Chat, &"y".repeat(100));
        let err = writer.send(&big).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);

        drop(writer);
        assert!(reader.recv().await.unwrap().is_none());
    }
}
