//! Transport layer abstraction for the session client.
//!
//! A transport moves whole [`Stanza`]s. The session never sees bytes, so the
//! same driver runs over plain TCP, TLS-upgraded TCP, or an in-memory pipe in
//! tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │                Session                   │
//! │          (Transport-Agnostic)            │
//! └──────────────────┬──────────────────────┘
//!                    │ Box<dyn Transport>
//!          ┌────────┴────────┐
//!          ▼                 ▼
//! ┌─────────────────┐ ┌─────────────────────┐
//! │ StreamTransport │ │   StreamTransport   │
//! │   <TcpStream>   │ │ <Box<dyn Io>> (TLS) │
//! └─────────────────┘ └─────────────────────┘
//!           └── upgrade() after STARTTLS ──┘
//! ```
//!
//! # Framing
//!
//! One compact JSON stanza per line. Blank lines are ignored as keep-alives.
//! A line longer than the configured limit is rejected with
//! [`std::io::ErrorKind::InvalidData`].

mod stream;
mod tcp;
mod tls;

pub use stream::{Io, StreamTransport, UpgradedStream};
pub use tcp::TcpTransport;
pub use tls::{client_config, server_name, TrustAnchors};

use std::io;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::protocol::Stanza;

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a, T> = BoxFuture<'a, io::Result<T>>;

/// Stanza transport owned exclusively by one session.
///
/// Implementations handle framing and the byte stream; the session stays
/// transport-agnostic.
pub trait Transport: Send {
    /// Write one stanza and flush it.
    fn send<'a>(&'a mut self, stanza: &'a Stanza) -> TransportFuture<'a, ()>;

    /// Read the next stanza; `None` once the peer has closed the stream.
    fn recv(&mut self) -> TransportFuture<'_, Option<Stanza>>;

    /// Close the write side.
    fn shutdown(&mut self) -> TransportFuture<'_, ()>;

    /// Replace this transport by a TLS session over the same stream.
    fn upgrade(
        self: Box<Self>,
        tls: Arc<rustls::ClientConfig>,
        server_name: rustls::ServerName,
    ) -> TransportFuture<'static, Box<dyn Transport>> {
        let _ = (tls, server_name);
        let name = self.name();
        Box::pin(async move {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("{name} transport cannot be upgraded to TLS"),
            ))
        })
    }

    /// Get the transport name for logging.
    fn name(&self) -> &'static str;

    /// Remote peer description for logging.
    fn peer(&self) -> String;
}
