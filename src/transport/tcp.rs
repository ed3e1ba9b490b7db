//! TCP transport implementation.
//!
//! Resolves `host:port`, tries each address in turn and wraps the first
//! connected socket in a [`StreamTransport`].

use std::io;
use std::time::Duration;

use tokio::net::{lookup_host, TcpStream};

use super::StreamTransport;
use crate::error::ConnectError;
use crate::protocol::{DEFAULT_PORT, MAX_STANZA_BYTES};

/// Outbound TCP connector.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    /// `host:port` to connect to.
    addr: String,
    /// Bound on resolution plus connect.
    connect_timeout: Duration,
    /// Per-stanza size limit handed to the stream.
    max_stanza_bytes: usize,
}

impl TcpTransport {
    /// Create a connector for `addr`; a bare host gets the default port.
    pub fn new(addr: &str) -> Self {
        let addr = if has_port(addr) {
            addr.to_string()
        } else {
            format!("{addr}:{DEFAULT_PORT}")
        };
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            max_stanza_bytes: MAX_STANZA_BYTES,
        }
    }

    /// Create with default localhost address.
    pub fn localhost(port: u16) -> Self {
        Self::new(&format!("127.0.0.1:{port}"))
    }

    /// Set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the per-stanza size limit.
    pub fn with_max_stanza_bytes(mut self, max: usize) -> Self {
        self.max_stanza_bytes = max;
        self
    }

    /// Target address.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Resolve and connect within the connect timeout.
    pub async fn connect(&self) -> Result<StreamTransport<TcpStream>, ConnectError> {
        match tokio::time::timeout(self.connect_timeout, self.connect_inner()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectError::Timeout(self.connect_timeout)),
        }
    }

    async fn connect_inner(&self) -> Result<StreamTransport<TcpStream>, ConnectError> {
        let addrs: Vec<_> = lookup_host(self.addr.as_str())
            .await
            .map_err(|e| ConnectError::Unreachable(format!("cannot resolve {}: {e}", self.addr)))?
            .collect();

        let mut last_err: Option<io::Error> = None;
        for addr in addrs {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        tracing::debug!("set_nodelay failed on {}: {}", addr, e);
                    }
                    tracing::debug!("TCP connected to {}", addr);
                    return Ok(StreamTransport::new(stream, "TCP", addr.to_string())
                        .with_max_stanza_bytes(self.max_stanza_bytes));
                },
                Err(e) => {
                    tracing::debug!("TCP connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                },
            }
        }

        Err(ConnectError::Unreachable(match last_err {
            Some(e) => format!("{}: {e}", self.addr),
            None => format!("{} resolved to no addresses", self.addr),
        }))
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::localhost(DEFAULT_PORT)
    }
}

fn has_port(addr: &str) -> bool {
    if let Some(rest) = addr.strip_prefix('[') {
        // [v6]:port
        return rest.split_once(']').is_some_and(|(_, tail)| tail.starts_with(':'));
    }
    match addr.rsplit_once(':') {
        Some((host, port)) => !host.contains(':') && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Transport;

    #[test]
    fn test_tcp_transport_default() {
        let transport = TcpTransport::default();
        assert_eq!(transport.addr(), "127.0.0.1:5222");
    }

    #[test]
    fn test_bare_host_gets_default_port() {
        assert_eq!(TcpTransport::new("chat.example.org").addr(), "chat.example.org:5222");
        assert_eq!(TcpTransport::new("chat.example.org:5223").addr(), "chat.example.org:5223");
        assert_eq!(TcpTransport::new("[::1]:6000").addr(), "[::1]:6000");
    }

    #[tokio::test]
    async fn test_refused_is_unreachable() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = TcpTransport::localhost(port)
            .with_connect_timeout(Duration::from_secs(2))
            .connect()
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::Unreachable(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_unresolvable_host_is_unreachable() {
        let err = TcpTransport::new("no-such-host.invalid:5222")
            .with_connect_timeout(Duration::from_secs(5))
            .connect()
            .await
            .unwrap_err();
        assert!(
            matches!(err, ConnectError::Unreachable(_) | ConnectError::Timeout(_)),
            "got {err:?}"
        );
    }

    #[tokio::test]
    async fn test_connects_to_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let transport = TcpTransport::localhost(port).connect().await.unwrap();
        assert_eq!(transport.name(), "TCP");
        assert_eq!(transport.peer(), format!("127.0.0.1:{port}"));
    }
}
