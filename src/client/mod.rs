//! Session client.
//!
//! [`SessionClient`] holds the configuration and observers, opens the stream
//! (TCP connect, `stream_open`, optional STARTTLS) and hands back a
//! [`Session`] waiting in `Authenticating` or `Registering`.
//!
//! # Example
//!
//! ```rust,ignore
//! use courier::{ClientConfig, Credential, Identity, MessageKind, SecurityMode, SessionClient};
//!
//! let config = ClientConfig::new(SecurityMode::Required).with_ca_file("ca.pem");
//! let mut client = SessionClient::new(config)?;
//! client.on_message(|msg| println!("{}: {}", msg.from, msg.body));
//!
//! let alice = Identity::parse("alice@localhost")?;
//! let mut session = client
//!     .connect(alice, Credential::new("secret123"), "localhost:5222")
//!     .await?;
//! session.authenticate().await?;
//! session.announce_presence().await?;
//! session
//!     .send_message(&Identity::parse("bob@localhost")?, "ping", MessageKind::Chat)
//!     .await?;
//! session.disconnect().await;
//! ```

mod events;
mod session;

pub use events::{EndReason, InboundMessage, SessionEvent, SessionObserver};
pub use session::Session;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{timeout, Instant};

use crate::config::{ClientConfig, SecurityMode};
use crate::error::{ConfigError, ConnectError, Result};
use crate::protocol::{
    Credential, Identity, Lifecycle, SessionMode, SessionState, Stanza, StreamFeatures,
    MECHANISM_PLAIN,
};
use crate::transport::{self, TcpTransport, Transport};
use events::{message_observer, Observers};

/// Connects sessions with one configuration
pub struct SessionClient {
    config: ClientConfig,
    security: SecurityMode,
    tls: Option<Arc<rustls::ClientConfig>>,
    mode: SessionMode,
    observers: Observers,
}

impl SessionClient {
    /// Create a client; rejects configs without an explicit security mode.
    pub fn new(config: ClientConfig) -> Result<Self> {
        let security = config.validate()?;
        let tls = match security {
            SecurityMode::Required => {
                let anchors = config.security.trust_anchors().ok_or_else(|| {
                    ConfigError::Invalid("security.mode = required needs a CA".to_string())
                })?;
                Some(transport::client_config(&anchors)?)
            },
            SecurityMode::Disabled => None,
        };

        Ok(Self {
            config,
            security,
            tls,
            mode: SessionMode::Login,
            observers: Observers::default(),
        })
    }

    /// Open streams for login (default) or in-band registration
    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Client configuration
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Call `callback` for every inbound message on sessions from this client.
    pub fn on_message<F>(&mut self, callback: F) -> &mut Self
    where
        F: FnMut(&InboundMessage) + Send + 'static,
    {
        self.observers.push(message_observer(callback));
        self
    }

    /// Observe every session event.
    pub fn subscribe<O>(&mut self, observer: O) -> &mut Self
    where
        O: SessionObserver + 'static,
    {
        self.observers.push(Box::new(observer));
        self
    }

    /// Connect over TCP to `server` (`host[:port]`) and negotiate the stream.
    ///
    /// The whole of resolution, connect and negotiation is bounded by the
    /// connect timeout.
    pub async fn connect(
        self,
        identity: Identity,
        credential: Credential,
        server: &str,
    ) -> std::result::Result<Session, ConnectError> {
        let connect_timeout = self.config.connect_timeout();
        let tcp = TcpTransport::new(server)
            .with_connect_timeout(connect_timeout)
            .with_max_stanza_bytes(self.config.max_stanza_bytes);

        tracing::info!("Connecting to {} as {}", tcp.addr(), identity);
        let started = Instant::now();
        let stream = tcp.connect().await?;
        let remaining = connect_timeout.saturating_sub(started.elapsed());
        self.open(identity, credential, Box::new(stream), remaining)
            .await
    }

    /// Negotiate the stream over an already connected transport.
    pub async fn connect_over(
        self,
        identity: Identity,
        credential: Credential,
        transport: Box<dyn Transport>,
    ) -> std::result::Result<Session, ConnectError> {
        let budget = self.config.connect_timeout();
        self.open(identity, credential, transport, budget).await
    }

    async fn open(
        self,
        identity: Identity,
        credential: Credential,
        transport: Box<dyn Transport>,
        budget: Duration,
    ) -> std::result::Result<Session, ConnectError> {
        let mut lifecycle = Lifecycle::new(self.config.idle_timeout());
        lifecycle
            .transition(SessionState::Connecting)
            .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))?;

        if self.security == SecurityMode::Disabled {
            tracing::warn!(
                "Stream security disabled: credentials for {} cross {} in clear text",
                identity,
                transport.peer()
            );
        }

        let transport = match timeout(budget, self.negotiate(transport, identity.domain())).await
        {
            Ok(result) => result?,
            Err(_) => return Err(ConnectError::Timeout(self.config.connect_timeout())),
        };

        let next = match self.mode {
            SessionMode::Login => SessionState::Authenticating,
            SessionMode::Register => SessionState::Registering,
        };
        lifecycle
            .transition(next)
            .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))?;
        tracing::info!(
            "Stream open to {} over {}, {:?}",
            transport.peer(),
            transport.name(),
            next
        );

        Ok(Session::new(
            transport,
            lifecycle,
            identity,
            credential,
            self.config,
            self.observers,
        ))
    }

    async fn negotiate(
        &self,
        mut transport: Box<dyn Transport>,
        domain: &str,
    ) -> std::result::Result<Box<dyn Transport>, ConnectError> {
        let mut features = open_stream(transport.as_mut(), domain).await?;

        match self.security {
            SecurityMode::Required => {
                if !features.starttls {
                    return Err(ConnectError::HandshakeFailed(format!(
                        "{domain} does not offer STARTTLS"
                    )));
                }
                transport = self.start_tls(transport, domain).await?;
                features = open_stream(transport.as_mut(), domain).await?;
            },
            SecurityMode::Disabled => {
                if features.starttls_required {
                    return Err(ConnectError::HandshakeFailed(
                        "server requires TLS but stream security is disabled".to_string(),
                    ));
                }
            },
        }

        match self.mode {
            SessionMode::Login if !features.mechanisms.iter().any(|m| m == MECHANISM_PLAIN) => {
                Err(ConnectError::HandshakeFailed(format!(
                    "server does not offer {MECHANISM_PLAIN} authentication"
                )))
            },
            SessionMode::Register if !features.register => {
                tracing::warn!("{} does not advertise in-band registration", domain);
                Ok(transport)
            },
            _ => Ok(transport),
        }
    }

    async fn start_tls(
        &self,
        mut transport: Box<dyn Transport>,
        domain: &str,
    ) -> std::result::Result<Box<dyn Transport>, ConnectError> {
        let tls = self.tls.clone().ok_or_else(|| {
            ConnectError::HandshakeFailed("no TLS configuration".to_string())
        })?;
        let name = self.config.security.server_name.as_deref().unwrap_or(domain);
        let server_name = transport::server_name(name)
            .map_err(|e| ConnectError::HandshakeFailed(e.to_string()))?;

        transport.send(&Stanza::StartTls).await.map_err(handshake)?;
        match transport.recv().await.map_err(handshake)? {
            Some(Stanza::Proceed) => {},
            Some(Stanza::TlsFailure) => {
                return Err(ConnectError::HandshakeFailed(
                    "server refused STARTTLS".to_string(),
                ))
            },
            Some(other) => {
                return Err(ConnectError::HandshakeFailed(format!(
                    "expected proceed, got {}",
                    other.name()
                )))
            },
            None => return Err(closed_during_negotiation()),
        }

        let upgraded = transport
            .upgrade(tls, server_name)
            .await
            .map_err(|e| ConnectError::HandshakeFailed(format!("TLS handshake failed: {e}")))?;
        tracing::debug!("Stream to {} upgraded to TLS", upgraded.peer());
        Ok(upgraded)
    }
}

impl std::fmt::Debug for SessionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionClient")
            .field("server", &self.config.server)
            .field("security", &self.security)
            .field("mode", &self.mode)
            .field("observers", &self.observers.len())
            .finish()
    }
}

async fn open_stream(
    transport: &mut dyn Transport,
    domain: &str,
) -> std::result::Result<StreamFeatures, ConnectError> {
    transport
        .send(&Stanza::stream_open(domain))
        .await
        .map_err(handshake)?;

    match transport.recv().await.map_err(handshake)? {
        Some(Stanza::StreamFeatures(features)) => {
            tracing::debug!(
                "Features: starttls={} mechanisms={:?} register={}",
                features.starttls,
                features.mechanisms,
                features.register
            );
            Ok(features)
        },
        Some(Stanza::StreamError(err)) => Err(ConnectError::HandshakeFailed(err.reason())),
        Some(other) => Err(ConnectError::HandshakeFailed(format!(
            "expected stream_features, got {}",
            other.name()
        ))),
        None => Err(closed_during_negotiation()),
    }
}

fn handshake(err: io::Error) -> ConnectError {
    ConnectError::HandshakeFailed(err.to_string())
}

fn closed_during_negotiation() -> ConnectError {
    ConnectError::HandshakeFailed("server closed the stream during negotiation".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ErrorCondition, StanzaError};
    use crate::transport::StreamTransport;
    use tokio::io::duplex;

    /// Run a scripted server over an in-memory pipe.
    fn pipe<F, Fut>(script: F) -> Box<dyn Transport>
    where
        F: FnOnce(StreamTransport<tokio::io::DuplexStream>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let (client, server) = duplex(8192);
        tokio::spawn(script(StreamTransport::new(server, "pipe", "client")));
        Box::new(StreamTransport::new(client, "pipe", "server"))
    }

    fn alice() -> Identity {
        Identity::parse("alice@localhost").unwrap()
    }

    fn insecure() -> SessionClient {
        SessionClient::new(ClientConfig::new(SecurityMode::Disabled)).unwrap()
    }

    #[test]
    fn test_missing_security_mode_rejected() {
        let err = SessionClient::new(ClientConfig::default()).unwrap_err();
        assert!(err.to_string().contains("security.mode"));
    }

    #[test]
    fn test_required_without_ca_rejected() {
        assert!(SessionClient::new(ClientConfig::new(SecurityMode::Required)).is_err());
    }

    #[tokio::test]
    async fn test_negotiates_login_stream() {
        let transport = pipe(|mut server| async move {
            let open = server.recv().await.unwrap();
            assert_eq!(open, Some(Stanza::stream_open("localhost")));
            server
                .send(&Stanza::StreamFeatures(StreamFeatures {
                    mechanisms: vec!["PLAIN".to_string()],
                    ..StreamFeatures::default()
                }))
                .await
                .unwrap();
            // Hold the pipe open until the client goes away.
            while let Ok(Some(_)) = server.recv().await {}
        });

        let session = insecure()
            .connect_over(alice(), Credential::new("secret123"), transport)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Authenticating);
    }

    #[tokio::test]
    async fn test_stream_error_fails_handshake() {
        let transport = pipe(|mut server| async move {
            let _ = server.recv().await;
            server
                .send(&Stanza::StreamError(StanzaError::new(
                    ErrorCondition::ServiceUnavailable,
                    Some("host-unknown"),
                )))
                .await
                .unwrap();
        });

        let err = insecure()
            .connect_over(alice(), Credential::new("x"), transport)
            .await
            .unwrap_err();
        match err {
            ConnectError::HandshakeFailed(reason) => assert_eq!(reason, "host-unknown"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tls_required_by_server_but_disabled() {
        let transport = pipe(|mut server| async move {
            let _ = server.recv().await;
            server
                .send(&Stanza::StreamFeatures(StreamFeatures {
                    starttls: true,
                    starttls_required: true,
                    mechanisms: vec!["PLAIN".to_string()],
                    register: false,
                }))
                .await
                .unwrap();
        });

        let err = insecure()
            .connect_over(alice(), Credential::new("x"), transport)
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectError::HandshakeFailed(_)));
    }

    #[tokio::test]
    async fn test_required_security_without_starttls_offer() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let config = ClientConfig::new(SecurityMode::Required)
            .with_ca_der(vec![cert.serialize_der().unwrap()]);

        let transport = pipe(|mut server| async move {
            let _ = server.recv().await;
            server
                .send(&Stanza::StreamFeatures(StreamFeatures {
                    mechanisms: vec!["PLAIN".to_string()],
                    ..StreamFeatures::default()
                }))
                .await
                .unwrap();
        });

        let err = SessionClient::new(config)
            .unwrap()
            .connect_over(alice(), Credential::new("x"), transport)
            .await
            .unwrap_err();
        match err {
            ConnectError::HandshakeFailed(reason) => assert!(reason.contains("STARTTLS")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let transport = pipe(|mut server| async move {
            // Read the stream_open and never answer.
            let _ = server.recv().await;
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let config = ClientConfig::new(SecurityMode::Disabled)
            .with_connect_timeout(Duration::from_secs(1));
        let started = std::time::Instant::now();
        let err = SessionClient::new(config)
            .unwrap()
            .connect_over(alice(), Credential::new("x"), transport)
            .await
            .unwrap_err();

        assert!(matches!(err, ConnectError::Timeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_register_mode_opens_registering() {
        let transport = pipe(|mut server| async move {
            let _ = server.recv().await;
            server
                .send(&Stanza::StreamFeatures(StreamFeatures {
                    register: true,
                    ..StreamFeatures::default()
                }))
                .await
                .unwrap();
            while let Ok(Some(_)) = server.recv().await {}
        });

        let session = insecure()
            .with_mode(SessionMode::Register)
            .connect_over(alice(), Credential::new("x"), transport)
            .await
            .unwrap();
        assert_eq!(session.state(), SessionState::Registering);
    }
}
