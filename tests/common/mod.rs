//! In-process chat server for end-to-end tests.
//!
//! Speaks the same line protocol as a real deployment: stream negotiation
//! with optional STARTTLS, PLAIN authentication, in-band registration,
//! rosters, and message routing between connected accounts. Messages for
//! accounts that are not online are queued until they log in.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use courier::protocol::{
    parse_plain_payload, ErrorCondition, IqKind, Query, RosterItem, Stanza, StanzaError,
    StreamFeatures,
};
use courier::transport::{StreamTransport, Transport};
use courier::{ClientConfig, Identity, SecurityMode};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::TlsAcceptor;

/// Test server options
#[derive(Default)]
pub struct ServerOptions {
    accounts: Vec<(String, String)>,
    rosters: Vec<(String, Vec<String>)>,
    registration: bool,
    tls: bool,
}

impl ServerOptions {
    /// Pre-register an account
    pub fn with_account(mut self, name: &str, password: &str) -> Self {
        self.accounts.push((name.to_string(), password.to_string()));
        self
    }

    /// Give `owner` a contact list
    pub fn with_roster(mut self, owner: &str, contacts: &[&str]) -> Self {
        self.rosters.push((
            owner.to_string(),
            contacts.iter().map(|c| (*c).to_string()).collect(),
        ));
        self
    }

    /// Allow in-band registration
    pub fn with_registration(mut self) -> Self {
        self.registration = true;
        self
    }

    /// Require STARTTLS with a fresh self-signed certificate for `localhost`
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self
    }
}

struct Shared {
    domain: String,
    registration: bool,
    tls: Option<TlsAcceptor>,
    accounts: Mutex<HashMap<String, String>>,
    rosters: HashMap<String, Vec<String>>,
    online: Mutex<HashMap<String, mpsc::UnboundedSender<Stanza>>>,
    offline: Mutex<HashMap<String, Vec<Stanza>>>,
}

impl Shared {
    fn features(&self, secured: bool) -> Stanza {
        let needs_tls = self.tls.is_some() && !secured;
        Stanza::StreamFeatures(StreamFeatures {
            starttls: needs_tls,
            starttls_required: needs_tls,
            mechanisms: if needs_tls {
                Vec::new()
            } else {
                vec!["PLAIN".to_string()]
            },
            register: self.registration && !needs_tls,
        })
    }

    fn check(&self, name: &str, password: &str) -> bool {
        self.accounts
            .lock()
            .unwrap()
            .get(name)
            .is_some_and(|p| p == password)
    }

    fn register(&self, name: &str, password: &str) -> Result<(), StanzaError> {
        if !self.registration {
            return Err(StanzaError::new(
                ErrorCondition::NotAllowed,
                Some("registration disabled"),
            ));
        }
        let mut accounts = self.accounts.lock().unwrap();
        if accounts.contains_key(name) {
            return Err(StanzaError::new(ErrorCondition::Conflict, None));
        }
        accounts.insert(name.to_string(), password.to_string());
        Ok(())
    }

    fn roster(&self, owner: &str) -> Vec<RosterItem> {
        self.rosters
            .get(owner)
            .map(|contacts| {
                contacts
                    .iter()
                    .filter_map(|c| Identity::new(c, &self.domain).ok())
                    .map(|identity| RosterItem {
                        identity,
                        name: None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn route(&self, to: &str, stanza: Stanza) {
        let online = self.online.lock().unwrap();
        match online.get(to) {
            Some(tx) if tx.send(stanza.clone()).is_ok() => {},
            _ => self
                .offline
                .lock()
                .unwrap()
                .entry(to.to_string())
                .or_default()
                .push(stanza),
        }
    }

    fn go_online(&self, name: &str, tx: mpsc::UnboundedSender<Stanza>) {
        let queued = self.offline.lock().unwrap().remove(name).unwrap_or_default();
        for stanza in queued {
            let _ = tx.send(stanza);
        }
        self.online.lock().unwrap().insert(name.to_string(), tx);
    }

    fn go_offline(&self, name: &str, tx: &mpsc::UnboundedSender<Stanza>) {
        let mut online = self.online.lock().unwrap();
        if online.get(name).is_some_and(|current| current.same_channel(tx)) {
            online.remove(name);
        }
    }
}

/// Running test server
pub struct TestServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    ca_der: Option<Vec<u8>>,
}

impl TestServer {
    /// Bind to an ephemeral port and start accepting.
    pub async fn start(options: ServerOptions) -> Self {
        let (tls, ca_der) = if options.tls {
            let (acceptor, der) = self_signed_acceptor();
            (Some(acceptor), Some(der))
        } else {
            (None, None)
        };

        let shared = Arc::new(Shared {
            domain: "localhost".to_string(),
            registration: options.registration,
            tls,
            accounts: Mutex::new(options.accounts.into_iter().collect()),
            rosters: options.rosters.into_iter().collect(),
            online: Mutex::new(HashMap::new()),
            offline: Mutex::new(HashMap::new()),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let shared = accept_shared.clone();
                tokio::spawn(async move {
                    let _ = accept(stream, shared).await;
                });
            }
        });

        Self {
            addr,
            shared,
            ca_der,
        }
    }

    /// `host:port` to connect to
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Client config matching this server's security
    pub fn client_config(&self) -> ClientConfig {
        let config = match &self.ca_der {
            Some(der) => ClientConfig::new(SecurityMode::Required).with_ca_der(vec![der.clone()]),
            None => ClientConfig::new(SecurityMode::Disabled),
        };
        config
            .with_server(&self.addr())
            .with_connect_timeout(Duration::from_secs(5))
    }

    /// DER of the server certificate, when TLS is on
    pub fn ca_der(&self) -> Option<Vec<u8>> {
        self.ca_der.clone()
    }

    /// Check whether `name` is registered
    pub fn has_account(&self, name: &str) -> bool {
        self.shared.accounts.lock().unwrap().contains_key(name)
    }
}

/// Listener that accepts connections and never says a word.
pub async fn silent_listener() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    addr
}

/// Address nothing listens on.
pub fn refused_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);
    addr
}

fn self_signed_acceptor() -> (TlsAcceptor, Vec<u8>) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let der = cert.serialize_der().unwrap();
    let key = cert.serialize_private_key_der();

    let config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(vec![rustls::Certificate(der.clone())], rustls::PrivateKey(key))
        .unwrap();
    (TlsAcceptor::from(Arc::new(config)), der)
}

async fn expect_open<S>(conn: &mut StreamTransport<S>) -> io::Result<bool>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    Ok(matches!(conn.recv().await?, Some(Stanza::StreamOpen { .. })))
}

async fn accept(stream: TcpStream, shared: Arc<Shared>) -> io::Result<()> {
    use courier::Transport;

    let mut conn = StreamTransport::new(stream, "TCP", "client");
    if !expect_open(&mut conn).await? {
        return Ok(());
    }
    conn.send(&shared.features(false)).await?;
    let first = conn.recv().await?;

    match (first, shared.tls.clone()) {
        (Some(Stanza::StartTls), Some(acceptor)) => {
            conn.send(&Stanza::Proceed).await?;
            let tls = acceptor.accept(conn.into_inner()).await?;
            let mut conn = StreamTransport::new(tls, "TLS", "client");
            if !expect_open(&mut conn).await? {
                return Ok(());
            }
            conn.send(&shared.features(true)).await?;
            let first = conn.recv().await?;
            serve(conn, shared, first).await
        },
        (Some(Stanza::StartTls), None) => conn.send(&Stanza::TlsFailure).await,
        (_, Some(_)) => {
            conn.send(&Stanza::StreamError(StanzaError::new(
                ErrorCondition::NotAllowed,
                Some("TLS required"),
            )))
            .await
        },
        (first, None) => serve(conn, shared, first).await,
    }
}

enum Event {
    Inbound(Option<Stanza>),
    Failed(io::Error),
    Routed(Stanza),
}

async fn serve<S>(
    mut conn: StreamTransport<S>,
    shared: Arc<Shared>,
    first: Option<Stanza>,
) -> io::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    use courier::Transport;

    let (tx, mut rx) = mpsc::unbounded_channel::<Stanza>();
    let mut user: Option<String> = None;
    let mut pending = Some(first);

    let result = loop {
        let event = match pending.take() {
            Some(first) => Event::Inbound(first),
            None => tokio::select! {
                inbound = conn.recv() => match inbound {
                    Ok(stanza) => Event::Inbound(stanza),
                    Err(e) => Event::Failed(e),
                },
                Some(routed) = rx.recv() => Event::Routed(routed),
            },
        };

        let stanza = match event {
            Event::Routed(stanza) => {
                conn.send(&stanza).await?;
                continue;
            },
            Event::Failed(e) => break Err(e),
            Event::Inbound(None) => break Ok(()),
            Event::Inbound(Some(stanza)) => stanza,
        };

        match stanza {
            Stanza::Auth { payload, .. } => match parse_plain_payload(&payload) {
                Some((name, password)) if shared.check(&name, password.expose_secret()) => {
                    conn.send(&Stanza::AuthSuccess).await?;
                    shared.go_online(&name, tx.clone());
                    user = Some(name);
                },
                _ => {
                    conn.send(&Stanza::AuthFailure(StanzaError::new(
                        ErrorCondition::NotAuthorized,
                        None,
                    )))
                    .await?;
                },
            },
            Stanza::Iq(iq) => {
                let reply = match (iq.kind, iq.query, &user) {
                    (IqKind::Set, Some(Query::Register { username, password }), None) => {
                        match shared.register(&username, password.expose_secret()) {
                            Ok(()) => Stanza::iq_result(&iq.id, None),
                            Err(err) => Stanza::iq_error(&iq.id, err),
                        }
                    },
                    (IqKind::Get, Some(Query::Roster { .. }), Some(owner)) => Stanza::iq_result(
                        &iq.id,
                        Some(Query::Roster {
                            items: shared.roster(owner),
                        }),
                    ),
                    _ => Stanza::iq_error(&iq.id, StanzaError::new(ErrorCondition::BadRequest, None)),
                };
                conn.send(&reply).await?;
            },
            Stanza::Message(mut msg) => {
                if let Some(name) = &user {
                    if msg.to.domain() == shared.domain {
                        msg.from = Identity::new(name, &shared.domain).ok();
                        let to = msg.to.name().to_string();
                        shared.route(&to, Stanza::Message(msg));
                    }
                }
            },
            Stanza::StreamClose => {
                conn.send(&Stanza::StreamClose).await?;
                break Ok(());
            },
            _ => {},
        }
    };

    if let Some(name) = &user {
        shared.go_offline(name, &tx);
    }
    result
}
