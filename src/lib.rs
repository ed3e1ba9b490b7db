//! # Courier - Minimal Text-Messaging Client
//!
//! Client side of a small XMPP-style chat protocol: open a stream, secure
//! it, authenticate or register in-band, announce presence, exchange text
//! messages, and close. A separate dispatcher wraps the server's account
//! admin tool.
//!
//! ## Features
//!
//! - **Session lifecycle**: explicit state machine, one outstanding request
//! - **Stream security**: STARTTLS with explicit trust anchors (rustls)
//! - **In-band registration**: optionally followed by login on the same stream
//! - **Observers**: callbacks for messages and session start/end
//! - **Account admin**: `register`, `unregister`, `registered_users`,
//!   `change_password` through an external tool
//!
//! ### Session Lifecycle
//!
//! ```text
//!   [Disconnected] ── connect() ──> [Connecting]
//!                                     │        │
//!                       login mode    │        │   register mode
//!                                     v        v
//!                          [Authenticating] <── [Registering]
//!                                     │   login_after_register
//!                      authenticate() │
//!                                     v
//!                                 [Active] ── disconnect() / idle ──> [Disconnecting]
//!                                                                           │
//!   [Disconnected] <────────────────────────────────────────────────────────┘
//! ```
//!
//! Every failure along the way lands in `Disconnected` with the transport
//! released.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use courier::{ClientConfig, Credential, Identity, MessageKind, SecurityMode, SessionClient};
//! use std::time::Duration;
//!
//! let config = ClientConfig::new(SecurityMode::Required).with_ca_file("ca.pem");
//! let mut client = SessionClient::new(config)?;
//! client.on_message(|msg| println!("{} says {}", msg.from, msg.body));
//!
//! let mut session = client
//!     .connect(Identity::parse("alice@localhost")?, Credential::new("secret123"), "localhost")
//!     .await?;
//! session.authenticate().await?;
//! session.announce_presence().await?;
//! session
//!     .send_message(&Identity::parse("bob@localhost")?, "ping", MessageKind::Chat)
//!     .await?;
//! session.process(Duration::from_secs(2)).await?;
//! session.disconnect().await;
//! ```
//!
//! ### Account Administration
//!
//! ```rust,ignore
//! use courier::{AccountAdmin, AdminConfig, Credential};
//!
//! let admin = AccountAdmin::new(AdminConfig::default());
//! let outcome = admin.register("alice", &Credential::new("secret123")).await;
//! println!("{} {}", outcome.success, outcome.stderr);
//! ```
//!
//! ## Modules
//!
//! - [`client`]: Session client, live sessions and observers
//! - [`protocol`]: Identities, stanzas and the lifecycle state machine
//! - [`transport`]: Stanza transports (TCP, TLS upgrade)
//! - [`admin`]: Account administration dispatcher
//! - [`config`]: Configuration management
//! - [`error`]: Error types and result aliases

pub mod admin;
pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod transport;

// Re-exports for convenience
pub use admin::{AccountAdmin, AdminCommand, AdminOutcome};
pub use client::{EndReason, InboundMessage, Session, SessionClient, SessionEvent, SessionObserver};
pub use config::{AdminConfig, ClientConfig, Config, SecurityMode};
pub use error::{
    AdminError, AuthError, ConfigError, ConnectError, CourierError, RegisterError, Result,
    SendError,
};
pub use protocol::{Credential, Identity, MessageKind, RosterItem, SessionMode, SessionState};
pub use transport::{StreamTransport, TcpTransport, Transport};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
