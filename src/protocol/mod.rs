//! Wire protocol and session lifecycle.
//!
//! # Protocol Overview
//!
//! A client opens one stream per session, optionally upgrades it to TLS,
//! then either authenticates or registers a new account in-band.
//!
//! ## Stanza Flow
//!
//! ```text
//! Client                                 Server
//!    |                                     |
//!    |------- stream_open (domain) ------->|
//!    |<------ stream_features -------------|  starttls? mechanisms, register?
//!    |                                     |
//!    |------- starttls ------------------->|  (security required)
//!    |<------ proceed ---------------------|
//!    |====== TLS handshake ================|
//!    |------- stream_open (domain) ------->|
//!    |<------ stream_features -------------|
//!    |                                     |
//!    |------- auth (PLAIN) --------------->|  login mode
//!    |<------ auth_success / failure ------|
//!    |   or                                |
//!    |------- iq set (register) ---------->|  registration mode
//!    |<------ iq result / error -----------|
//!    |                                     |
//!    |------- presence ------------------->|
//!    |------- iq get (roster) ------------>|
//!    |<------ iq result (items) -----------|
//!    |======= message ====================>|
//!    |<====== message ======================|
//!    |                                     |
//!    |------- stream_close --------------->|
//!    |<------ stream_close ----------------|
//! ```
//!
//! ## State Machine
//!
//! | State            | Description                         | Valid Transitions                        |
//! |------------------|-------------------------------------|------------------------------------------|
//! | `Disconnected`   | No transport (initial / terminal)   | → Connecting                             |
//! | `Connecting`     | TCP connect, stream open, TLS       | → Registering, Authenticating, Disconnected |
//! | `Registering`    | Unauthenticated, may register       | → Authenticating, Disconnecting, Disconnected |
//! | `Authenticating` | Awaiting credential exchange        | → Active, Disconnecting, Disconnected    |
//! | `Active`         | Presence, roster, messages          | → Disconnecting, Disconnected            |
//! | `Disconnecting`  | Graceful close in progress          | → Disconnected                           |
//!
//! At most one correlated request (auth, registration, roster) is in flight
//! per session.

mod identity;
mod session;
mod stanza;

pub use identity::{Credential, Identity};
pub use session::{
    Lifecycle, LifecycleError, RequestPurpose, SessionMode, SessionState, SessionStats,
};
pub use stanza::{
    parse_plain_payload, plain_payload, ErrorCondition, Iq, IqKind, MessageKind, MessageStanza,
    Presence, Query, RosterItem, Stanza, StanzaError, StreamFeatures, MECHANISM_PLAIN,
};

/// Default client port
pub const DEFAULT_PORT: u16 = 5222;

/// Maximum session idle time (5 minutes)
pub const SESSION_TIMEOUT_SECS: u64 = 300;

/// Default upper bound on one encoded stanza
pub const MAX_STANZA_BYTES: usize = 64 * 1024;
