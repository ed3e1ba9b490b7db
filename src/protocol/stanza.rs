//! Stanzas: the units of exchange between client and server.
//!
//! Each stanza is a JSON object tagged by `"type"` and travels as one line
//! on the wire. See the [module docs](super) for the exchange order.

use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use super::identity::{Credential, Identity};

/// SASL mechanism used by [`Stanza::auth_plain`].
pub const MECHANISM_PLAIN: &str = "PLAIN";

/// Protocol stanza envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Stanza {
    /// Open (or re-open after TLS) the stream towards a domain
    StreamOpen {
        /// Service domain
        to: String,
    },
    /// Server announcement of what the stream supports
    StreamFeatures(StreamFeatures),
    /// Request a TLS upgrade
    #[serde(rename = "starttls")]
    StartTls,
    /// Server agrees to the TLS upgrade
    Proceed,
    /// Server refuses the TLS upgrade
    TlsFailure,
    /// Credential exchange
    Auth {
        /// SASL mechanism name
        mechanism: String,
        /// Base64 mechanism payload
        payload: Credential,
    },
    /// Authentication accepted
    AuthSuccess,
    /// Authentication refused
    AuthFailure(StanzaError),
    /// Request/response stanza carrying a query
    Iq(Iq),
    /// Availability broadcast
    Presence(Presence),
    /// Text message
    Message(MessageStanza),
    /// Fatal stream-level error, followed by the server closing the stream
    StreamError(StanzaError),
    /// Orderly end of stream
    StreamClose,
}

/// Features advertised after a stream is opened
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFeatures {
    /// TLS upgrade is offered
    #[serde(default)]
    pub starttls: bool,
    /// TLS upgrade must happen before anything else
    #[serde(default)]
    pub starttls_required: bool,
    /// Authentication mechanisms on offer
    #[serde(default)]
    pub mechanisms: Vec<String>,
    /// In-band registration is enabled
    #[serde(default)]
    pub register: bool,
}

/// Error payload used by failures, IQ errors, and stream errors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StanzaError {
    /// Defined condition
    pub condition: ErrorCondition,
    /// Human-readable server text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl StanzaError {
    /// Create an error with optional text
    pub fn new(condition: ErrorCondition, text: Option<&str>) -> Self {
        Self {
            condition,
            text: text.map(str::to_string),
        }
    }

    /// Server text if present, otherwise the condition name
    pub fn reason(&self) -> String {
        self.text
            .clone()
            .unwrap_or_else(|| self.condition.to_string())
    }
}

/// Error conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ErrorCondition {
    /// Identity already exists
    Conflict,
    /// Credential refused
    NotAuthorized,
    /// Operation disabled by policy
    NotAllowed,
    /// Malformed request
    BadRequest,
    /// Server cannot serve the request
    ServiceUnavailable,
    /// Account locked or disabled
    AccountDisabled,
    /// Idle or connection timeout on the server side
    ConnectionTimeout,
    /// Anything else
    Undefined,
}

impl ErrorCondition {
    /// Wire label
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::NotAuthorized => "not_authorized",
            Self::NotAllowed => "not_allowed",
            Self::BadRequest => "bad_request",
            Self::ServiceUnavailable => "service_unavailable",
            Self::AccountDisabled => "account_disabled",
            Self::ConnectionTimeout => "connection_timeout",
            Self::Undefined => "undefined_condition",
        }
    }
}

impl From<String> for ErrorCondition {
    fn from(label: String) -> Self {
        match label.as_str() {
            "conflict" => Self::Conflict,
            "not_authorized" => Self::NotAuthorized,
            "not_allowed" => Self::NotAllowed,
            "bad_request" => Self::BadRequest,
            "service_unavailable" => Self::ServiceUnavailable,
            "account_disabled" => Self::AccountDisabled,
            "connection_timeout" => Self::ConnectionTimeout,
            _ => Self::Undefined,
        }
    }
}

impl From<ErrorCondition> for String {
    fn from(condition: ErrorCondition) -> Self {
        condition.as_str().to_string()
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IQ stanza
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Iq {
    /// Correlation id echoed by the response
    pub id: String,
    /// Request or response kind
    pub kind: IqKind,
    /// Query payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<Query>,
    /// Error payload for `IqKind::Error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StanzaError>,
}

/// IQ kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IqKind {
    /// Read request
    Get,
    /// Write request
    Set,
    /// Successful response
    Result,
    /// Failed response
    Error,
}

/// IQ query payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "ns", rename_all = "snake_case")]
pub enum Query {
    /// In-band account registration
    Register {
        /// Desired account name
        username: String,
        /// Desired password
        password: Credential,
    },
    /// Contact list
    Roster {
        /// Entries (empty in requests)
        #[serde(default)]
        items: Vec<RosterItem>,
    },
}

/// One contact-list entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterItem {
    /// Contact address
    pub identity: Identity,
    /// Display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Presence stanza
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presence {
    /// Sender (filled in by the server)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Identity>,
    /// Directed recipient; broadcast when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Identity>,
    /// Availability sub-state (`away`, `dnd`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show: Option<String>,
    /// Free-form status text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Message stanza
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageStanza {
    /// Sender (filled in by the server)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<Identity>,
    /// Recipient
    pub to: Identity,
    /// Message kind
    #[serde(default)]
    pub kind: MessageKind,
    /// Text body
    #[serde(default)]
    pub body: String,
}

/// Kind of a text message
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageKind {
    /// One-to-one conversation
    Chat,
    /// Standalone message (wire default)
    #[default]
    Normal,
    /// Any other kind, keeping its wire label
    Other(String),
}

impl MessageKind {
    /// Wire label
    pub fn as_str(&self) -> &str {
        match self {
            Self::Chat => "chat",
            Self::Normal => "normal",
            Self::Other(label) => label,
        }
    }
}

impl From<String> for MessageKind {
    fn from(label: String) -> Self {
        match label.as_str() {
            "chat" => Self::Chat,
            "normal" => Self::Normal,
            _ => Self::Other(label),
        }
    }
}

impl From<MessageKind> for String {
    fn from(kind: MessageKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Stanza {
    /// Open a stream towards `domain`
    pub fn stream_open(domain: &str) -> Self {
        Self::StreamOpen {
            to: domain.to_string(),
        }
    }

    /// SASL PLAIN authentication for `identity`
    pub fn auth_plain(identity: &Identity, credential: &Credential) -> Self {
        Self::Auth {
            mechanism: MECHANISM_PLAIN.to_string(),
            payload: plain_payload(identity.name(), credential),
        }
    }

    /// In-band registration request
    pub fn register_request(id: &str, identity: &Identity, credential: &Credential) -> Self {
        Self::Iq(Iq {
            id: id.to_string(),
            kind: IqKind::Set,
            query: Some(Query::Register {
                username: identity.name().to_string(),
                password: credential.clone(),
            }),
            error: None,
        })
    }

    /// Contact-list request
    pub fn roster_request(id: &str) -> Self {
        Self::Iq(Iq {
            id: id.to_string(),
            kind: IqKind::Get,
            query: Some(Query::Roster { items: Vec::new() }),
            error: None,
        })
    }

    /// Successful IQ response
    pub fn iq_result(id: &str, query: Option<Query>) -> Self {
        Self::Iq(Iq {
            id: id.to_string(),
            kind: IqKind::Result,
            query,
            error: None,
        })
    }

    /// Failed IQ response
    pub fn iq_error(id: &str, error: StanzaError) -> Self {
        Self::Iq(Iq {
            id: id.to_string(),
            kind: IqKind::Error,
            query: None,
            error: Some(error),
        })
    }

    /// Broadcast "available" presence
    pub fn available() -> Self {
        Self::Presence(Presence::default())
    }

    /// Outbound message
    pub fn message(to: &Identity, kind: MessageKind, body: &str) -> Self {
        Self::Message(MessageStanza {
            from: None,
            to: to.clone(),
            kind,
            body: body.to_string(),
        })
    }

    /// Stanza name for logs; never includes payload contents
    pub fn name(&self) -> &'static str {
        match self {
            Self::StreamOpen { .. } => "stream_open",
            Self::StreamFeatures(_) => "stream_features",
            Self::StartTls => "starttls",
            Self::Proceed => "proceed",
            Self::TlsFailure => "tls_failure",
            Self::Auth { .. } => "auth",
            Self::AuthSuccess => "auth_success",
            Self::AuthFailure(_) => "auth_failure",
            Self::Iq(_) => "iq",
            Self::Presence(_) => "presence",
            Self::Message(_) => "message",
            Self::StreamError(_) => "stream_error",
            Self::StreamClose => "stream_close",
        }
    }

    /// Serialize to one wire line (without the trailing newline)
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from one wire line
    pub fn decode(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim_end())
    }
}

/// Build the SASL PLAIN payload: base64 of `\0user\0password`.
pub fn plain_payload(username: &str, credential: &Credential) -> Credential {
    let mut raw = format!("\0{username}\0{}", credential.expose_secret());
    let encoded = BASE64.encode(raw.as_bytes());
    raw.zeroize();
    Credential::new(encoded)
}

/// Split a SASL PLAIN payload into `(username, password)`.
///
/// Returns `None` for payloads that are not valid base64 or lack the two
/// NUL separators.
pub fn parse_plain_payload(payload: &Credential) -> Option<(String, Credential)> {
    let raw = BASE64.decode(payload.expose_secret()).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let mut parts = text.splitn(3, '\0');
    let _authzid = parts.next()?;
    let username = parts.next()?.to_string();
    let password = Credential::new(parts.next()?);
    if username.is_empty() {
        return None;
    }
    Some((username, password))
}
