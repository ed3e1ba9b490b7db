//! Courier error types.
//!
//! Every session operation has its own error enum so callers can match on
//! exactly the failures that operation can produce:
//!
//! | Operation      | Error           | Variants                                      |
//! |----------------|-----------------|-----------------------------------------------|
//! | `connect`      | [`ConnectError`]  | `Unreachable`, `Timeout`, `HandshakeFailed`  |
//! | `authenticate` | [`AuthError`]     | `InvalidCredential`, `ServerRejected`, ...   |
//! | `register`     | [`RegisterError`] | `Conflict`, `ServerRejected`, ...            |
//! | `send_message` | [`SendError`]     | `NotConnected`, `TransportFailure`           |
//!
//! None of these are retried internally. [`CourierError`] aggregates them for
//! callers that only want a single `?`-friendly type.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::SessionState;

/// Failure to establish a transport and open the stream.
#[derive(Error, Debug)]
pub enum ConnectError {
    /// Address did not resolve or the connection was refused.
    #[error("Server unreachable: {0}")]
    Unreachable(String),

    /// The connect timeout elapsed before the handshake finished.
    #[error("Connect timed out after {0:?}")]
    Timeout(Duration),

    /// Stream opening or security negotiation failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
}

/// Failure during the credential exchange.
#[derive(Error, Debug)]
pub enum AuthError {
    /// The server refused the credential.
    #[error("Invalid credential")]
    InvalidCredential,

    /// The server rejected authentication for another reason.
    #[error("Server rejected authentication: {0}")]
    ServerRejected(String),

    /// `authenticate` called outside the authenticating phase.
    #[error("Cannot authenticate in state {0:?}")]
    InvalidState(SessionState),

    /// No response arrived within the response timeout.
    #[error("Authentication timed out after {0:?}")]
    Timeout(Duration),

    /// The transport failed mid-exchange.
    #[error("Transport failure during authentication: {0}")]
    Transport(String),
}

/// Failure during in-band registration.
#[derive(Error, Debug)]
pub enum RegisterError {
    /// The requested identity is already taken.
    #[error("Identity already registered")]
    Conflict,

    /// The server rejected the registration.
    #[error("Server rejected registration: {0}")]
    ServerRejected(String),

    /// `register` called on a session that is not in the registering phase.
    #[error("Cannot register in state {0:?}")]
    InvalidState(SessionState),

    /// No response arrived within the response timeout.
    #[error("Registration timed out after {0:?}")]
    Timeout(Duration),

    /// The transport failed mid-exchange.
    #[error("Transport failure during registration: {0}")]
    Transport(String),
}

/// Failure to send on an active session.
#[derive(Error, Debug)]
pub enum SendError {
    /// The session is not `Active`.
    #[error("Session not connected")]
    NotConnected,

    /// The write failed or the peer went away.
    #[error("Transport failure: {0}")]
    TransportFailure(String),
}

/// Account-admin tool invocation that did not succeed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{command} failed: {stderr}")]
pub struct AdminError {
    /// Admin sub-command name.
    pub command: &'static str,
    /// Trimmed stderr (or the spawn error).
    pub stderr: String,
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// File could not be read.
    #[error("Failed to read config file: {0}")]
    Read(#[source] std::io::Error),

    /// File is not valid TOML for the config schema.
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is missing or out of range.
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Aggregate error for callers that do not care which operation failed.
#[derive(Error, Debug)]
pub enum CourierError {
    /// Connect error.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// Authentication error.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Registration error.
    #[error(transparent)]
    Register(#[from] RegisterError),

    /// Send error.
    #[error(transparent)]
    Send(#[from] SendError),

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Account-admin error.
    #[error(transparent)]
    Admin(#[from] AdminError),

    /// Malformed identity string.
    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),

    /// Wire-level protocol violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for Courier operations
pub type Result<T> = std::result::Result<T, CourierError>;

impl From<std::io::Error> for SendError {
    fn from(err: std::io::Error) -> Self {
        SendError::TransportFailure(err.to_string())
    }
}

impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Transport(err.to_string())
    }
}

impl From<std::io::Error> for RegisterError {
    fn from(err: std::io::Error) -> Self {
        RegisterError::Transport(err.to_string())
    }
}
