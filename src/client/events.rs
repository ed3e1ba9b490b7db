//! Session events and observers.

use std::fmt;

use crate::protocol::{Identity, MessageKind, MessageStanza};

/// Message delivered to observers while the session is active
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Sender
    pub from: Identity,
    /// Text body
    pub body: String,
    /// Message kind
    pub kind: MessageKind,
}

impl InboundMessage {
    /// Convert a wire message; messages without a sender are dropped.
    pub(crate) fn from_stanza(msg: MessageStanza) -> Option<Self> {
        let from = msg.from?;
        Some(Self {
            from,
            body: msg.body,
            kind: msg.kind,
        })
    }
}

/// Why a session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Local `disconnect`
    Requested,
    /// No traffic within the idle timeout
    IdleTimeout,
    /// Peer closed the stream
    ServerClosed,
    /// Peer sent a stream error
    StreamError(String),
    /// Read or write failed
    TransportFailure(String),
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("disconnect requested"),
            Self::IdleTimeout => f.write_str("idle timeout"),
            Self::ServerClosed => f.write_str("server closed the stream"),
            Self::StreamError(reason) => write!(f, "stream error: {reason}"),
            Self::TransportFailure(reason) => write!(f, "transport failure: {reason}"),
        }
    }
}

/// Session lifecycle events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Authentication succeeded; the session is active
    SessionStarted {
        /// Authenticated identity
        identity: Identity,
    },
    /// A message arrived
    MessageReceived(InboundMessage),
    /// An active session ended
    SessionEnded(EndReason),
}

/// Receiver of session events.
///
/// Observers run inline on the task driving the session and must return
/// quickly.
pub trait SessionObserver: Send {
    /// Handle one event
    fn on_event(&mut self, event: &SessionEvent);
}

impl<F> SessionObserver for F
where
    F: FnMut(&SessionEvent) + Send,
{
    fn on_event(&mut self, event: &SessionEvent) {
        self(event)
    }
}

/// Boxed observer
pub type BoxedObserver = Box<dyn SessionObserver>;

/// Wrap a message-only callback as an event observer.
pub(crate) fn message_observer<F>(mut callback: F) -> BoxedObserver
where
    F: FnMut(&InboundMessage) + Send + 'static,
{
    Box::new(move |event: &SessionEvent| {
        if let SessionEvent::MessageReceived(msg) = event {
            callback(msg);
        }
    })
}

/// Ordered observer list
#[derive(Default)]
pub(crate) struct Observers {
    inner: Vec<BoxedObserver>,
}

impl Observers {
    pub(crate) fn push(&mut self, observer: BoxedObserver) {
        self.inner.push(observer);
    }

    pub(crate) fn emit(&mut self, event: &SessionEvent) {
        for observer in &mut self.inner {
            observer.on_event(event);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.len()
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observers({})", self.inner.len())
    }
}
