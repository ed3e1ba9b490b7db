//! Live session driver.
//!
//! A [`Session`] owns its transport exclusively. Every operation takes
//! `&mut self`, reads only while it waits for something specific, and hands
//! inbound messages to observers on the calling task.

use std::fmt;
use std::io;
use std::time::Duration;

use tokio::time::{timeout, timeout_at, Instant};

use super::events::{
    message_observer, EndReason, InboundMessage, Observers, SessionEvent, SessionObserver,
};
use crate::config::ClientConfig;
use crate::error::{AuthError, RegisterError, SendError};
use crate::protocol::{
    Credential, ErrorCondition, Identity, IqKind, Lifecycle, MessageKind, Query,
    RequestPurpose, RosterItem, SessionState, SessionStats, Stanza, StanzaError,
};
use crate::transport::Transport;

/// Outcome of one bounded read
enum Inbound {
    Stanza(Stanza),
    Closed,
    Elapsed,
    Failed(io::Error),
}

/// Outcome of dispatching one stanza on an active session
enum Dispatch {
    Delivered,
    Handled,
    Ended(EndReason),
}

// Roughly thirty years; stands in for "no deadline".
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `now + after`, saturating instead of overflowing.
fn deadline_after(after: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(after).unwrap_or_else(|| now + FAR_FUTURE)
}

/// Connected session
pub struct Session {
    transport: Option<Box<dyn Transport>>,
    lifecycle: Lifecycle,
    identity: Identity,
    credential: Credential,
    config: ClientConfig,
    observers: Observers,
}

impl Session {
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        lifecycle: Lifecycle,
        identity: Identity,
        credential: Credential,
        config: ClientConfig,
        observers: Observers,
    ) -> Self {
        Self {
            transport: Some(transport),
            lifecycle,
            identity,
            credential,
            config,
            observers,
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.lifecycle.state()
    }

    /// Check if the session is active
    pub fn is_active(&self) -> bool {
        self.lifecycle.is_active()
    }

    /// Whether authentication ever succeeded on this session
    pub fn is_authenticated(&self) -> bool {
        self.lifecycle.is_authenticated()
    }

    /// Identity the session authenticates as
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Get session statistics
    pub fn stats(&self) -> SessionStats {
        self.lifecycle.stats()
    }

    /// Call `callback` for every inbound message.
    pub fn on_message<F>(&mut self, callback: F)
    where
        F: FnMut(&InboundMessage) + Send + 'static,
    {
        self.observers.push(message_observer(callback));
    }

    /// Observe every session event.
    pub fn subscribe<O>(&mut self, observer: O)
    where
        O: SessionObserver + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Exchange the credential. On success the session becomes `Active`;
    /// on any failure it is `Disconnected`.
    pub async fn authenticate(&mut self) -> Result<(), AuthError> {
        let state = self.lifecycle.state();
        self.lifecycle
            .begin_request(RequestPurpose::Auth)
            .map_err(|_| AuthError::InvalidState(state))?;

        let request = Stanza::auth_plain(&self.identity, &self.credential);
        if let Err(e) = self.write(&request).await {
            self.close(false).await;
            return Err(AuthError::Transport(e.to_string()));
        }

        let deadline = deadline_after(self.config.response_timeout());
        loop {
            match self.read_until(deadline).await {
                Inbound::Stanza(Stanza::AuthSuccess) => {
                    self.lifecycle.finish_request();
                    self.lifecycle
                        .transition(SessionState::Active)
                        .map_err(|_| AuthError::InvalidState(self.lifecycle.state()))?;
                    tracing::info!("Authenticated as {}", self.identity);
                    let identity = self.identity.clone();
                    self.observers
                        .emit(&SessionEvent::SessionStarted { identity });
                    return Ok(());
                },
                Inbound::Stanza(Stanza::AuthFailure(err)) => {
                    tracing::info!(
                        "Authentication as {} rejected: {}",
                        self.identity,
                        err.reason()
                    );
                    self.close(true).await;
                    return Err(match err.condition {
                        ErrorCondition::NotAuthorized => AuthError::InvalidCredential,
                        _ => AuthError::ServerRejected(err.reason()),
                    });
                },
                Inbound::Stanza(Stanza::StreamError(err)) => {
                    self.close(false).await;
                    return Err(AuthError::ServerRejected(err.reason()));
                },
                Inbound::Stanza(other) => {
                    tracing::debug!("Ignoring {} while authenticating", other.name());
                },
                Inbound::Closed => {
                    self.close(false).await;
                    return Err(AuthError::Transport(
                        "server closed the stream".to_string(),
                    ));
                },
                Inbound::Failed(e) => {
                    self.close(false).await;
                    return Err(AuthError::Transport(e.to_string()));
                },
                Inbound::Elapsed => {
                    self.close(false).await;
                    return Err(AuthError::Timeout(self.config.response_timeout()));
                },
            }
        }
    }

    /// Create `identity` with in-band registration.
    ///
    /// Only valid on a session opened in registration mode. On success the
    /// session either closes or, with `login_after_register`, switches to
    /// the new identity and waits in `Authenticating`.
    pub async fn register(
        &mut self,
        identity: &Identity,
        credential: &Credential,
    ) -> Result<(), RegisterError> {
        let state = self.lifecycle.state();
        let id = self
            .lifecycle
            .begin_request(RequestPurpose::Register)
            .map_err(|_| RegisterError::InvalidState(state))?;

        if identity.domain() != self.identity.domain() {
            tracing::warn!(
                "Registering {} on a stream opened for {}",
                identity,
                self.identity.domain()
            );
        }

        let request = Stanza::register_request(&id, identity, credential);
        if let Err(e) = self.write(&request).await {
            self.close(false).await;
            return Err(RegisterError::Transport(e.to_string()));
        }

        let deadline = deadline_after(self.config.response_timeout());
        loop {
            match self.read_until(deadline).await {
                Inbound::Stanza(Stanza::Iq(iq)) if self.lifecycle.is_pending(&iq.id) => {
                    self.lifecycle.finish_request();
                    if iq.kind == IqKind::Result {
                        return self.registered(identity, credential).await;
                    }

                    let err = iq
                        .error
                        .unwrap_or_else(|| StanzaError::new(ErrorCondition::Undefined, None));
                    tracing::info!("Registration of {} rejected: {}", identity, err.reason());
                    self.close(true).await;
                    return Err(match err.condition {
                        ErrorCondition::Conflict => RegisterError::Conflict,
                        _ => RegisterError::ServerRejected(err.reason()),
                    });
                },
                Inbound::Stanza(Stanza::StreamError(err)) => {
                    self.close(false).await;
                    return Err(RegisterError::ServerRejected(err.reason()));
                },
                Inbound::Stanza(other) => {
                    tracing::debug!("Ignoring {} while registering", other.name());
                },
                Inbound::Closed => {
                    self.close(false).await;
                    return Err(RegisterError::Transport(
                        "server closed the stream".to_string(),
                    ));
                },
                Inbound::Failed(e) => {
                    self.close(false).await;
                    return Err(RegisterError::Transport(e.to_string()));
                },
                Inbound::Elapsed => {
                    self.close(false).await;
                    return Err(RegisterError::Timeout(self.config.response_timeout()));
                },
            }
        }
    }

    async fn registered(
        &mut self,
        identity: &Identity,
        credential: &Credential,
    ) -> Result<(), RegisterError> {
        tracing::info!("Registered {}", identity);
        if !self.config.login_after_register {
            self.close(true).await;
            return Ok(());
        }

        self.identity = identity.clone();
        self.credential = credential.clone();
        self.lifecycle
            .transition(SessionState::Authenticating)
            .map_err(|_| RegisterError::InvalidState(self.lifecycle.state()))
    }

    /// Broadcast availability. Only the write is reported.
    pub async fn announce_presence(&mut self) -> Result<(), SendError> {
        self.ensure_active().await?;
        self.send_active(&Stanza::available()).await
    }

    /// Send a text message. Fails with `NotConnected`, without touching the
    /// transport, unless the session is `Active`.
    pub async fn send_message(
        &mut self,
        to: &Identity,
        body: &str,
        kind: MessageKind,
    ) -> Result<(), SendError> {
        self.ensure_active().await?;
        tracing::debug!("Sending {} message to {}", kind, to);
        self.send_active(&Stanza::message(to, kind, body)).await
    }

    /// Fetch the contact list. Messages arriving meanwhile reach observers.
    pub async fn fetch_roster(&mut self) -> Result<Vec<RosterItem>, SendError> {
        self.ensure_active().await?;
        let id = self
            .lifecycle
            .begin_request(RequestPurpose::Roster)
            .map_err(|_| SendError::NotConnected)?;
        if let Err(e) = self.send_active(&Stanza::roster_request(&id)).await {
            self.lifecycle.finish_request();
            return Err(e);
        }

        let deadline = deadline_after(self.config.response_timeout());
        loop {
            match self.read_until(deadline).await {
                Inbound::Stanza(Stanza::Iq(iq)) if self.lifecycle.is_pending(&iq.id) => {
                    self.lifecycle.finish_request();
                    return match (iq.kind, iq.query, iq.error) {
                        (IqKind::Result, Some(Query::Roster { items }), _) => {
                            tracing::debug!("Roster has {} item(s)", items.len());
                            Ok(items)
                        },
                        (IqKind::Result, _, _) => Ok(Vec::new()),
                        (_, _, error) => Err(SendError::TransportFailure(format!(
                            "roster request failed: {}",
                            error.map_or_else(|| "no reason given".to_string(), |e| e.reason())
                        ))),
                    };
                },
                Inbound::Stanza(stanza) => {
                    if let Dispatch::Ended(reason) = self.dispatch(stanza) {
                        self.end(reason, false).await;
                        return Err(SendError::NotConnected);
                    }
                },
                Inbound::Elapsed => {
                    self.lifecycle.finish_request();
                    return Err(SendError::TransportFailure(format!(
                        "no roster response within {:?}",
                        self.config.response_timeout()
                    )));
                },
                Inbound::Closed => {
                    self.end(EndReason::ServerClosed, false).await;
                    return Err(SendError::NotConnected);
                },
                Inbound::Failed(e) => return Err(self.fail(e).await),
            }
        }
    }

    /// Read and dispatch inbound stanzas for up to `window`.
    ///
    /// Returns early when the peer closes or the idle timeout fires; the
    /// count is the number of messages delivered to observers.
    pub async fn process(&mut self, window: Duration) -> Result<usize, SendError> {
        self.ensure_active().await?;
        let end = deadline_after(window);
        let mut delivered = 0;

        loop {
            let deadline = end.min(deadline_after(self.lifecycle.idle_remaining()));
            match self.read_until(deadline).await {
                Inbound::Stanza(stanza) => match self.dispatch(stanza) {
                    Dispatch::Delivered => delivered += 1,
                    Dispatch::Handled => {},
                    Dispatch::Ended(reason) => {
                        self.end(reason, false).await;
                        return Ok(delivered);
                    },
                },
                Inbound::Elapsed => {
                    if self.lifecycle.is_expired() {
                        self.end(EndReason::IdleTimeout, true).await;
                        return Ok(delivered);
                    }
                    if Instant::now() >= end {
                        return Ok(delivered);
                    }
                },
                Inbound::Closed => {
                    self.end(EndReason::ServerClosed, false).await;
                    return Ok(delivered);
                },
                Inbound::Failed(e) => return Err(self.fail(e).await),
            }
        }
    }

    /// Close the stream gracefully. Safe to call any number of times.
    pub async fn disconnect(&mut self) {
        if self.transport.is_none() {
            tracing::debug!("Session for {} already disconnected", self.identity);
            self.lifecycle.reset();
            return;
        }
        self.end(EndReason::Requested, true).await;
    }

    async fn ensure_active(&mut self) -> Result<(), SendError> {
        if !self.lifecycle.is_active() {
            return Err(SendError::NotConnected);
        }
        if self.lifecycle.is_expired() {
            self.end(EndReason::IdleTimeout, true).await;
            return Err(SendError::NotConnected);
        }
        Ok(())
    }

    async fn send_active(&mut self, stanza: &Stanza) -> Result<(), SendError> {
        match self.write(stanza).await {
            Ok(()) => Ok(()),
            // Oversized stanza; nothing was written.
            Err(e) if e.kind() == io::ErrorKind::InvalidInput => {
                Err(SendError::TransportFailure(e.to_string()))
            },
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn fail(&mut self, err: io::Error) -> SendError {
        let reason = err.to_string();
        self.end(EndReason::TransportFailure(reason.clone()), false)
            .await;
        SendError::TransportFailure(reason)
    }

    fn dispatch(&mut self, stanza: Stanza) -> Dispatch {
        match stanza {
            Stanza::Message(msg) => match InboundMessage::from_stanza(msg) {
                Some(inbound) => {
                    tracing::debug!("Message from {} ({})", inbound.from, inbound.kind);
                    self.lifecycle.record_delivered();
                    self.observers
                        .emit(&SessionEvent::MessageReceived(inbound));
                    Dispatch::Delivered
                },
                None => {
                    tracing::debug!("Dropping message without sender");
                    Dispatch::Handled
                },
            },
            Stanza::Presence(presence) => {
                match presence.from {
                    Some(from) => tracing::debug!("Presence from {}", from),
                    None => tracing::debug!("Presence from server"),
                }
                Dispatch::Handled
            },
            Stanza::Iq(iq) => {
                tracing::debug!("Ignoring uncorrelated iq {} ({:?})", iq.id, iq.kind);
                Dispatch::Handled
            },
            Stanza::StreamError(err) => Dispatch::Ended(EndReason::StreamError(err.reason())),
            Stanza::StreamClose => Dispatch::Ended(EndReason::ServerClosed),
            other => {
                tracing::debug!("Ignoring unexpected {} on active session", other.name());
                Dispatch::Handled
            },
        }
    }

    async fn write(&mut self, stanza: &Stanza) -> io::Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no transport"))?;
        transport.send(stanza).await?;
        self.lifecycle.record_sent();
        tracing::debug!("-> {}", stanza.name());
        Ok(())
    }

    async fn read_until(&mut self, deadline: Instant) -> Inbound {
        let Some(transport) = self.transport.as_mut() else {
            return Inbound::Closed;
        };
        match timeout_at(deadline, transport.recv()).await {
            Err(_) => Inbound::Elapsed,
            Ok(Ok(Some(stanza))) => {
                self.lifecycle.record_received();
                tracing::debug!("<- {}", stanza.name());
                Inbound::Stanza(stanza)
            },
            Ok(Ok(None)) => Inbound::Closed,
            Ok(Err(e)) => Inbound::Failed(e),
        }
    }

    /// Close, then tell observers if an active session just ended.
    async fn end(&mut self, reason: EndReason, await_peer: bool) {
        let was_active = self.lifecycle.is_active();
        match &reason {
            EndReason::Requested | EndReason::ServerClosed => {
                tracing::info!("Session for {} ending: {}", self.identity, reason);
            },
            _ => tracing::warn!("Session for {} ending: {}", self.identity, reason),
        }

        self.close(await_peer).await;
        if was_active {
            self.observers.emit(&SessionEvent::SessionEnded(reason));
        }
    }

    /// Send `stream_close`, optionally wait for the peer's, then release the
    /// transport. Bounded by the close timeout.
    async fn close(&mut self, await_peer: bool) {
        let Some(mut transport) = self.transport.take() else {
            self.lifecycle.reset();
            return;
        };
        if self.lifecycle.state() != SessionState::Disconnecting {
            if let Err(e) = self.lifecycle.transition(SessionState::Disconnecting) {
                tracing::debug!("{}", e);
            }
        }

        let close_timeout = self.config.close_timeout();
        match timeout(close_timeout, close_stream(transport.as_mut(), await_peer)).await {
            Ok(Ok(())) => tracing::debug!("Stream to {} closed", transport.peer()),
            Ok(Err(e)) => tracing::debug!("Close handshake with {} failed: {}", transport.peer(), e),
            Err(_) => tracing::warn!(
                "{} did not confirm close within {:?}, forcing",
                transport.peer(),
                close_timeout
            ),
        }
        match timeout(close_timeout, transport.shutdown()).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::debug!("Transport shutdown failed: {}", e),
            Err(_) => tracing::debug!("Transport shutdown timed out"),
        }

        drop(transport);
        self.lifecycle.reset();
    }
}

async fn close_stream(transport: &mut dyn Transport, await_peer: bool) -> io::Result<()> {
    transport.send(&Stanza::StreamClose).await?;
    if !await_peer {
        return Ok(());
    }
    loop {
        match transport.recv().await? {
            Some(Stanza::StreamClose) | None => return Ok(()),
            Some(other) => tracing::debug!("Discarding {} while closing", other.name()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.transport.is_some() {
            tracing::debug!(
                "Session for {} dropped in state {:?}, releasing transport",
                self.identity,
                self.lifecycle.state()
            );
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("identity", &format_args!("{}", self.identity))
            .field("state", &self.lifecycle.state())
            .field("transport", &self.transport.as_ref().map(|t| t.name()))
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}
