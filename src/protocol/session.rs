//! Session lifecycle state machine.
//!
//! Pure bookkeeping with no I/O: which state the session is in, whether
//! authentication ever succeeded, which correlated request is outstanding,
//! and when the session was last active. The network driver in
//! [`crate::client`] consults it before every operation.

use std::time::{Duration, Instant};

use thiserror::Error;

use super::SESSION_TIMEOUT_SECS;

/// Session state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No transport held (initial and terminal)
    Disconnected,
    /// Transport handshake in progress
    Connecting,
    /// Unauthenticated stream, registration allowed
    Registering,
    /// Stream open, waiting for credential exchange
    Authenticating,
    /// Authenticated, messages may flow
    Active,
    /// Graceful close in progress
    Disconnecting,
}

impl SessionState {
    /// Check whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::{
            Active, Authenticating, Connecting, Disconnected, Disconnecting, Registering,
        };

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Registering | Authenticating | Disconnected)
                | (Registering, Authenticating | Disconnecting | Disconnected)
                | (Authenticating, Active | Disconnecting | Disconnected)
                | (Active, Disconnecting | Disconnected)
                | (Disconnecting, Disconnected)
        )
    }

    /// States in which a transport is held.
    pub fn holds_transport(self) -> bool {
        !matches!(self, SessionState::Disconnected)
    }
}

/// What the stream is opened for
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionMode {
    /// Authenticate and exchange messages (default)
    #[default]
    Login,
    /// Create an account with in-band registration
    Register,
}

/// Purpose of the single outstanding correlated request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPurpose {
    /// Credential exchange
    Auth,
    /// In-band registration
    Register,
    /// Contact-list fetch
    Roster,
}

/// Rejected state change
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleError {
    /// Transition not in the state table
    #[error("Invalid transition {from:?} -> {to:?}")]
    InvalidTransition {
        /// Current state
        from: SessionState,
        /// Requested state
        to: SessionState,
    },
    /// Request not valid in the current state
    #[error("{purpose:?} request not allowed in state {state:?}")]
    RequestNotAllowed {
        /// Request kind
        purpose: RequestPurpose,
        /// Current state
        state: SessionState,
    },
    /// A correlated request is already in flight
    #[error("{0:?} request already outstanding")]
    RequestOutstanding(RequestPurpose),
}

#[derive(Debug, Clone)]
struct Pending {
    id: String,
    purpose: RequestPurpose,
}

/// Lifecycle bookkeeping for one session
#[derive(Debug, Clone)]
pub struct Lifecycle {
    state: SessionState,
    /// Set once, never cleared
    authenticated: bool,
    pending: Option<Pending>,
    last_activity: Instant,
    idle_timeout: Duration,
    stanzas_sent: u64,
    stanzas_received: u64,
    messages_delivered: u64,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new(Duration::from_secs(SESSION_TIMEOUT_SECS))
    }
}

impl Lifecycle {
    /// Create a disconnected lifecycle with the given idle timeout
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            state: SessionState::Disconnected,
            authenticated: false,
            pending: None,
            last_activity: Instant::now(),
            idle_timeout,
            stanzas_sent: 0,
            stanzas_received: 0,
            messages_delivered: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether authentication ever succeeded
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Check if the session is active
    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    /// Check if the session has been idle past its timeout
    pub fn is_expired(&self) -> bool {
        self.last_activity.elapsed() >= self.idle_timeout
    }

    /// Time left before the idle timeout fires
    pub fn idle_remaining(&self) -> Duration {
        self.idle_timeout.saturating_sub(self.last_activity.elapsed())
    }

    /// Move to `next`, enforcing the state table.
    pub fn transition(&mut self, next: SessionState) -> Result<(), LifecycleError> {
        if !self.state.can_transition_to(next) {
            return Err(LifecycleError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }

        tracing::debug!("session state {:?} -> {:?}", self.state, next);
        self.state = next;
        if next == SessionState::Active {
            self.authenticated = true;
        }
        if matches!(next, SessionState::Disconnecting | SessionState::Disconnected) {
            self.pending = None;
        }
        self.touch();
        Ok(())
    }

    /// Drop straight to `Disconnected` from any state.
    pub fn reset(&mut self) {
        if self.state != SessionState::Disconnected {
            tracing::debug!("session state {:?} -> Disconnected", self.state);
        }
        self.state = SessionState::Disconnected;
        self.pending = None;
    }

    /// Reserve the single request slot and return its correlation id.
    pub fn begin_request(&mut self, purpose: RequestPurpose) -> Result<String, LifecycleError> {
        let allowed = match purpose {
            RequestPurpose::Auth => self.state == SessionState::Authenticating,
            RequestPurpose::Register => self.state == SessionState::Registering,
            RequestPurpose::Roster => self.state == SessionState::Active,
        };
        if !allowed {
            return Err(LifecycleError::RequestNotAllowed {
                purpose,
                state: self.state,
            });
        }
        if let Some(pending) = &self.pending {
            return Err(LifecycleError::RequestOutstanding(pending.purpose));
        }

        let id = uuid::Uuid::new_v4().to_string();
        self.pending = Some(Pending {
            id: id.clone(),
            purpose,
        });
        Ok(id)
    }

    /// Check whether `id` answers the outstanding request.
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.as_ref().is_some_and(|p| p.id == id)
    }

    /// Outstanding request kind, if any
    pub fn pending_purpose(&self) -> Option<RequestPurpose> {
        self.pending.as_ref().map(|p| p.purpose)
    }

    /// Release the request slot.
    pub fn finish_request(&mut self) {
        self.pending = None;
    }

    /// Record an outbound stanza
    pub fn record_sent(&mut self) {
        self.stanzas_sent += 1;
        self.touch();
    }

    /// Record an inbound stanza
    pub fn record_received(&mut self) {
        self.stanzas_received += 1;
        self.touch();
    }

    /// Record a message handed to observers
    pub fn record_delivered(&mut self) {
        self.messages_delivered += 1;
    }

    /// Snapshot of counters
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state,
            authenticated: self.authenticated,
            stanzas_sent: self.stanzas_sent,
            stanzas_received: self.stanzas_received,
            messages_delivered: self.messages_delivered,
            idle_for: self.last_activity.elapsed(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }
}

/// Session statistics
#[derive(Debug, Clone)]
pub struct SessionStats {
    /// Current state
    pub state: SessionState,
    /// Authentication ever succeeded
    pub authenticated: bool,
    /// Stanzas written
    pub stanzas_sent: u64,
    /// Stanzas read
    pub stanzas_received: u64,
    /// Messages delivered to observers
    pub messages_delivered: u64,
    /// Time since last traffic
    pub idle_for: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active() -> Lifecycle {
        let mut lc = Lifecycle::default();
        lc.transition(SessionState::Connecting).unwrap();
        lc.transition(SessionState::Authenticating).unwrap();
        lc.transition(SessionState::Active).unwrap();
        lc
    }

    #[test]
    fn test_login_path() {
        let lc = active();
        assert_eq!(lc.state(), SessionState::Active);
        assert!(lc.is_authenticated());
        assert!(lc.is_active());
    }

    #[test]
    fn test_registration_path() {
        let mut lc = Lifecycle::default();
        lc.transition(SessionState::Connecting).unwrap();
        lc.transition(SessionState::Registering).unwrap();
        assert!(!lc.is_authenticated());

        lc.transition(SessionState::Authenticating).unwrap();
        lc.transition(SessionState::Active).unwrap();
        assert!(lc.is_authenticated());
    }

    #[test]
    fn test_illegal_transitions() {
        let mut lc = Lifecycle::default();
        assert_eq!(
            lc.transition(SessionState::Active),
            Err(LifecycleError::InvalidTransition {
                from: SessionState::Disconnected,
                to: SessionState::Active,
            })
        );

        lc.transition(SessionState::Connecting).unwrap();
        assert!(lc.transition(SessionState::Active).is_err());
        assert!(lc.transition(SessionState::Disconnecting).is_err());
        assert!(!SessionState::Active.can_transition_to(SessionState::Registering));
        assert!(!SessionState::Disconnecting.can_transition_to(SessionState::Active));
    }

    #[test]
    fn test_authenticated_flag_is_monotonic() {
        let mut lc = active();
        lc.transition(SessionState::Disconnecting).unwrap();
        lc.transition(SessionState::Disconnected).unwrap();
        assert!(lc.is_authenticated());
        lc.reset();
        assert!(lc.is_authenticated());
    }

    #[test]
    fn test_single_outstanding_request() {
        let mut lc = Lifecycle::default();
        lc.transition(SessionState::Connecting).unwrap();
        lc.transition(SessionState::Authenticating).unwrap();

        let id = lc.begin_request(RequestPurpose::Auth).unwrap();
        assert!(lc.is_pending(&id));
        assert!(!lc.is_pending("other"));
        assert_eq!(
            lc.begin_request(RequestPurpose::Auth),
            Err(LifecycleError::RequestOutstanding(RequestPurpose::Auth))
        );

        lc.finish_request();
        assert!(lc.pending_purpose().is_none());
        assert!(lc.begin_request(RequestPurpose::Auth).is_ok());
    }

    #[test]
    fn test_requests_gated_by_state() {
        let mut lc = Lifecycle::default();
        lc.transition(SessionState::Connecting).unwrap();
        lc.transition(SessionState::Authenticating).unwrap();

        assert!(matches!(
            lc.begin_request(RequestPurpose::Register),
            Err(LifecycleError::RequestNotAllowed { .. })
        ));
        assert!(matches!(
            lc.begin_request(RequestPurpose::Roster),
            Err(LifecycleError::RequestNotAllowed { .. })
        ));
    }

    #[test]
    fn test_closing_clears_pending() {
        let mut lc = active();
        lc.begin_request(RequestPurpose::Roster).unwrap();
        lc.transition(SessionState::Disconnecting).unwrap();
        assert!(lc.pending_purpose().is_none());
    }

    #[test]
    fn test_idle_expiry() {
        let lc = Lifecycle::new(Duration::from_millis(10));
        assert!(!lc.is_expired());
        std::thread::sleep(Duration::from_millis(20));
        assert!(lc.is_expired());
        assert_eq!(lc.idle_remaining(), Duration::ZERO);
    }

    #[test]
    fn test_stats_counters() {
        let mut lc = active();
        lc.record_sent();
        lc.record_sent();
        lc.record_received();
        lc.record_delivered();

        let stats = lc.stats();
        assert_eq!(stats.state, SessionState::Active);
        assert_eq!(stats.stanzas_sent, 2);
        assert_eq!(stats.stanzas_received, 1);
        assert_eq!(stats.messages_delivered, 1);
    }
}
