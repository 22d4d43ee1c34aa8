use std::fmt::Display;

use thiserror::Error;

use crate::db_types::ConnectionState;

/// Things that happen to a connection. Only the lifecycle manager feeds these into [`ConnectionState::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleEvent {
    AuthorizationStarted,
    AuthorizationGranted,
    /// Callback failure, tampered state, or no callback within the validity window
    AuthorizationFailed,
    ExpiryApproaching,
    RefreshStarted,
    /// `still_expiring` is true when the refreshed consent is itself inside the expiry threshold
    RefreshSucceeded { still_expiring: bool },
    /// The refresh failed for a transient reason. The old credential is still valid, and `still_expiring` is true
    /// when its consent is inside the expiry threshold.
    RefreshDeferred { still_expiring: bool },
    RefreshRejected,
    IrrecoverableError,
    Disconnected,
}

impl Display for LifecycleEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Illegal lifecycle transition: {event} in state {from}")]
pub struct IllegalTransition {
    pub from: ConnectionState,
    pub event: LifecycleEvent,
}

impl ConnectionState {
    /// The transition table. Returns the next state, or an error if `event` cannot happen in this state.
    pub fn apply(self, event: LifecycleEvent) -> Result<ConnectionState, IllegalTransition> {
        use ConnectionState::*;
        use LifecycleEvent::*;
        let next = match (self, event) {
            (Unconnected, AuthorizationStarted) => AuthorizationPending,
            (AuthorizationPending, AuthorizationFailed) => Unconnected,
            (AuthorizationPending, AuthorizationGranted) => Connected,
            // Reauthorization through the redirect flow
            (ExpiringSoon | ReauthorizationRequired, AuthorizationGranted) => Connected,
            (Connected, ExpiryApproaching) => ExpiringSoon,
            (Connected | ExpiringSoon, RefreshStarted) => Reauthorizing,
            (Reauthorizing, RefreshSucceeded { still_expiring: false }) => Connected,
            (Reauthorizing, RefreshSucceeded { still_expiring: true }) => ExpiringSoon,
            (Reauthorizing, RefreshDeferred { still_expiring: false }) => Connected,
            (Reauthorizing, RefreshDeferred { still_expiring: true }) => ExpiringSoon,
            (Connected | ExpiringSoon | Reauthorizing, RefreshRejected | IrrecoverableError) => {
                ReauthorizationRequired
            },
            (Connected | ExpiringSoon | Reauthorizing | ReauthorizationRequired, Disconnected) => Revoked,
            (from, event) => return Err(IllegalTransition { from, event }),
        };
        Ok(next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ConnectionState::Revoked)
    }
}
