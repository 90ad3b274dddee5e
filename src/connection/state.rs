//! Connection states and transition records.

use crate::types::Timestamp;
use std::fmt;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created; nothing sent yet.
    Initial,
    /// A transmit failed and is being retried.
    Connecting,
    Connected,
    /// Offline budget exceeded in tolerant mode. Retries continue.
    Offline,
    /// Terminal until the client is recreated. Calls fail fast.
    Faulted,
    Disposed,
}

impl ConnectionState {
    /// Whether moving to `next` is allowed. Faulted only leads to Disposed;
    /// Disposed leads nowhere.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        match self {
            ConnectionState::Disposed => false,
            ConnectionState::Faulted => next == ConnectionState::Disposed,
            _ => self != next,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A state transition, delivered to listeners in the order it happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChange {
    pub old: ConnectionState,
    pub new: ConnectionState,
    pub at: Timestamp,
}

pub type StateListener = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faulted_only_leads_to_disposed() {
        assert!(ConnectionState::Faulted.can_transition_to(ConnectionState::Disposed));
        assert!(!ConnectionState::Faulted.can_transition_to(ConnectionState::Connected));
        assert!(!ConnectionState::Disposed.can_transition_to(ConnectionState::Initial));
    }

    #[test]
    fn test_offline_can_reconnect() {
        assert!(ConnectionState::Offline.can_transition_to(ConnectionState::Connected));
        assert!(ConnectionState::Offline.can_transition_to(ConnectionState::Connecting));
        assert!(!ConnectionState::Connected.can_transition_to(ConnectionState::Connected));
    }
}
