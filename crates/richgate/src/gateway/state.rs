//! Session phase and state snapshots.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

/// Phase of the gateway session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Not connected and not trying to.
    Disconnected,
    /// Opening a channel for a fresh session.
    Connecting,
    /// Channel open, waiting for the gateway's hello.
    AwaitingHello,
    /// Identify sent, waiting for the ready event.
    Identifying,
    /// Session established.
    Connected,
    /// Continuing a previous session on a new channel.
    Resuming,
    /// Connection lost, waiting out the backoff delay.
    Reconnecting,
    /// Shut down. Terminal.
    Closed,
}

impl Phase {
    /// Whether a channel is open or being opened in this phase.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Connecting
                | Self::AwaitingHello
                | Self::Identifying
                | Self::Connected
                | Self::Resuming
        )
    }

    /// Lowercase name used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Connected => "connected",
            Self::Resuming => "resuming",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of the session state, published after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current phase.
    pub phase: Phase,
    /// Session id issued by the gateway.
    pub session_id: Option<String>,
    /// Highest dispatch sequence seen.
    pub last_sequence: Option<u64>,
    /// Heartbeat interval from the last hello.
    pub heartbeat_interval: Option<Duration>,
    /// Whether the most recent heartbeat was acknowledged.
    pub last_heartbeat_ack_received: bool,
    /// When the most recent heartbeat was sent.
    pub last_heartbeat_sent_at: Option<Instant>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            phase: Phase::Disconnected,
            session_id: None,
            last_sequence: None,
            heartbeat_interval: None,
            last_heartbeat_ack_received: true,
            last_heartbeat_sent_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_phases() {
        assert!(Phase::Connecting.is_active());
        assert!(Phase::AwaitingHello.is_active());
        assert!(Phase::Identifying.is_active());
        assert!(Phase::Connected.is_active());
        assert!(Phase::Resuming.is_active());

        assert!(!Phase::Disconnected.is_active());
        assert!(!Phase::Reconnecting.is_active());
        assert!(!Phase::Closed.is_active());
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::AwaitingHello.to_string(), "awaiting_hello");
        assert_eq!(Phase::Closed.to_string(), "closed");
    }

    #[test]
    fn test_default_snapshot() {
        let snapshot = SessionSnapshot::default();
        assert_eq!(snapshot.phase, Phase::Disconnected);
        assert!(snapshot.session_id.is_none());
        assert!(snapshot.last_sequence.is_none());
        assert!(snapshot.last_heartbeat_ack_received);
    }
}
