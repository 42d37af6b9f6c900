//! Lifecycle events published by the client.

use std::time::Duration;

/// Lifecycle notifications, delivered to [`subscribe`](super::GatewayClient::subscribe) receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Session established or resumed.
    Connected {
        /// Session id issued by the gateway.
        session_id: Option<String>,
        /// Whether an earlier session was continued.
        resumed: bool,
    },
    /// The current connection was lost.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
    /// Waiting before the next connection attempt.
    Reconnecting {
        /// Attempt number.
        attempt: u32,
        /// Delay before the attempt.
        delay: Duration,
    },
    /// Reconnection gave up after too many attempts.
    ReconnectFailed {
        /// Attempts made.
        attempts: u32,
    },
    /// The client shut down.
    Closed,
}
