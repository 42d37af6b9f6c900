//! Error types for richgate.

use thiserror::Error;

use crate::gateway::Phase;

/// Errors surfaced by the gateway client.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The operation needs an established session.
    #[error("session is not connected (phase: {phase})")]
    NotConnected {
        /// Phase at the time of the call.
        phase: Phase,
    },

    /// The client was shut down.
    #[error("client is closed")]
    Closed,

    /// A frame could not be handed to the channel.
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A dispatch handler failed.
    #[error("handler for {event} failed: {message}")]
    Handler {
        /// Event the handler was registered for.
        event: String,
        /// Failure description.
        message: String,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] richgate_proto::ProtoError),
}
