//! Error types for the richgate-proto crate.

use thiserror::Error;

/// Errors that can occur while encoding or decoding gateway frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtoError {
    /// Failed to encode an envelope.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// The frame was not valid JSON or had the wrong shape.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// The frame carried an operation code this client does not know.
    #[error("unknown opcode: {0}")]
    UnknownOpcode(u64),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}
