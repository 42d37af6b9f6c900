//! The gateway envelope and its JSON codec.
//!
//! Every frame on the wire is a JSON object of the shape
//! `{"op": int, "d": any, "s": int|null, "t": string|null}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{OpCode, ProtoError};

/// One protocol message exchanged with the gateway.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    /// Operation code.
    pub op: OpCode,
    /// Payload.
    pub d: Value,
    /// Sequence number, present on dispatch envelopes only.
    pub s: Option<u64>,
    /// Event name, present on dispatch envelopes only.
    pub t: Option<String>,
}

/// Wire shape before the opcode has been validated.
#[derive(Deserialize)]
struct RawEnvelope {
    op: Option<u64>,
    #[serde(default)]
    d: Value,
    #[serde(default)]
    s: Option<u64>,
    #[serde(default)]
    t: Option<String>,
}

impl Envelope {
    /// Create an envelope without sequence or event name.
    #[must_use]
    pub const fn new(op: OpCode, d: Value) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// Create a dispatch envelope.
    #[must_use]
    pub fn dispatch(sequence: u64, event: impl Into<String>, d: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            d,
            s: Some(sequence),
            t: Some(event.into()),
        }
    }

    /// Event name of a dispatch envelope.
    #[must_use]
    pub fn event_name(&self) -> Option<&str> {
        self.t.as_deref()
    }

    /// Serialize to a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails, which cannot happen for
    /// envelopes built from `serde_json::Value` payloads.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from a JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns [`ProtoError::Decoding`] for malformed JSON,
    /// [`ProtoError::MissingField`] when `op` is absent and
    /// [`ProtoError::UnknownOpcode`] for codes outside the protocol table.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        let raw: RawEnvelope =
            serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))?;
        let code = raw.op.ok_or(ProtoError::MissingField("op"))?;
        let op = OpCode::try_from(code)?;

        Ok(Self {
            op,
            d: raw.d,
            s: raw.s,
            t: raw.t,
        })
    }
}
