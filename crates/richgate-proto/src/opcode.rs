//! Gateway operation codes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Operation code carried in the `op` field of every envelope.
///
/// The numeric values are part of the remote protocol and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum OpCode {
    /// Application event pushed by the gateway.
    Dispatch = 0,
    /// Liveness pulse, sent by either side.
    Heartbeat = 1,
    /// Session handshake with credentials (outbound only).
    Identify = 2,
    /// Presence change (outbound only).
    PresenceUpdate = 3,
    /// Session continuation after a reconnect (outbound only).
    Resume = 5,
    /// Resume acknowledgment variant; treated as a reconnect trigger.
    ResumeAck = 6,
    /// The gateway asks the client to reconnect.
    Reconnect = 7,
    /// Member-list request or response.
    RequestMembers = 8,
    /// The current session is no longer valid.
    InvalidSession = 9,
    /// First frame of a connection, carries the heartbeat interval.
    Hello = 10,
    /// Acknowledges the last heartbeat.
    HeartbeatAck = 11,
}

impl OpCode {
    /// Numeric value on the wire.
    #[must_use]
    pub const fn code(self) -> u64 {
        self as u64
    }

    /// Human-readable name used in logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Dispatch => "dispatch",
            Self::Heartbeat => "heartbeat",
            Self::Identify => "identify",
            Self::PresenceUpdate => "presence_update",
            Self::Resume => "resume",
            Self::ResumeAck => "resume_ack",
            Self::Reconnect => "reconnect",
            Self::RequestMembers => "request_members",
            Self::InvalidSession => "invalid_session",
            Self::Hello => "hello",
            Self::HeartbeatAck => "heartbeat_ack",
        }
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name(), self.code())
    }
}

impl From<OpCode> for u64 {
    fn from(op: OpCode) -> Self {
        op.code()
    }
}

impl TryFrom<u64> for OpCode {
    type Error = ProtoError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dispatch),
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Identify),
            3 => Ok(Self::PresenceUpdate),
            5 => Ok(Self::Resume),
            6 => Ok(Self::ResumeAck),
            7 => Ok(Self::Reconnect),
            8 => Ok(Self::RequestMembers),
            9 => Ok(Self::InvalidSession),
            10 => Ok(Self::Hello),
            11 => Ok(Self::HeartbeatAck),
            other => Err(ProtoError::UnknownOpcode(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(OpCode::Dispatch, 0)]
    #[test_case(OpCode::Heartbeat, 1)]
    #[test_case(OpCode::Identify, 2)]
    #[test_case(OpCode::PresenceUpdate, 3)]
    #[test_case(OpCode::Resume, 5)]
    #[test_case(OpCode::ResumeAck, 6)]
    #[test_case(OpCode::Reconnect, 7)]
    #[test_case(OpCode::RequestMembers, 8)]
    #[test_case(OpCode::InvalidSession, 9)]
    #[test_case(OpCode::Hello, 10)]
    #[test_case(OpCode::HeartbeatAck, 11)]
    fn test_opcode_wire_values(op: OpCode, code: u64) {
        assert_eq!(op.code(), code);
        assert_eq!(OpCode::try_from(code), Ok(op));
    }

    #[test_case(4)]
    #[test_case(12)]
    #[test_case(999)]
    fn test_unrecognized_codes_rejected(code: u64) {
        assert_eq!(OpCode::try_from(code), Err(ProtoError::UnknownOpcode(code)));
    }

    #[test]
    fn test_display() {
        assert_eq!(OpCode::Hello.to_string(), "hello(10)");
    }

    #[test]
    fn test_serializes_as_integer() {
        let json = serde_json::to_string(&OpCode::HeartbeatAck).expect("serialize");
        assert_eq!(json, "11");
    }
}
