//! # richgate-proto
//!
//! Wire protocol definitions for the richgate gateway client.
//!
//! - [`Envelope`] - the `{"op", "d", "s", "t"}` frame exchanged with the gateway
//! - [`OpCode`] - numeric operation codes, bit-exact with the remote protocol
//! - [`commands`] - pure builders for every outbound envelope
//! - [`presence`] - typed presence payloads and their shaping helpers

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod envelope;
pub mod error;
pub mod opcode;
pub mod presence;

pub use commands::{Credentials, IdentifyProperties, MemberChunk, RequestMembers};
pub use envelope::Envelope;
pub use error::ProtoError;
pub use opcode::OpCode;
pub use presence::{Activity, ActivityKind, Assets, Button, Presence, Status, Timestamps};
