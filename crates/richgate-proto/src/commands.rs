//! Outbound command builder.
//!
//! Pure functions that turn a typed intent into an [`Envelope`]. Nothing here
//! touches the network; envelopes are sent by whoever owns the connection.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::presence::Presence;
use crate::{Envelope, OpCode};

/// Gateway intents requested by default (guilds and guild messages).
pub const DEFAULT_INTENTS: u64 = 513;

/// Connection properties reported on identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyProperties {
    /// Operating system.
    #[serde(rename = "$os")]
    pub os: String,
    /// Library or browser name.
    #[serde(rename = "$browser")]
    pub browser: String,
    /// Device name.
    #[serde(rename = "$device")]
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: "linux".to_string(),
            browser: "richgate".to_string(),
            device: "richgate".to_string(),
        }
    }
}

/// Credentials used to identify and resume.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
    /// Connection properties.
    pub properties: IdentifyProperties,
    /// Gateway intents bitfield.
    pub intents: u64,
}

impl Credentials {
    /// Create credentials with default properties and intents.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            properties: IdentifyProperties::default(),
            intents: DEFAULT_INTENTS,
        }
    }

    /// Set the connection properties.
    #[must_use]
    pub fn with_properties(mut self, properties: IdentifyProperties) -> Self {
        self.properties = properties;
        self
    }

    /// Set the intents bitfield.
    #[must_use]
    pub const fn with_intents(mut self, intents: u64) -> Self {
        self.intents = intents;
        self
    }

    /// The secret token.
    #[must_use]
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"[redacted]")
            .field("properties", &self.properties)
            .field("intents", &self.intents)
            .finish()
    }
}

/// Request for guild members, sent with opcode 8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMembers {
    /// Guild to list.
    pub guild_id: String,
    /// Username prefix filter; empty string lists everyone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    /// Maximum members to return, 0 for no limit.
    #[serde(default)]
    pub limit: u32,
    /// Include presences.
    #[serde(default)]
    pub presences: bool,
    /// Explicit user ids.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub user_ids: Vec<String>,
    /// Correlates the request with its chunks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl RequestMembers {
    /// Request all members of a guild.
    #[must_use]
    pub fn all(guild_id: impl Into<String>) -> Self {
        Self {
            guild_id: guild_id.into(),
            query: Some(String::new()),
            limit: 0,
            presences: false,
            user_ids: Vec::new(),
            nonce: None,
        }
    }

    /// Attach a nonce.
    #[must_use]
    pub fn with_nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }
}

/// One page of a member list, sent in reply to a member request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberChunk {
    /// Guild the members belong to.
    pub guild_id: Value,
    /// Member objects.
    pub members: Vec<Value>,
    /// Nonce copied from the request.
    pub nonce: Option<Value>,
    /// Zero-based page index.
    pub chunk_index: u32,
    /// Total number of pages.
    pub chunk_count: u32,
}

impl MemberChunk {
    /// A single-page reply to the member request carried in `request`.
    #[must_use]
    pub fn single_page(request: &Value, members: Vec<Value>) -> Self {
        Self {
            guild_id: request.get("guild_id").cloned().unwrap_or(Value::Null),
            members,
            nonce: request.get("nonce").cloned(),
            chunk_index: 0,
            chunk_count: 1,
        }
    }
}

/// Identify envelope (opcode 2).
///
/// A stored presence, if any, is embedded so the new session starts with it.
#[must_use]
pub fn identify(credentials: &Credentials, presence: Option<&Presence>) -> Envelope {
    let mut d = json!({
        "token": credentials.token,
        "properties": credentials.properties,
        "intents": credentials.intents,
    });
    if let Some(presence) = presence {
        d["presence"] = json!(presence);
    }
    Envelope::new(OpCode::Identify, d)
}

/// Heartbeat envelope (opcode 1) carrying the last seen sequence.
#[must_use]
pub fn heartbeat(last_sequence: Option<u64>) -> Envelope {
    Envelope::new(OpCode::Heartbeat, json!(last_sequence))
}

/// Resume envelope (opcode 5).
#[must_use]
pub fn resume(credentials: &Credentials, session_id: &str, last_sequence: u64) -> Envelope {
    Envelope::new(
        OpCode::Resume,
        json!({
            "token": credentials.token,
            "session_id": session_id,
            "seq": last_sequence,
        }),
    )
}

/// Presence update envelope (opcode 3).
#[must_use]
pub fn presence_update(presence: &Presence) -> Envelope {
    Envelope::new(OpCode::PresenceUpdate, json!(presence))
}

/// Member request envelope (opcode 8).
#[must_use]
pub fn request_members(request: &RequestMembers) -> Envelope {
    Envelope::new(OpCode::RequestMembers, json!(request))
}

/// Member chunk envelope (opcode 8).
#[must_use]
pub fn member_chunk(chunk: &MemberChunk) -> Envelope {
    Envelope::new(OpCode::RequestMembers, json!(chunk))
}
