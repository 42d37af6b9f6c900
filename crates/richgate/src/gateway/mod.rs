//! Gateway connection.
//!
//! A [`GatewayClient`] drives one [`Session`] from a background task. The
//! session decides, the task executes: channel I/O, heartbeat ticks and
//! backoff timers all arrive as [`Signal`]s and leave as [`Action`]s.

mod channel;
mod client;
mod dispatch;
mod events;
mod heartbeat;
mod reconnect;
mod session;
mod state;
mod websocket;

pub use channel::{ChannelCommand, ChannelEvent, ChannelHandle, ChannelPeer, Connector, CHANNEL_CAPACITY};
pub use client::GatewayClient;
pub use dispatch::{Delivery, DispatchRouter, Handler, HandlerError};
pub use events::ClientEvent;
pub use heartbeat::{start_heartbeat_task, HeartbeatHandle, HeartbeatTracker, Pulse};
pub use reconnect::{start_backoff_timer, BackoffHandle, ReconnectConfig};
pub use session::{Action, Session, Signal, EVENTS_TARGET};
pub use state::{Phase, SessionSnapshot};
pub use websocket::{WsConnector, DEFAULT_CONNECT_TIMEOUT};
