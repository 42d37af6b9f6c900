//! richgate - persistent gateway session client.
//!
//! Keeps one authenticated session alive over a WebSocket gateway:
//! heartbeats, resume after disconnects, dispatch routing and presence
//! updates.

pub mod config;
pub mod error;
pub mod gateway;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::{ClientEvent, GatewayClient, Phase, WsConnector};
pub use richgate_proto as proto;
