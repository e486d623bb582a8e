//! Client transport over WebSocket
//!
//! This module adapts the matchmaker to live client connections: frame
//! encoding, request dispatch and the connection server.

pub mod messages;
pub mod ws;

pub use messages::{FrameCodec, MAX_TEXT_LENGTH};
pub use ws::{dispatch, ConnectParams, WsServer, WsServerConfig};
