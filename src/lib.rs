//! Duel Room - one-versus-one matchmaking service
//!
//! This crate pairs waiting users first-come-first-served, tracks who is
//! playing whom and pushes match events to connected clients over WebSocket.

pub mod clock;
pub mod config;
pub mod error;
pub mod matchmaking;
pub mod metrics;
pub mod notify;
pub mod service;
pub mod store;
pub mod transport;
pub mod types;
pub mod utils;

// Re-export commonly used types and traits
pub use error::{MatchmakingError, Result};
pub use types::*;

// Re-export key components
pub use clock::{Clock, ManualClock, SystemClock};
pub use matchmaking::{Matchmaker, MatchmakerStats};
pub use notify::{NotificationBridge, SocketRegistry};
pub use store::{InMemoryBackend, MatchBackend, MatchStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
