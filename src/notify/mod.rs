//! User notification plumbing
//!
//! This module maps users to their live channels and turns matchmaking
//! events into fire-and-forget sends on those channels.

pub mod bridge;
pub mod registry;

// Re-export commonly used types
pub use bridge::NotificationBridge;
pub use registry::{ClientChannel, SocketBinding, SocketRegistry};
