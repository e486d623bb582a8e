//! Matchmaking orchestration
//!
//! This module ties the waiting queue, pairing and user notifications
//! together behind the `Matchmaker`.

pub mod matchmaker;

// Re-export commonly used types
pub use matchmaker::{Matchmaker, MatchmakerStats};
