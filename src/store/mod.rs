//! Matching state storage
//!
//! This module holds the waiting queue, the membership map and the pair
//! registry behind `MatchStore`, on top of a pluggable key-value backend.

pub mod backend;
pub mod match_store;
pub mod timers;

// Re-export commonly used types
pub use backend::{
    InMemoryBackend, MatchBackend, GAME_PAIRS_MAP_KEY, USERS_MAP_KEY, USERS_QUEUE_KEY,
};
pub use match_store::{MatchStore, DEFAULT_QUEUE_TIMEOUT_MS};
pub use timers::ExpiryTimers;
