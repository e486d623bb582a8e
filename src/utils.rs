//! Utility functions for the matchmaking service

use crate::types::{ConnectionId, Millis};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Generate a new unique connection ID
pub fn generate_connection_id() -> ConnectionId {
    Uuid::new_v4()
}

/// Get the current UTC timestamp
pub fn current_timestamp() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a stored millisecond timestamp, ignoring surrounding whitespace
pub fn parse_millis(raw: &str) -> Option<Millis> {
    raw.trim().parse().ok()
}

/// Check if an entry started at `start` is still within `timeout_ms` at `now`
pub fn within_timeout(start: Millis, now: Millis, timeout_ms: Millis) -> bool {
    now - start <= timeout_ms
}
