//! Common types used throughout the matchmaking service

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an anonymous user
pub type UserId = String;

/// Identifier of a single live connection of a user
pub type ConnectionId = Uuid;

/// Milliseconds since the Unix epoch
pub type Millis = i64;

/// A user waiting in the queue together with the time it was enqueued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingEntry {
    pub user_id: UserId,
    pub enqueued_at: Millis,
}

/// Answer to "is this user currently waiting"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingStatus {
    /// When the user was enqueued
    pub start: Millis,
    /// When the status was read
    pub now: Millis,
}

impl WaitingStatus {
    /// How long the user has been waiting, in milliseconds
    pub fn waited_ms(&self) -> Millis {
        self.now - self.start
    }
}

/// Why an active pair is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The user finished the game on their side
    Finished,
    /// The user's connection went away
    Disconnected,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::Finished => "finished",
            EndReason::Disconnected => "disconnected",
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of a finished game from one player's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Win,
    Lose,
    Neutral,
}

/// Events delivered to a user's live channel
///
/// On the wire these are `{"event": "<name>", "data": <payload>}`;
/// events without a payload carry no `data` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The user was matched; payload is the opponent id
    Paired(UserId),
    /// The opponent disconnected
    EnemyLeft,
    /// The opponent finished the game
    EnemyFinished,
    Win(serde_json::Value),
    Lose(serde_json::Value),
    Neutral(serde_json::Value),
    /// Chat message from the opponent
    Text(String),
    /// Reply to a match request; false means the user was already waiting
    Queued(bool),
    /// Reply to a status query
    Status(Option<WaitingStatus>),
}

impl ServerEvent {
    /// Build the outcome event for a finished game
    pub fn outcome(outcome: MatchOutcome, data: serde_json::Value) -> Self {
        match outcome {
            MatchOutcome::Win => ServerEvent::Win(data),
            MatchOutcome::Lose => ServerEvent::Lose(data),
            MatchOutcome::Neutral => ServerEvent::Neutral(data),
        }
    }

    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Paired(_) => "paired",
            ServerEvent::EnemyLeft => "enemy_left",
            ServerEvent::EnemyFinished => "enemy_finished",
            ServerEvent::Win(_) => "win",
            ServerEvent::Lose(_) => "lose",
            ServerEvent::Neutral(_) => "neutral",
            ServerEvent::Text(_) => "text",
            ServerEvent::Queued(_) => "queued",
            ServerEvent::Status(_) => "status",
        }
    }
}

/// Requests a connected client can send
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Ask to be matched with an opponent
    Find,
    /// Leave the waiting queue
    Cancel,
    /// End the current game gracefully
    Finish,
    /// Query own waiting status
    Status,
    /// Send a chat message to the opponent
    Text(String),
}
