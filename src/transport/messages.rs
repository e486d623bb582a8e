//! WebSocket frame encoding and decoding

use crate::error::{MatchmakingError, Result};
use crate::types::{ClientMessage, ServerEvent};

/// Longest chat message forwarded to an opponent, in bytes
pub const MAX_TEXT_LENGTH: usize = 4096;

/// Frame serialization and validation utilities
pub struct FrameCodec;

impl FrameCodec {
    /// Parse and validate an inbound text frame
    pub fn decode_client_message(raw: &str) -> Result<ClientMessage> {
        let message: ClientMessage =
            serde_json::from_str(raw).map_err(|e| MatchmakingError::InvalidClientMessage {
                reason: format!("Failed to parse client frame: {}", e),
            })?;

        Self::validate_client_message(&message)?;
        Ok(message)
    }

    pub fn validate_client_message(message: &ClientMessage) -> Result<()> {
        if let ClientMessage::Text(text) = message {
            if text.len() > MAX_TEXT_LENGTH {
                return Err(MatchmakingError::InvalidClientMessage {
                    reason: format!(
                        "Text message of {} bytes exceeds limit of {}",
                        text.len(),
                        MAX_TEXT_LENGTH
                    ),
                }
                .into());
            }
        }

        Ok(())
    }

    /// Serialize an outbound event as a JSON text frame
    pub fn encode_server_event(event: &ServerEvent) -> Result<String> {
        serde_json::to_string(event).map_err(|e| {
            MatchmakingError::InternalError {
                message: format!("Failed to serialize '{}' event: {}", event.name(), e),
            }
            .into()
        })
    }
}
