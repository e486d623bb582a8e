//! Lookup table from user id to live notification channel
//!
//! The table is owned by the connection layer: entries are created when a
//! user connects and removed when that connection closes.

use crate::error::{MatchmakingError, Result};
use crate::types::{ConnectionId, ServerEvent, UserId};
use crate::utils::generate_connection_id;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

/// Sending half of a user's live connection
pub type ClientChannel = mpsc::UnboundedSender<ServerEvent>;

/// A user's current connection
#[derive(Debug, Clone)]
pub struct SocketBinding {
    pub connection_id: ConnectionId,
    pub channel: ClientChannel,
}

/// Registry of live channels keyed by user id
#[derive(Debug, Default)]
pub struct SocketRegistry {
    bindings: RwLock<HashMap<UserId, SocketBinding>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a channel to a user, replacing any previous connection
    pub fn bind(&self, user_id: &UserId, channel: ClientChannel) -> Result<ConnectionId> {
        let mut bindings = self
            .bindings
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire socket registry write lock".to_string(),
            })?;

        let connection_id = generate_connection_id();
        let previous = bindings.insert(
            user_id.clone(),
            SocketBinding {
                connection_id,
                channel,
            },
        );

        if let Some(previous) = previous {
            debug!(
                "User '{}' reconnected, replacing connection {}",
                user_id, previous.connection_id
            );
        }
        Ok(connection_id)
    }

    /// Remove whatever channel is bound to a user
    pub fn unbind(&self, user_id: &str) -> Result<bool> {
        let mut bindings = self
            .bindings
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire socket registry write lock".to_string(),
            })?;

        Ok(bindings.remove(user_id).is_some())
    }

    /// Remove the binding only if it still belongs to the given connection
    pub fn unbind_connection(&self, user_id: &str, connection_id: ConnectionId) -> Result<bool> {
        let mut bindings = self
            .bindings
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire socket registry write lock".to_string(),
            })?;

        match bindings.get(user_id) {
            Some(binding) if binding.connection_id == connection_id => {
                bindings.remove(user_id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn lookup(&self, user_id: &str) -> Result<Option<ClientChannel>> {
        let bindings = self
            .bindings
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire socket registry read lock".to_string(),
            })?;

        Ok(bindings.get(user_id).map(|binding| binding.channel.clone()))
    }

    pub fn is_connected(&self, user_id: &str) -> bool {
        self.bindings
            .read()
            .map(|bindings| bindings.contains_key(user_id))
            .unwrap_or(false)
    }

    /// Number of users with a live channel
    pub fn len(&self) -> usize {
        self.bindings
            .read()
            .map(|bindings| bindings.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
