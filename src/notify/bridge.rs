//! Translates matchmaking events into sends on users' live channels
//!
//! Every send is fire-and-forget. A user without a live channel simply does
//! not get the event; that is not an error.

use crate::metrics::MetricsCollector;
use crate::notify::registry::SocketRegistry;
use crate::types::{MatchOutcome, ServerEvent};
use std::sync::Arc;
use tracing::{debug, warn};

/// Stateless notifier on top of the socket registry
pub struct NotificationBridge {
    registry: Arc<SocketRegistry>,
    metrics: Arc<MetricsCollector>,
}

impl NotificationBridge {
    pub fn new(registry: Arc<SocketRegistry>, metrics: Arc<MetricsCollector>) -> Self {
        Self { registry, metrics }
    }

    pub fn registry(&self) -> Arc<SocketRegistry> {
        self.registry.clone()
    }

    /// Deliver an event to a user. Returns whether it reached a live channel.
    pub fn notify(&self, user_id: &str, event: ServerEvent) -> bool {
        let name = event.name();

        let delivered = match self.registry.lookup(user_id) {
            Ok(Some(channel)) => channel.send(event).is_ok(),
            Ok(None) => false,
            Err(e) => {
                warn!("Channel lookup for user '{}' failed: {}", user_id, e);
                false
            }
        };

        if delivered {
            debug!("Sent '{}' to user '{}'", name, user_id);
        } else {
            debug!("Dropped '{}' for user '{}': no live channel", name, user_id);
        }
        self.metrics.record_notification(name, delivered);
        delivered
    }

    /// Tell both users who their opponent is
    pub fn send_paired(&self, user_a: &str, user_b: &str) -> (bool, bool) {
        (
            self.notify(user_a, ServerEvent::Paired(user_b.to_string())),
            self.notify(user_b, ServerEvent::Paired(user_a.to_string())),
        )
    }

    pub fn send_enemy_left(&self, user_id: &str) -> bool {
        self.notify(user_id, ServerEvent::EnemyLeft)
    }

    pub fn send_enemy_finished(&self, user_id: &str) -> bool {
        self.notify(user_id, ServerEvent::EnemyFinished)
    }

    pub fn send_outcome(
        &self,
        user_id: &str,
        outcome: MatchOutcome,
        data: serde_json::Value,
    ) -> bool {
        self.notify(user_id, ServerEvent::outcome(outcome, data))
    }

    pub fn send_text(&self, user_id: &str, text: &str) -> bool {
        self.notify(user_id, ServerEvent::Text(text.to_string()))
    }
}
