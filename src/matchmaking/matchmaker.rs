//! Matchmaker orchestrating queue membership, pairing and notifications
//!
//! Per user the matchmaker drives `Idle -> Waiting -> Paired -> Idle`:
//! a successful match request makes a user wait, `form_pair` pairs two
//! waiters, and `end_match` (own finish, or either side disconnecting)
//! returns both to idle. Timeouts and cancellations take a waiter straight
//! back to idle.

use crate::error::{MatchmakingError, Result};
use crate::metrics::MetricsCollector;
use crate::notify::{ClientChannel, NotificationBridge};
use crate::store::MatchStore;
use crate::types::{ConnectionId, EndReason, MatchOutcome, UserId, WaitingStatus};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Statistics about matchmaker operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MatchmakerStats {
    /// Match requests that put a user in the queue
    pub match_requests: u64,
    /// Match requests from users that were already waiting
    pub duplicate_requests: u64,
    /// Total number of pairs formed
    pub pairs_formed: u64,
    /// Total number of pairs torn down
    pub matches_ended: u64,
    /// Chat messages delivered to an opponent
    pub messages_relayed: u64,
    /// Stale queue slots discarded while pairing
    pub stale_entries_skipped: u64,
    /// Waiting entries removed by their expiry timer
    pub expirations: u64,
    /// Current raw queue length
    pub queue_length: usize,
    /// Current number of membership entries
    pub waiting_users: usize,
    /// Current number of users in a pair
    pub paired_users: usize,
    /// Current number of users with a live channel
    pub connected_users: usize,
}

/// The main matchmaker
#[derive(Clone)]
pub struct Matchmaker {
    /// Queue, membership and pair state
    store: Arc<MatchStore>,
    /// Outbound notifications
    bridge: Arc<NotificationBridge>,
    /// Operation counters
    stats: Arc<RwLock<MatchmakerStats>>,
    /// Metrics collector for recording performance data
    metrics: Arc<MetricsCollector>,
    /// Serializes queue changes; `pair_next` holds it across both pops
    /// until the popped waiters are paired or restored
    queue_guard: Arc<Mutex<()>>,
}

impl Matchmaker {
    /// Create a new matchmaker with its own metrics collector
    pub fn new(store: Arc<MatchStore>, bridge: Arc<NotificationBridge>) -> Self {
        let metrics = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(store, bridge, metrics)
    }

    /// Create a new matchmaker with metrics collector
    pub fn with_metrics(
        store: Arc<MatchStore>,
        bridge: Arc<NotificationBridge>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            store,
            bridge,
            stats: Arc::new(RwLock::new(MatchmakerStats::default())),
            metrics,
            queue_guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> Arc<MatchStore> {
        self.store.clone()
    }

    pub fn bridge(&self) -> Arc<NotificationBridge> {
        self.bridge.clone()
    }

    fn update_stats(&self, update: impl FnOnce(&mut MatchmakerStats)) -> Result<()> {
        let mut stats = self
            .stats
            .write()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?;
        update(&mut stats);
        Ok(())
    }

    /// Ask to be matched.
    ///
    /// Returns false if the user is already waiting; that is a routine
    /// duplicate, not a failure. Pairing is a separate step (`pair_next`).
    pub async fn request_match(&self, user_id: &UserId) -> Result<bool> {
        let timer = self.metrics.start_timer();

        let accepted = {
            let _guard = self.queue_guard.lock().await;
            self.store.enqueue(user_id).await?
        };
        self.update_stats(|stats| {
            if accepted {
                stats.match_requests += 1;
            } else {
                stats.duplicate_requests += 1;
            }
        })?;
        self.metrics.record_match_request(accepted);
        self.metrics.record_operation("request_match", timer.stop());

        if accepted {
            info!("Match request accepted for user '{}'", user_id);
        } else {
            debug!("Duplicate match request from user '{}' ignored", user_id);
        }
        Ok(accepted)
    }

    /// Pair the two oldest valid waiters, if there are two.
    ///
    /// When only one valid waiter is found it goes back to the head of the
    /// queue with its original timestamp. Concurrent attempts run one at a
    /// time, so two waiters are never split across two attempts.
    pub async fn pair_next(&self) -> Result<Option<(UserId, UserId)>> {
        let timer = self.metrics.start_timer();
        let _guard = self.queue_guard.lock().await;

        let Some(first) = self.store.dequeue_valid_entry().await? else {
            debug!("Pairing attempt found nobody waiting");
            return Ok(None);
        };

        let second = match self.store.dequeue_valid_entry().await {
            Ok(second) => second,
            Err(e) => {
                if let Err(restore_error) = self.store.restore_front(&first).await {
                    warn!(
                        "Failed to restore user '{}' after a pairing error: {}",
                        first.user_id, restore_error
                    );
                }
                return Err(e);
            }
        };

        let Some(second) = second else {
            self.store.restore_front(&first).await?;
            debug!(
                "User '{}' is the only valid waiter, keeping them at the head",
                first.user_id
            );
            return Ok(None);
        };

        self.form_pair(&first.user_id, &second.user_id).await?;
        self.metrics.record_operation("pair_next", timer.stop());

        Ok(Some((first.user_id, second.user_id)))
    }

    /// Record a pair and tell both users.
    ///
    /// Callers must make sure neither user is already in an active pair.
    pub async fn form_pair(&self, user_a: &UserId, user_b: &UserId) -> Result<()> {
        self.store.pair(user_a, user_b).await?;

        let (reached_a, reached_b) = self.bridge.send_paired(user_a, user_b);
        self.update_stats(|stats| stats.pairs_formed += 1)?;
        self.metrics.record_pair_formed();

        info!(
            "Match formed: '{}' vs '{}' (notified: {}, {})",
            user_a, user_b, reached_a, reached_b
        );
        Ok(())
    }

    /// Tear down the pair a user is in and tell the partner why.
    ///
    /// Returns the former partner, or None if the user was not paired.
    pub async fn end_match(&self, user_id: &str, reason: EndReason) -> Result<Option<UserId>> {
        let Some(partner) = self.store.unpair_and_get_partner(user_id).await? else {
            debug!("User '{}' ended a match but had no partner", user_id);
            return Ok(None);
        };

        match reason {
            EndReason::Finished => self.bridge.send_enemy_finished(&partner),
            EndReason::Disconnected => self.bridge.send_enemy_left(&partner),
        };

        self.update_stats(|stats| stats.matches_ended += 1)?;
        self.metrics.record_match_ended(reason);

        info!(
            "Match between '{}' and '{}' ended ({})",
            user_id, partner, reason
        );
        Ok(Some(partner))
    }

    /// Withdraw a match request before a partner was found
    pub async fn cancel_request(&self, user_id: &str) -> Result<bool> {
        let removed = {
            let _guard = self.queue_guard.lock().await;
            self.store.remove_waiting(user_id).await?
        };
        if removed {
            self.metrics.record_cancellation();
            info!("User '{}' left the waiting queue", user_id);
        }
        Ok(removed)
    }

    /// A user opened a live connection
    pub fn connect(&self, user_id: &UserId, channel: ClientChannel) -> Result<ConnectionId> {
        let connection_id = self.bridge.registry().bind(user_id, channel)?;
        self.metrics.record_connection();

        info!("User '{}' connected ({})", user_id, connection_id);
        Ok(connection_id)
    }

    /// A user's connection closed.
    ///
    /// Ignored if the user has since reconnected on another connection.
    /// Otherwise the user leaves the queue and any active pair, and the
    /// former partner, if any, is returned.
    pub async fn disconnect(
        &self,
        user_id: &str,
        connection_id: ConnectionId,
    ) -> Result<Option<UserId>> {
        if !self
            .bridge
            .registry()
            .unbind_connection(user_id, connection_id)?
        {
            debug!(
                "Connection {} of user '{}' was already replaced",
                connection_id, user_id
            );
            return Ok(None);
        }

        info!("User '{}' disconnected", user_id);
        self.cancel_request(user_id).await?;
        self.end_match(user_id, EndReason::Disconnected).await
    }

    /// Forward a chat message to the sender's opponent.
    ///
    /// Returns false when there is no opponent, the text is empty or the
    /// opponent has no live channel.
    pub async fn relay_text(&self, from: &str, text: &str) -> Result<bool> {
        let Some(partner) = self.store.get_partner(from).await? else {
            debug!("User '{}' sent a message without a partner", from);
            return Ok(false);
        };

        if text.is_empty() {
            return Ok(false);
        }

        let delivered = self.bridge.send_text(&partner, text);
        if delivered {
            self.update_stats(|stats| stats.messages_relayed += 1)?;
            self.metrics.record_message_relayed();
        }
        Ok(delivered)
    }

    /// Deliver a game result to one player
    pub fn report_outcome(
        &self,
        user_id: &str,
        outcome: MatchOutcome,
        data: serde_json::Value,
    ) -> bool {
        self.bridge.send_outcome(user_id, outcome, data)
    }

    pub async fn waiting_status(&self, user_id: &str) -> Result<Option<WaitingStatus>> {
        self.store.is_waiting(user_id).await
    }

    pub async fn partner_of(&self, user_id: &str) -> Result<Option<UserId>> {
        self.store.get_partner(user_id).await
    }

    /// Counters plus a fresh read of the current queue and pair sizes
    pub async fn get_stats(&self) -> Result<MatchmakerStats> {
        let mut snapshot = self
            .stats
            .read()
            .map_err(|_| MatchmakingError::InternalError {
                message: "Failed to acquire stats lock".to_string(),
            })?
            .clone();

        snapshot.stale_entries_skipped = self.store.stale_skipped();
        snapshot.expirations = self.store.expirations();
        snapshot.queue_length = self.store.queue_len().await?;
        snapshot.waiting_users = self.store.waiting_count().await?;
        snapshot.paired_users = self.store.paired_count().await?;
        snapshot.connected_users = self.bridge.registry().len();

        Ok(snapshot)
    }

    /// Stop pending expiry timers
    pub fn shutdown(&self) {
        self.store.shutdown();
    }
}
