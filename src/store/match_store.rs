//! Shared matching state: waiting queue, membership map and pair registry
//!
//! Every operation here is a short sequence of single-key commands against
//! the backend. The sequences are not transactional, so each one is a window
//! in which a concurrent call can interleave. The accepted races are:
//!
//! - `is_waiting` may report a user as waiting right before their expiry
//!   timer removes the entry, so a concurrent `enqueue` can be rejected as a
//!   duplicate even though the user ends up not waiting.
//! - an expiry timer that has already claimed its slot deletes the membership
//!   entry unconditionally, even if the user was dequeued and re-enqueued
//!   in between.
//! - `unpair_and_get_partner` called for both sides at once reports each
//!   side as the other's partner.
//!
//! Queue slots are never removed eagerly. A slot whose membership entry is
//! gone or too old is stale and gets discarded by `dequeue_valid`.

use crate::clock::Clock;
use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::store::backend::{MatchBackend, GAME_PAIRS_MAP_KEY, USERS_MAP_KEY, USERS_QUEUE_KEY};
use crate::store::timers::ExpiryTimers;
use crate::types::{Millis, UserId, WaitingEntry, WaitingStatus};
use crate::utils::{parse_millis, within_timeout};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Maximum time a user may wait in the queue
pub const DEFAULT_QUEUE_TIMEOUT_MS: Millis = 60_000;

/// The matching state behind a narrow set of named operations
pub struct MatchStore {
    backend: Arc<dyn MatchBackend>,
    timers: Arc<ExpiryTimers>,
    clock: Arc<dyn Clock>,
    timeout: Duration,
    metrics: Arc<MetricsCollector>,
    stale_skipped: AtomicU64,
}

impl MatchStore {
    /// Create a new store with its own metrics collector
    pub fn new(backend: Arc<dyn MatchBackend>, clock: Arc<dyn Clock>, timeout: Duration) -> Self {
        let metrics = Arc::new(MetricsCollector::new().unwrap_or_else(|_| {
            warn!("Failed to create metrics collector, using default");
            MetricsCollector::default()
        }));

        Self::with_metrics(backend, clock, timeout, metrics)
    }

    /// Create a new store reporting into the given metrics collector
    pub fn with_metrics(
        backend: Arc<dyn MatchBackend>,
        clock: Arc<dyn Clock>,
        timeout: Duration,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            backend,
            timers: Arc::new(ExpiryTimers::new()),
            clock,
            timeout,
            metrics,
            stale_skipped: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn timeout_ms(&self) -> Millis {
        self.timeout.as_millis() as Millis
    }

    fn backend_failed(&self, operation: &str, error: &anyhow::Error) {
        self.metrics.record_backend_error(operation);
        error!("Backend operation '{}' failed: {}", operation, error);
    }

    /// Reads the membership entry of a user; `Some` only while it is live
    pub async fn is_waiting(&self, user_id: &str) -> Result<Option<WaitingStatus>> {
        let raw = self
            .backend
            .hget(USERS_MAP_KEY, user_id)
            .await
            .inspect_err(|e| self.backend_failed("is_waiting", e))?;

        let now = self.clock.now_millis();
        Ok(raw
            .as_deref()
            .and_then(parse_millis)
            .filter(|start| within_timeout(*start, now, self.timeout_ms()))
            .map(|start| WaitingStatus { start, now }))
    }

    /// Put a user at the tail of the queue.
    ///
    /// Returns false without touching anything if the user is already waiting.
    pub async fn enqueue(&self, user_id: &UserId) -> Result<bool> {
        if let Some(status) = self.is_waiting(user_id).await? {
            let queue_size = self.queue_len().await?;
            debug!(
                "User '{}' already waiting for {}ms, queue size: {}",
                user_id,
                status.waited_ms(),
                queue_size
            );
            return Ok(false);
        }

        let queue_size = self
            .backend
            .rpush(USERS_QUEUE_KEY, user_id)
            .await
            .inspect_err(|e| self.backend_failed("enqueue", e))?;

        let now = self.clock.now_millis();
        self.backend
            .hset(USERS_MAP_KEY, user_id, &now.to_string())
            .await
            .inspect_err(|e| self.backend_failed("enqueue", e))?;

        self.arm_expiry(user_id, self.timeout);

        info!(
            "User '{}' started waiting, queue size: {}",
            user_id, queue_size
        );
        Ok(true)
    }

    /// Pop the oldest waiter that is still valid, discarding stale slots
    pub async fn dequeue_valid(&self) -> Result<Option<UserId>> {
        Ok(self.dequeue_valid_entry().await?.map(|entry| entry.user_id))
    }

    /// Like `dequeue_valid`, but keeps the enqueue timestamp
    pub async fn dequeue_valid_entry(&self) -> Result<Option<WaitingEntry>> {
        loop {
            let Some(user_id) = self
                .backend
                .lpop(USERS_QUEUE_KEY)
                .await
                .inspect_err(|e| self.backend_failed("dequeue", e))?
            else {
                return Ok(None);
            };

            let raw = self
                .backend
                .hget(USERS_MAP_KEY, &user_id)
                .await
                .inspect_err(|e| self.backend_failed("dequeue", e))?;
            let now = self.clock.now_millis();
            let live_since = raw
                .as_deref()
                .and_then(parse_millis)
                .filter(|start| within_timeout(*start, now, self.timeout_ms()));

            // Leaving the queue either way
            self.backend
                .hdel(USERS_MAP_KEY, &[user_id.clone()])
                .await
                .inspect_err(|e| self.backend_failed("dequeue", e))?;
            self.timers.cancel(&user_id);

            match live_since {
                Some(enqueued_at) => {
                    debug!(
                        "Dequeued user '{}' after {}ms",
                        user_id,
                        now - enqueued_at
                    );
                    return Ok(Some(WaitingEntry {
                        user_id,
                        enqueued_at,
                    }));
                }
                None => {
                    warn!("Skipping stale queue entry for user '{}'", user_id);
                    self.stale_skipped.fetch_add(1, Ordering::SeqCst);
                    self.metrics.record_stale_entry();
                }
            }
        }
    }

    /// Put a dequeued entry back at the head of the queue.
    ///
    /// The original timestamp is kept and the expiry timer covers only the
    /// remaining lifetime. Returns false if the entry already expired.
    pub async fn restore_front(&self, entry: &WaitingEntry) -> Result<bool> {
        let now = self.clock.now_millis();
        let age = now - entry.enqueued_at;
        if age > self.timeout_ms() {
            debug!(
                "Not restoring user '{}', entry expired {}ms ago",
                entry.user_id,
                age - self.timeout_ms()
            );
            return Ok(false);
        }

        self.backend
            .lpush(USERS_QUEUE_KEY, &entry.user_id)
            .await
            .inspect_err(|e| self.backend_failed("restore", e))?;
        self.backend
            .hset(
                USERS_MAP_KEY,
                &entry.user_id,
                &entry.enqueued_at.to_string(),
            )
            .await
            .inspect_err(|e| self.backend_failed("restore", e))?;

        let remaining = Duration::from_millis((self.timeout_ms() - age.max(0)) as u64);
        self.arm_expiry(&entry.user_id, remaining);

        debug!(
            "Restored user '{}' to the head of the queue ({}ms left)",
            entry.user_id,
            remaining.as_millis()
        );
        Ok(true)
    }

    /// Drop a user's waiting entry before they were matched.
    ///
    /// The queue slot stays behind and is skipped as stale later.
    pub async fn remove_waiting(&self, user_id: &str) -> Result<bool> {
        let removed = self
            .backend
            .hdel(USERS_MAP_KEY, &[user_id.to_string()])
            .await
            .inspect_err(|e| self.backend_failed("remove_waiting", e))?;
        self.timers.cancel(user_id);

        Ok(removed > 0)
    }

    /// Record both directions of a pair in one command
    pub async fn pair(&self, user_a: &UserId, user_b: &UserId) -> Result<()> {
        let bindings = [
            (user_a.clone(), user_b.clone()),
            (user_b.clone(), user_a.clone()),
        ];
        self.backend
            .hset_multiple(GAME_PAIRS_MAP_KEY, &bindings)
            .await
            .inspect_err(|e| self.backend_failed("pair", e))?;

        info!("Paired users '{}' and '{}'", user_a, user_b);
        Ok(())
    }

    /// Remove the pair a user belongs to, returning the former partner
    pub async fn unpair_and_get_partner(&self, user_id: &str) -> Result<Option<UserId>> {
        let partner = self
            .backend
            .hget(GAME_PAIRS_MAP_KEY, user_id)
            .await
            .inspect_err(|e| self.backend_failed("unpair", e))?;

        let mut fields = vec![user_id.to_string()];
        if let Some(partner_id) = &partner {
            fields.push(partner_id.clone());
        }
        self.backend
            .hdel(GAME_PAIRS_MAP_KEY, &fields)
            .await
            .inspect_err(|e| self.backend_failed("unpair", e))?;

        if let Some(partner_id) = &partner {
            info!("Unpaired users '{}' and '{}'", user_id, partner_id);
        }
        Ok(partner)
    }

    pub async fn get_partner(&self, user_id: &str) -> Result<Option<UserId>> {
        self.backend
            .hget(GAME_PAIRS_MAP_KEY, user_id)
            .await
            .inspect_err(|e| self.backend_failed("get_partner", e))
    }

    /// Raw queue length, stale slots included
    pub async fn queue_len(&self) -> Result<usize> {
        self.backend
            .llen(USERS_QUEUE_KEY)
            .await
            .inspect_err(|e| self.backend_failed("queue_len", e))
    }

    /// Number of membership entries, expired-but-not-yet-removed included
    pub async fn waiting_count(&self) -> Result<usize> {
        self.backend
            .hlen(USERS_MAP_KEY)
            .await
            .inspect_err(|e| self.backend_failed("waiting_count", e))
    }

    /// Number of users bound in the pair registry
    pub async fn paired_count(&self) -> Result<usize> {
        self.backend
            .hlen(GAME_PAIRS_MAP_KEY)
            .await
            .inspect_err(|e| self.backend_failed("paired_count", e))
    }

    pub async fn ping(&self) -> Result<()> {
        self.backend
            .ping()
            .await
            .inspect_err(|e| self.backend_failed("ping", e))
    }

    pub fn stale_skipped(&self) -> u64 {
        self.stale_skipped.load(Ordering::SeqCst)
    }

    pub fn expirations(&self) -> u64 {
        self.timers.fired_count()
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.armed_count()
    }

    /// Abort every pending expiry timer
    pub fn shutdown(&self) {
        let cancelled = self.timers.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} pending expiry timers", cancelled);
        }
    }

    fn arm_expiry(&self, user_id: &UserId, delay: Duration) {
        let backend = self.backend.clone();
        let metrics = self.metrics.clone();
        let owner = user_id.clone();

        self.timers.arm(user_id, delay, async move {
            match backend.hdel(USERS_MAP_KEY, &[owner.clone()]).await {
                Ok(removed) => {
                    if removed > 0 {
                        metrics.record_expiration();
                        info!("Waiting entry of user '{}' expired", owner);
                    }
                }
                Err(e) => {
                    metrics.record_backend_error("expire");
                    warn!("Failed to expire waiting entry of user '{}': {}", owner, e);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::{is_backend_unavailable, MatchmakingError};
    use crate::store::backend::{InMemoryBackend, MockMatchBackend};

    const START: Millis = 1_700_000_000_000;

    fn create_test_store() -> (MatchStore, Arc<InMemoryBackend>, Arc<ManualClock>) {
        let backend = Arc::new(InMemoryBackend::new());
        let clock = Arc::new(ManualClock::new(START));
        let store = MatchStore::new(
            backend.clone(),
            clock.clone(),
            Duration::from_millis(DEFAULT_QUEUE_TIMEOUT_MS as u64),
        );
        (store, backend, clock)
    }

    fn user(id: &str) -> UserId {
        id.to_string()
    }

    #[tokio::test]
    async fn test_enqueue_twice_is_rejected() {
        let (store, _backend, _clock) = create_test_store();

        assert!(store.enqueue(&user("1")).await.unwrap());
        assert!(!store.enqueue(&user("1")).await.unwrap());
        assert_eq!(store.queue_len().await.unwrap(), 1);
        assert_eq!(store.pending_timers(), 1);
    }

    #[tokio::test]
    async fn test_is_waiting_reports_timestamps() {
        let (store, _backend, clock) = create_test_store();

        assert!(store.is_waiting("1").await.unwrap().is_none());
        store.enqueue(&user("1")).await.unwrap();

        clock.advance(2_500);
        let status = store.is_waiting("1").await.unwrap().unwrap();
        assert_eq!(status.start, START);
        assert_eq!(status.now, START + 2_500);
    }

    #[tokio::test]
    async fn test_is_waiting_boundary() {
        let (store, _backend, clock) = create_test_store();
        store.enqueue(&user("1")).await.unwrap();

        clock.advance(DEFAULT_QUEUE_TIMEOUT_MS);
        assert!(store.is_waiting("1").await.unwrap().is_some());

        clock.advance(1);
        assert!(store.is_waiting("1").await.unwrap().is_none());

        // An expired entry no longer blocks a new request
        assert!(store.enqueue(&user("1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_dequeue_is_fifo() {
        let (store, _backend, _clock) = create_test_store();

        store.enqueue(&user("A")).await.unwrap();
        store.enqueue(&user("B")).await.unwrap();

        assert_eq!(store.dequeue_valid().await.unwrap(), Some(user("A")));
        assert_eq!(store.dequeue_valid().await.unwrap(), Some(user("B")));
        assert_eq!(store.dequeue_valid().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dequeue_clears_membership_and_timer() {
        let (store, _backend, _clock) = create_test_store();

        store.enqueue(&user("1")).await.unwrap();
        store.dequeue_valid().await.unwrap();

        assert!(store.is_waiting("1").await.unwrap().is_none());
        assert_eq!(store.waiting_count().await.unwrap(), 0);
        assert_eq!(store.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_skips_externally_removed_entry() {
        let (store, backend, _clock) = create_test_store();

        store.enqueue(&user("1")).await.unwrap();
        store.enqueue(&user("2")).await.unwrap();

        // Simulates a timer that fired but whose slot is still queued
        backend.hdel(USERS_MAP_KEY, &[user("1")]).await.unwrap();

        assert_eq!(store.dequeue_valid().await.unwrap(), Some(user("2")));
        assert_eq!(store.stale_skipped(), 1);
        assert_eq!(store.queue_len().await.unwrap(), 0);
        assert_eq!(store.dequeue_valid().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_dequeue_skips_expired_entry_without_timer() {
        let (store, _backend, clock) = create_test_store();

        store.enqueue(&user("3")).await.unwrap();
        clock.advance(61_000);

        assert_eq!(store.dequeue_valid().await.unwrap(), None);
        assert_eq!(store.stale_skipped(), 1);
        assert_eq!(store.waiting_count().await.unwrap(), 0);
        assert_eq!(store.pending_timers(), 0);
    }

    #[tokio::test]
    async fn test_dequeue_skips_unparseable_timestamp() {
        let (store, backend, _clock) = create_test_store();

        backend.rpush(USERS_QUEUE_KEY, "9").await.unwrap();
        backend.hset(USERS_MAP_KEY, "9", "not-a-number").await.unwrap();

        assert_eq!(store.dequeue_valid().await.unwrap(), None);
        assert_eq!(backend.hget(USERS_MAP_KEY, "9").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_leftover_slot_from_previous_wait_is_not_returned_twice() {
        let (store, backend, clock) = create_test_store();

        store.enqueue(&user("1")).await.unwrap();
        clock.advance(61_000);
        store.enqueue(&user("1")).await.unwrap();
        assert_eq!(
            backend.list_snapshot(USERS_QUEUE_KEY).unwrap(),
            vec!["1", "1"]
        );

        assert_eq!(store.dequeue_valid().await.unwrap(), Some(user("1")));
        assert_eq!(store.dequeue_valid().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_timer_removes_membership() {
        let (store, backend, _clock) = create_test_store();

        store.enqueue(&user("1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(61_000)).await;

        assert!(store.is_waiting("1").await.unwrap().is_none());
        assert_eq!(store.expirations(), 1);
        // The slot itself stays queued until a dequeue discards it
        assert_eq!(backend.list_snapshot(USERS_QUEUE_KEY).unwrap(), vec!["1"]);
        assert_eq!(store.dequeue_valid().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_waiting_cancels_timer() {
        let (store, _backend, _clock) = create_test_store();

        store.enqueue(&user("1")).await.unwrap();
        assert!(store.remove_waiting("1").await.unwrap());
        assert!(!store.remove_waiting("1").await.unwrap());
        assert_eq!(store.pending_timers(), 0);

        tokio::time::sleep(Duration::from_millis(61_000)).await;
        assert_eq!(store.expirations(), 0);
        assert_eq!(store.dequeue_valid().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_restore_front_keeps_position_and_timestamp() {
        let (store, _backend, clock) = create_test_store();

        store.enqueue(&user("1")).await.unwrap();
        clock.advance(1_000);
        store.enqueue(&user("2")).await.unwrap();

        let first = store.dequeue_valid_entry().await.unwrap().unwrap();
        assert!(store.restore_front(&first).await.unwrap());

        let status = store.is_waiting("1").await.unwrap().unwrap();
        assert_eq!(status.start, START);
        assert_eq!(store.dequeue_valid().await.unwrap(), Some(user("1")));
        assert_eq!(store.dequeue_valid().await.unwrap(), Some(user("2")));
    }

    #[tokio::test]
    async fn test_restore_front_drops_expired_entry() {
        let (store, _backend, clock) = create_test_store();

        store.enqueue(&user("1")).await.unwrap();
        let entry = store.dequeue_valid_entry().await.unwrap().unwrap();
        clock.advance(60_001);

        assert!(!store.restore_front(&entry).await.unwrap());
        assert_eq!(store.queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_pair_is_symmetric() {
        let (store, _backend, _clock) = create_test_store();

        store.pair(&user("A"), &user("B")).await.unwrap();

        assert_eq!(store.get_partner("A").await.unwrap(), Some(user("B")));
        assert_eq!(store.get_partner("B").await.unwrap(), Some(user("A")));
        assert_eq!(store.paired_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unpair_removes_both_sides_once() {
        let (store, _backend, _clock) = create_test_store();

        store.pair(&user("A"), &user("B")).await.unwrap();

        assert_eq!(
            store.unpair_and_get_partner("A").await.unwrap(),
            Some(user("B"))
        );
        assert_eq!(store.get_partner("A").await.unwrap(), None);
        assert_eq!(store.get_partner("B").await.unwrap(), None);

        assert_eq!(store.unpair_and_get_partner("A").await.unwrap(), None);
        assert_eq!(store.unpair_and_get_partner("B").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let mut backend = MockMatchBackend::new();
        backend
            .expect_lpop()
            .returning(|_| Err(MatchmakingError::backend("connection refused").into()));
        backend
            .expect_hget()
            .returning(|_, _| Err(MatchmakingError::backend("connection refused").into()));

        let store = MatchStore::new(
            Arc::new(backend),
            Arc::new(ManualClock::new(START)),
            Duration::from_secs(60),
        );

        let err = store.dequeue_valid().await.unwrap_err();
        assert!(is_backend_unavailable(&err));

        let err = store.enqueue(&user("1")).await.unwrap_err();
        assert!(is_backend_unavailable(&err));

        let err = store.get_partner("1").await.unwrap_err();
        assert!(is_backend_unavailable(&err));
    }

    #[tokio::test]
    async fn test_failed_write_does_not_arm_timer() {
        let mut backend = MockMatchBackend::new();
        backend.expect_hget().returning(|_, _| Ok(None));
        backend
            .expect_rpush()
            .returning(|_, _| Err(MatchmakingError::backend("timeout").into()));

        let store = MatchStore::new(
            Arc::new(backend),
            Arc::new(ManualClock::new(START)),
            Duration::from_secs(60),
        );

        assert!(store.enqueue(&user("1")).await.is_err());
        assert_eq!(store.pending_timers(), 0);
    }
}
