//! Test fixtures and backend wrappers for integration testing

#![allow(dead_code)]

use async_trait::async_trait;
use duel_room::clock::ManualClock;
use duel_room::error::{MatchmakingError, Result};
use duel_room::matchmaking::Matchmaker;
use duel_room::metrics::MetricsCollector;
use duel_room::notify::{NotificationBridge, SocketRegistry};
use duel_room::store::{InMemoryBackend, MatchBackend, MatchStore};
use duel_room::types::{ConnectionId, ServerEvent, UserId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Fixed starting point for the manual clock
pub const START_MILLIS: i64 = 1_700_000_000_000;

/// Backend that can be switched into a failing state
#[derive(Debug, Default)]
pub struct FlakyBackend {
    inner: InMemoryBackend,
    failing: AtomicBool,
}

impl FlakyBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn inner(&self) -> &InMemoryBackend {
        &self.inner
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MatchmakingError::backend("connection refused").into());
        }
        Ok(())
    }
}

#[async_trait]
impl MatchBackend for FlakyBackend {
    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        self.check()?;
        self.inner.rpush(key, value).await
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<usize> {
        self.check()?;
        self.inner.lpush(key, value).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.lpop(key).await
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        self.check()?;
        self.inner.llen(key).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.check()?;
        self.inner.hget(key, field).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.check()?;
        self.inner.hset(key, field, value).await
    }

    async fn hset_multiple(&self, key: &str, entries: &[(String, String)]) -> Result<()> {
        self.check()?;
        self.inner.hset_multiple(key, entries).await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize> {
        self.check()?;
        self.inner.hdel(key, fields).await
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        self.check()?;
        self.inner.hlen(key).await
    }

    async fn ping(&self) -> Result<()> {
        self.check()?;
        self.inner.ping().await
    }
}

/// Backend that parks one chosen `lpop` call until released.
///
/// The parked call has already popped from the inner backend; `reached`
/// fires once it is parked and `release` lets it return.
#[derive(Debug)]
pub struct GatedBackend {
    inner: InMemoryBackend,
    lpop_calls: AtomicUsize,
    gated_call: usize,
    pub reached: Notify,
    pub release: Notify,
}

impl GatedBackend {
    /// Park the `gated_call`-th `lpop` (counting from 1)
    pub fn new(gated_call: usize) -> Self {
        Self {
            inner: InMemoryBackend::new(),
            lpop_calls: AtomicUsize::new(0),
            gated_call,
            reached: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl MatchBackend for GatedBackend {
    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        self.inner.rpush(key, value).await
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<usize> {
        self.inner.lpush(key, value).await
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let call = self.lpop_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let popped = self.inner.lpop(key).await;
        if call == self.gated_call {
            self.reached.notify_one();
            self.release.notified().await;
        }
        popped
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        self.inner.llen(key).await
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.inner.hget(key, field).await
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.inner.hset(key, field, value).await
    }

    async fn hset_multiple(&self, key: &str, entries: &[(String, String)]) -> Result<()> {
        self.inner.hset_multiple(key, entries).await
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize> {
        self.inner.hdel(key, fields).await
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        self.inner.hlen(key).await
    }

    async fn ping(&self) -> Result<()> {
        self.inner.ping().await
    }
}

/// A connected test user
pub struct TestClient {
    pub user_id: UserId,
    pub connection_id: ConnectionId,
    pub receiver: mpsc::UnboundedReceiver<ServerEvent>,
}

impl TestClient {
    /// Everything delivered so far
    pub fn drain(&mut self) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A complete matching system on a manual clock
pub struct TestSystem {
    pub matchmaker: Matchmaker,
    pub clock: Arc<ManualClock>,
    pub backend: Arc<FlakyBackend>,
    pub metrics: Arc<MetricsCollector>,
}

impl TestSystem {
    pub fn connect(&self, user_id: &str) -> TestClient {
        connect_client(&self.matchmaker, user_id)
    }

    pub async fn request(&self, user_id: &str) -> bool {
        self.matchmaker
            .request_match(&user_id.to_string())
            .await
            .expect("backend available")
    }
}

/// Connect a user straight through a matchmaker
pub fn connect_client(matchmaker: &Matchmaker, user_id: &str) -> TestClient {
    let (tx, receiver) = mpsc::unbounded_channel();
    let user_id = user_id.to_string();
    let connection_id = matchmaker.connect(&user_id, tx).expect("registry lock");

    TestClient {
        user_id,
        connection_id,
        receiver,
    }
}

/// A matchmaker over any backend, on a manual clock with the default timeout
pub fn create_matchmaker_on(backend: Arc<dyn MatchBackend>) -> Matchmaker {
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let metrics = Arc::new(MetricsCollector::new().expect("metrics registry"));
    let store = Arc::new(MatchStore::with_metrics(
        backend,
        clock,
        Duration::from_secs(60),
        metrics.clone(),
    ));
    let bridge = Arc::new(NotificationBridge::new(
        Arc::new(SocketRegistry::new()),
        metrics.clone(),
    ));

    Matchmaker::with_metrics(store, bridge, metrics)
}

pub fn create_test_system() -> TestSystem {
    create_test_system_with_timeout(Duration::from_secs(60))
}

pub fn create_test_system_with_timeout(timeout: Duration) -> TestSystem {
    let clock = Arc::new(ManualClock::new(START_MILLIS));
    let backend = Arc::new(FlakyBackend::new());
    let metrics = Arc::new(MetricsCollector::new().expect("metrics registry"));

    let store = Arc::new(MatchStore::with_metrics(
        backend.clone(),
        clock.clone(),
        timeout,
        metrics.clone(),
    ));
    let bridge = Arc::new(NotificationBridge::new(
        Arc::new(SocketRegistry::new()),
        metrics.clone(),
    ));

    TestSystem {
        matchmaker: Matchmaker::with_metrics(store, bridge, metrics.clone()),
        clock,
        backend,
        metrics,
    }
}
