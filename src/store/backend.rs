//! Key-value backend interface and the in-memory implementation
//!
//! The matching state lives in three keys of a redis-shaped store: a FIFO
//! list of waiting user ids, a hash of enqueue timestamps and a hash of pair
//! bindings. The store offers no multi-key transactions; only single commands
//! (including multi-field `hset_multiple`/`hdel`) are atomic.

use crate::error::{MatchmakingError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// FIFO list of waiting user ids
pub const USERS_QUEUE_KEY: &str = "users_queue";
/// Hash of user id to enqueue timestamp (milliseconds)
pub const USERS_MAP_KEY: &str = "users_map";
/// Hash of user id to partner user id
pub const GAME_PAIRS_MAP_KEY: &str = "game_pairs_map";

/// Primitive operations of the backing key-value store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MatchBackend: Send + Sync {
    /// Append to the tail of a list, returning the new length
    async fn rpush(&self, key: &str, value: &str) -> Result<usize>;

    /// Prepend to the head of a list, returning the new length
    async fn lpush(&self, key: &str, value: &str) -> Result<usize>;

    /// Remove and return the head of a list
    async fn lpop(&self, key: &str) -> Result<Option<String>>;

    async fn llen(&self, key: &str) -> Result<usize>;

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Set several fields of one hash in a single atomic command
    async fn hset_multiple(&self, key: &str, entries: &[(String, String)]) -> Result<()>;

    /// Delete several fields of one hash atomically, returning how many existed
    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize>;

    async fn hlen(&self, key: &str) -> Result<usize>;

    /// Round-trip check used by readiness probes
    async fn ping(&self) -> Result<()>;
}

/// In-process backend used by the service and in tests
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    lists: RwLock<HashMap<String, VecDeque<String>>>,
    hashes: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a list, head first (for debugging and tests)
    pub fn list_snapshot(&self, key: &str) -> Result<Vec<String>> {
        let lists = self
            .lists
            .read()
            .map_err(|_| MatchmakingError::backend("Failed to acquire lists read lock"))?;

        Ok(lists
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Drop every key, as a flushed store would
    pub fn clear(&self) -> Result<()> {
        self.lists
            .write()
            .map_err(|_| MatchmakingError::backend("Failed to acquire lists write lock"))?
            .clear();
        self.hashes
            .write()
            .map_err(|_| MatchmakingError::backend("Failed to acquire hashes write lock"))?
            .clear();
        Ok(())
    }
}

#[async_trait]
impl MatchBackend for InMemoryBackend {
    async fn rpush(&self, key: &str, value: &str) -> Result<usize> {
        let mut lists = self
            .lists
            .write()
            .map_err(|_| MatchmakingError::backend("Failed to acquire lists write lock"))?;

        let list = lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        Ok(list.len())
    }

    async fn lpush(&self, key: &str, value: &str) -> Result<usize> {
        let mut lists = self
            .lists
            .write()
            .map_err(|_| MatchmakingError::backend("Failed to acquire lists write lock"))?;

        let list = lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        Ok(list.len())
    }

    async fn lpop(&self, key: &str) -> Result<Option<String>> {
        let mut lists = self
            .lists
            .write()
            .map_err(|_| MatchmakingError::backend("Failed to acquire lists write lock"))?;

        let Some(list) = lists.get_mut(key) else {
            return Ok(None);
        };
        let value = list.pop_front();
        if list.is_empty() {
            lists.remove(key);
        }
        Ok(value)
    }

    async fn llen(&self, key: &str) -> Result<usize> {
        let lists = self
            .lists
            .read()
            .map_err(|_| MatchmakingError::backend("Failed to acquire lists read lock"))?;

        Ok(lists.get(key).map(|list| list.len()).unwrap_or(0))
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let hashes = self
            .hashes
            .read()
            .map_err(|_| MatchmakingError::backend("Failed to acquire hashes read lock"))?;

        Ok(hashes.get(key).and_then(|hash| hash.get(field)).cloned())
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut hashes = self
            .hashes
            .write()
            .map_err(|_| MatchmakingError::backend("Failed to acquire hashes write lock"))?;

        hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_multiple(&self, key: &str, entries: &[(String, String)]) -> Result<()> {
        let mut hashes = self
            .hashes
            .write()
            .map_err(|_| MatchmakingError::backend("Failed to acquire hashes write lock"))?;

        let hash = hashes.entry(key.to_string()).or_default();
        for (field, value) in entries {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hdel(&self, key: &str, fields: &[String]) -> Result<usize> {
        let mut hashes = self
            .hashes
            .write()
            .map_err(|_| MatchmakingError::backend("Failed to acquire hashes write lock"))?;

        let Some(hash) = hashes.get_mut(key) else {
            return Ok(0);
        };
        let removed = fields
            .iter()
            .filter(|field| hash.remove(field.as_str()).is_some())
            .count();
        if hash.is_empty() {
            hashes.remove(key);
        }
        Ok(removed)
    }

    async fn hlen(&self, key: &str) -> Result<usize> {
        let hashes = self
            .hashes
            .read()
            .map_err(|_| MatchmakingError::backend("Failed to acquire hashes read lock"))?;

        Ok(hashes.get(key).map(|hash| hash.len()).unwrap_or(0))
    }

    async fn ping(&self) -> Result<()> {
        self.lists
            .read()
            .map_err(|_| MatchmakingError::backend("Failed to acquire lists read lock"))?;
        self.hashes
            .read()
            .map_err(|_| MatchmakingError::backend("Failed to acquire hashes read lock"))?;
        Ok(())
    }
}
