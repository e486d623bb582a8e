//! Per-user expiry timers
//!
//! Each waiting user owns at most one pending cleanup. The registry entry is
//! the arbiter between a timer firing and a cancellation: whichever removes
//! the entry first wins, and the other side becomes a no-op.

use crate::types::UserId;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, error};

struct ArmedTimer {
    generation: u64,
    handle: AbortHandle,
}

/// Registry of cancellable cleanup tasks keyed by user id
#[derive(Default)]
pub struct ExpiryTimers {
    timers: Mutex<HashMap<UserId, ArmedTimer>>,
    next_generation: AtomicU64,
    fired: AtomicU64,
}

impl ExpiryTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_expire` to run after `delay` unless cancelled first.
    ///
    /// A timer already armed for the same user is replaced and aborted.
    pub fn arm<F>(self: &Arc<Self>, user_id: &UserId, delay: Duration, on_expire: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let registry = Arc::clone(self);
        let owner = user_id.clone();

        // The table stays locked until the entry is in place, so the task can
        // never look for its own entry before it exists.
        let Ok(mut timers) = self.timers.lock() else {
            error!("Failed to acquire expiry timers lock, timer for '{}' not armed", user_id);
            return;
        };

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if registry.take_if_current(&owner, generation) {
                on_expire.await;
                registry.fired.fetch_add(1, Ordering::SeqCst);
            } else {
                debug!("Expiry timer for '{}' lost the race, skipping", owner);
            }
        });

        let armed = ArmedTimer {
            generation,
            handle: handle.abort_handle(),
        };
        if let Some(previous) = timers.insert(user_id.clone(), armed) {
            previous.handle.abort();
        }
    }

    /// Cancel the pending timer of a user. Returns false if none was pending.
    pub fn cancel(&self, user_id: &str) -> bool {
        let Ok(mut timers) = self.timers.lock() else {
            error!("Failed to acquire expiry timers lock, cannot cancel '{}'", user_id);
            return false;
        };

        match timers.remove(user_id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every pending timer
    pub fn cancel_all(&self) -> usize {
        let Ok(mut timers) = self.timers.lock() else {
            return 0;
        };

        let count = timers.len();
        for (_, timer) in timers.drain() {
            timer.handle.abort();
        }
        count
    }

    pub fn is_armed(&self, user_id: &str) -> bool {
        self.timers
            .lock()
            .map(|timers| timers.contains_key(user_id))
            .unwrap_or(false)
    }

    pub fn armed_count(&self) -> usize {
        self.timers.lock().map(|timers| timers.len()).unwrap_or(0)
    }

    /// Number of timers that ran their cleanup
    pub fn fired_count(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }

    fn take_if_current(&self, user_id: &str, generation: u64) -> bool {
        let Ok(mut timers) = self.timers.lock() else {
            return false;
        };

        match timers.get(user_id) {
            Some(timer) if timer.generation == generation => {
                timers.remove(user_id);
                true
            }
            _ => false,
        }
    }
}
