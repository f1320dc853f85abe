//! Request coalescing for translation keys.
//!
//! The first miss for a key opens a broadcast channel and becomes the only
//! batch item for it; every later request for the same key subscribes to that
//! channel until the batch resolves. All subscribers observe the same value.
//!
//! ```text
//! translate("שלום","en") ─┐
//!                         ├──► RequestCoalescer ──► one PendingBatchItem
//! translate("שלום","en") ─┘          │
//!                                    ▼
//!                        both receive the same string
//! ```
//!
//! Owned by the engine worker, so a plain `HashMap` is enough.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::debug;

use super::CacheKey;

/// Outcome of registering interest in a key.
pub enum Registration {
    /// No work exists for the key yet; the caller must enqueue a batch item.
    New(broadcast::Receiver<String>),
    /// Work is already accumulating or in flight; just wait.
    Coalesced(broadcast::Receiver<String>),
}

impl Registration {
    pub fn into_receiver(self) -> broadcast::Receiver<String> {
        match self {
            Registration::New(rx) | Registration::Coalesced(rx) => rx,
        }
    }
}

/// Statistics for monitoring coalescing effectiveness.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct CoalescerStats {
    /// Requests that reached the coalescer (cache misses)
    pub total_requests: u64,
    /// Requests that attached to existing work
    pub coalesced_requests: u64,
    /// Requests that created new work
    pub new_requests: u64,
}

impl CoalescerStats {
    /// Returns the coalescing ratio (0.0 to 1.0)
    pub fn coalescing_ratio(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.coalesced_requests as f64 / self.total_requests as f64
        }
    }
}

#[derive(Default)]
pub struct RequestCoalescer {
    in_flight: HashMap<CacheKey, broadcast::Sender<String>>,
    stats: CoalescerStats,
}

impl RequestCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: &CacheKey) -> Registration {
        self.stats.total_requests += 1;

        if let Some(tx) = self.in_flight.get(key) {
            self.stats.coalesced_requests += 1;
            debug!(
                key = %key.digest(),
                waiters = tx.receiver_count() + 1,
                "coalescing request onto pending translation"
            );
            return Registration::Coalesced(tx.subscribe());
        }

        // One value is ever sent per channel.
        let (tx, rx) = broadcast::channel(1);
        self.in_flight.insert(key.clone(), tx);
        self.stats.new_requests += 1;
        Registration::New(rx)
    }

    /// Deliver `value` to every waiter on `key` and forget the key.
    /// Returns the number of waiters reached.
    pub fn complete(&mut self, key: &CacheKey, value: String) -> usize {
        match self.in_flight.remove(key) {
            // Send fails only when every waiter is gone.
            Some(tx) => tx.send(value).unwrap_or(0),
            None => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn stats(&self) -> CoalescerStats {
        self.stats
    }
}
