//! Batch scheduler: Idle → Accumulating → Flushing → Idle.
//! The first item after a flush arms one global window (`BATCH_WINDOW`); later
//! items join without resetting it, so a burst waits at most one window.
//! On expiry everything pending is drained at once and grouped per
//! (provider mode, target language); each group becomes one provider call.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::{CacheKey, ProviderMode};

/// Accumulation window before pending items are flushed.
pub const BATCH_WINDOW: Duration = Duration::from_millis(120);

/// A cache miss waiting for the next flush. At most one exists per key;
/// its waiters live in the coalescer.
#[derive(Debug, Clone)]
pub struct PendingBatchItem {
    pub key: CacheKey,
    pub enqueued_at: Instant,
}

impl PendingBatchItem {
    pub fn new(key: CacheKey, enqueued_at: Instant) -> Self {
        Self { key, enqueued_at }
    }

    pub fn text(&self) -> &str {
        &self.key.text
    }
}

/// Items sharing a provider mode and target language, in arrival order.
#[derive(Debug)]
pub struct BatchGroup {
    pub mode: ProviderMode,
    pub target: String,
    pub items: Vec<PendingBatchItem>,
}

impl BatchGroup {
    /// Source texts in item order; position i of the provider result belongs to item i.
    pub fn texts(&self) -> Vec<String> {
        self.items.iter().map(|item| item.text().to_string()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BatchPhase {
    Idle,
    Accumulating,
    Flushing,
}

impl std::fmt::Display for BatchPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BatchPhase::Idle => write!(f, "Idle"),
            BatchPhase::Accumulating => write!(f, "Accumulating"),
            BatchPhase::Flushing => write!(f, "Flushing"),
        }
    }
}

pub struct BatchScheduler {
    window: Duration,
    pending: Vec<PendingBatchItem>,
    deadline: Option<Instant>,
    flights: usize,
}

impl BatchScheduler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: Vec::new(),
            deadline: None,
            flights: 0,
        }
    }

    /// Queue an item. Arms the window if it is not running; returns true if it did.
    pub fn enqueue(&mut self, item: PendingBatchItem) -> bool {
        let armed = if self.deadline.is_none() {
            self.deadline = Some(item.enqueued_at + self.window);
            true
        } else {
            false
        };
        self.pending.push(item);
        armed
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Drain everything pending and disarm the window. Items are grouped by
    /// (mode, target) in first-seen order and de-duplicated by key.
    pub fn take_groups(&mut self) -> Vec<BatchGroup> {
        self.deadline = None;
        let drained = std::mem::take(&mut self.pending);

        let mut groups: Vec<BatchGroup> = Vec::new();
        let mut index: HashMap<(ProviderMode, String), usize> = HashMap::new();
        let mut seen: HashSet<CacheKey> = HashSet::with_capacity(drained.len());

        for item in drained {
            if !seen.insert(item.key.clone()) {
                continue;
            }
            let slot = *index
                .entry((item.key.mode, item.key.target.clone()))
                .or_insert_with(|| {
                    groups.push(BatchGroup {
                        mode: item.key.mode,
                        target: item.key.target.clone(),
                        items: Vec::new(),
                    });
                    groups.len() - 1
                });
            groups[slot].items.push(item);
        }
        groups
    }

    pub fn begin_flight(&mut self) {
        self.flights += 1;
    }

    pub fn end_flight(&mut self) {
        self.flights = self.flights.saturating_sub(1);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn flights(&self) -> usize {
        self.flights
    }

    pub fn phase(&self) -> BatchPhase {
        if self.flights > 0 {
            BatchPhase::Flushing
        } else if !self.pending.is_empty() {
            BatchPhase::Accumulating
        } else {
            BatchPhase::Idle
        }
    }
}

impl Default for BatchScheduler {
    fn default() -> Self {
        Self::new(BATCH_WINDOW)
    }
}
