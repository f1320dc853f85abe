//! Persistence debouncer: at most one durable write per `PERSIST_DELAY`.
//! The engine owns the timer; this type only tracks the single-shot deadline.

use std::time::Duration;

use tokio::time::Instant;

/// Delay between the first mutation and the durable write it triggers.
pub const PERSIST_DELAY: Duration = Duration::from_secs(2);

pub struct PersistenceDebouncer {
    delay: Duration,
    deadline: Option<Instant>,
}

impl PersistenceDebouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// Arm the timer unless it is already armed. Returns true if this call armed it.
    pub fn schedule(&mut self, now: Instant) -> bool {
        if self.deadline.is_some() {
            return false;
        }
        self.deadline = Some(now + self.delay);
        true
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarm; the caller performs the write.
    pub fn fire(&mut self) {
        self.deadline = None;
    }
}

impl Default for PersistenceDebouncer {
    fn default() -> Self {
        Self::new(PERSIST_DELAY)
    }
}
