// Time-bounded result storage
// Entries older than the TTL are never returned, and are physically removed
// by the next sweep (on read, or by the optional periodic sweeper).

use codeq_common::types::ExecutionOutcome;
use dashmap::DashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredOutcome {
    outcome: ExecutionOutcome,
    stored_at: Instant,
}

#[derive(Debug)]
pub struct ResultStore {
    ttl: Duration,
    entries: DashMap<String, StoredOutcome>,
}

impl ResultStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: DashMap::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Record a terminal outcome, stamped with the current time
    pub fn put(&self, execution_id: impl Into<String>, outcome: ExecutionOutcome) {
        self.entries.insert(
            execution_id.into(),
            StoredOutcome {
                outcome,
                stored_at: Instant::now(),
            },
        );
    }

    /// Look up an outcome; an expired entry reads as absent and is dropped
    pub fn get(&self, execution_id: &str) -> Option<ExecutionOutcome> {
        let now = Instant::now();
        {
            let entry = self.entries.get(execution_id)?;
            if !self.is_expired(&entry, now) {
                return Some(entry.outcome.clone());
            }
        }

        // Shard guard must be released before removing
        self.entries
            .remove_if(execution_id, |_, stored| self.is_expired(stored, now));
        None
    }

    /// Drop every expired entry, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, stored| {
            let expired = self.is_expired(stored, now);
            if expired {
                removed += 1;
            }
            !expired
        });

        if removed > 0 {
            debug!(removed, remaining = self.entries.len(), "Cleaned up expired results");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn is_expired(&self, stored: &StoredOutcome, now: Instant) -> bool {
        now.duration_since(stored.stored_at) > self.ttl
    }
}
