//! In-process counter store.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{CounterStore, Ttl, WindowSnapshot};
use crate::error::{Result, TurnstileError};

/// A single counter and its optional expiry deadline.
#[derive(Debug, Clone, Copy, Default)]
struct CounterEntry {
    count: u64,
    expires_at: Option<Instant>,
}

/// `now + seconds`, or a config error if the deadline cannot be represented.
fn expiry_deadline(now: Instant, seconds: u64) -> Result<Instant> {
    now.checked_add(Duration::from_secs(seconds)).ok_or_else(|| {
        TurnstileError::Config(format!("expiry of {} seconds is out of range", seconds))
    })
}

impl CounterEntry {
    fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(deadline) if deadline <= now)
    }

    fn ttl(&self, now: Instant) -> Ttl {
        match self.expires_at {
            None => Ttl::Persistent,
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(now);
                // Round up so a live counter never reports 0 seconds left.
                Ttl::Expiring(remaining.as_millis().div_ceil(1000) as u64)
            }
        }
    }
}

/// A counter store kept in process memory.
///
/// Per-key atomicity comes from the shard lock dashmap takes for each
/// `entry` call; no guard is held across an await point. Expired counters
/// are dropped lazily on access, and [`InMemoryCounterStore::purge_expired`]
/// (or the loop started by [`InMemoryCounterStore::spawn_cleanup_loop`])
/// reclaims counters that are never touched again.
///
/// Counters are not shared between processes, so this store only enforces
/// limits for a single instance.
#[derive(Debug, Default)]
pub struct InMemoryCounterStore {
    entries: DashMap<String, CounterEntry>,
}

impl InMemoryCounterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored counters, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no counters.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every counter whose expiry has passed. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Periodically purge expired counters until the store is dropped.
    pub fn spawn_cleanup_loop(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                let Some(store) = weak.upgrade() else {
                    debug!("Counter store dropped, stopping cleanup loop");
                    break;
                };

                let removed = store.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = store.len(), "Purged expired counters");
                }
            }
        })
    }

    fn live_entry(&self, key: &str, now: Instant) -> Option<CounterEntry> {
        let entry = *self.entries.get(key)?;
        if entry.is_expired(now) {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
            return None;
        }
        Some(entry)
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let now = Instant::now();
        let mut entry = self.entries.entry(key.to_string()).or_default();
        if entry.is_expired(now) {
            *entry = CounterEntry::default();
        }
        entry.count += 1;
        Ok(entry.count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let now = Instant::now();
        match self.entries.get_mut(key) {
            Some(mut entry) if !entry.is_expired(now) => {
                entry.expires_at = Some(expiry_deadline(now, seconds)?);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        let now = Instant::now();
        Ok(self
            .live_entry(key, now)
            .map(|entry| entry.ttl(now))
            .unwrap_or(Ttl::Missing))
    }

    async fn get(&self, key: &str) -> Result<Option<u64>> {
        Ok(self.live_entry(key, Instant::now()).map(|entry| entry.count))
    }

    async fn incr_with_expiry(&self, key: &str, seconds: u64) -> Result<WindowSnapshot> {
        let now = Instant::now();
        let expires_at = expiry_deadline(now, seconds)?;
        let mut entry = self.entries.entry(key.to_string()).or_default();
        if entry.is_expired(now) {
            *entry = CounterEntry::default();
        }

        entry.count += 1;
        let mut repaired = false;
        if entry.count == 1 {
            entry.expires_at = Some(expires_at);
        } else if entry.expires_at.is_none() {
            entry.expires_at = Some(expires_at);
            repaired = true;
        }

        trace!(key, count = entry.count, "Incremented in-memory counter");

        Ok(WindowSnapshot {
            count: entry.count,
            ttl: entry.ttl(now),
            repaired,
        })
    }

    async fn snapshot(&self, key: &str) -> Result<(Option<u64>, Ttl)> {
        let now = Instant::now();
        Ok(match self.live_entry(key, now) {
            Some(entry) => (Some(entry.count), entry.ttl(now)),
            None => (None, Ttl::Missing),
        })
    }
}
