//! Counter store doubles for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{CounterStore, InMemoryCounterStore, Ttl};
use crate::error::{Result, TurnstileError};

/// A store whose every call fails as if the server were down.
#[derive(Debug, Default)]
pub(crate) struct UnavailableStore;

#[async_trait]
impl CounterStore for UnavailableStore {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn incr(&self, _key: &str) -> Result<u64> {
        Err(TurnstileError::StoreUnavailable("connection refused".to_string()))
    }

    async fn expire(&self, _key: &str, _seconds: u64) -> Result<bool> {
        Err(TurnstileError::StoreUnavailable("connection refused".to_string()))
    }

    async fn ttl(&self, _key: &str) -> Result<Ttl> {
        Err(TurnstileError::StoreUnavailable("connection refused".to_string()))
    }

    async fn get(&self, _key: &str) -> Result<Option<u64>> {
        Err(TurnstileError::StoreUnavailable("connection refused".to_string()))
    }
}

/// A store without a combined increment primitive.
///
/// Wraps the in-memory store but only forwards the four basic calls, so the
/// trait's default `incr_with_expiry` runs. `fail_next_expire` makes the next
/// `expire` call error out, leaving a counter with no expiry behind.
#[derive(Debug, Default)]
pub(crate) struct SplitStore {
    pub(crate) inner: InMemoryCounterStore,
    fail_next_expire: AtomicBool,
    calls: AtomicUsize,
}

impl SplitStore {
    pub(crate) fn fail_next_expire(&self) {
        self.fail_next_expire.store(true, Ordering::SeqCst);
    }

    /// Number of store round trips made so far.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for SplitStore {
    fn name(&self) -> &'static str {
        "split"
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.incr(key).await
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_expire.swap(false, Ordering::SeqCst) {
            return Err(TurnstileError::StoreUnavailable("connection reset".to_string()));
        }
        self.inner.expire(key, seconds).await
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.ttl(key).await
    }

    async fn get(&self, key: &str) -> Result<Option<u64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.get(key).await
    }
}
