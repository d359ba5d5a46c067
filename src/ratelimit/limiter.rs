//! Core fixed-window rate limiter.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument, trace, warn};

use super::backend::AdmissionBackend;
use super::identity::Identity;
use super::policy::{Decision, RateLimitPolicy, RateLimitStatus};
use crate::error::{Result, TurnstileError};
use crate::store::CounterStore;

/// Default namespace for counter keys.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit";

/// Fixed-window rate limiter over a shared counter store.
///
/// Holds no mutable state of its own: every decision is derived from one
/// atomic increment in the store, so the limiter can be shared across any
/// number of tasks without locking. Denied requests are billed like
/// admitted ones, and a caller that drops an in-flight `evaluate` after the
/// increment landed has still been counted.
pub struct RateLimiter<S: CounterStore> {
    /// Backing counter store
    store: Arc<S>,
    /// Limit and window length
    policy: RateLimitPolicy,
    /// Namespace prepended to every counter key
    key_prefix: String,
}

impl<S: CounterStore> RateLimiter<S> {
    /// Create a rate limiter enforcing `policy` against `store`.
    pub fn new(store: Arc<S>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            policy,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
        }
    }

    /// Use a different key namespace.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Result<Self> {
        let prefix = prefix.into();
        if prefix.trim().is_empty() {
            return Err(TurnstileError::Config(
                "key prefix must not be empty".to_string(),
            ));
        }
        self.key_prefix = prefix;
        Ok(self)
    }

    /// The counter key for `identity`.
    pub fn key_for(&self, identity: &Identity) -> String {
        format!("{}:{}", self.key_prefix, identity)
    }

    /// The backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }
}

#[async_trait]
impl<S: CounterStore + 'static> AdmissionBackend for RateLimiter<S> {
    #[instrument(skip(self, identity), fields(identity = %identity, store = self.store.name()))]
    async fn evaluate(&self, identity: &Identity) -> Result<Decision> {
        let key = self.key_for(identity);
        let snapshot = self
            .store
            .incr_with_expiry(&key, self.policy.period_secs())
            .await?;

        trace!(
            key = %key,
            count = snapshot.count,
            ttl = ?snapshot.ttl,
            "Counted request"
        );

        if snapshot.repaired {
            warn!(
                key = %key,
                count = snapshot.count,
                period_secs = self.policy.period_secs(),
                "Found window counter without expiry; expiry restored"
            );
        }

        if snapshot.count > self.policy.limit() {
            // A live counter always has at least one second left.
            let retry_after = snapshot.ttl.as_secs().max(1);
            debug!(
                key = %key,
                count = snapshot.count,
                limit = self.policy.limit(),
                retry_after,
                "Rate limit exceeded"
            );
            return Ok(Decision::deny(retry_after));
        }

        Ok(Decision::allow(
            self.policy.remaining(snapshot.count),
            snapshot.ttl.as_secs(),
        ))
    }

    #[instrument(skip(self, identity), fields(identity = %identity, store = self.store.name()))]
    async fn status(&self, identity: &Identity) -> Result<RateLimitStatus> {
        let key = self.key_for(identity);
        let (count, ttl) = self.store.snapshot(&key).await?;

        Ok(RateLimitStatus {
            remaining: self.policy.remaining(count.unwrap_or(0)),
            time_left_secs: ttl.as_secs(),
        })
    }

    fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    fn name(&self) -> &'static str {
        self.store.name()
    }
}
