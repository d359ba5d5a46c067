//! Admission backend trait.

use async_trait::async_trait;

use super::identity::Identity;
use super::policy::{Decision, RateLimitPolicy, RateLimitStatus};
use crate::error::Result;

/// Trait for admission control implementations.
///
/// The HTTP layer only depends on this trait, so a different windowing
/// strategy can replace the fixed-window [`RateLimiter`](super::RateLimiter)
/// without touching callers.
#[async_trait]
pub trait AdmissionBackend: Send + Sync {
    /// Count one request against `identity` and decide whether it may proceed.
    async fn evaluate(&self, identity: &Identity) -> Result<Decision>;

    /// Report the remaining quota for `identity` without counting a request.
    async fn status(&self, identity: &Identity) -> Result<RateLimitStatus>;

    /// The policy this backend enforces.
    fn policy(&self) -> RateLimitPolicy;

    /// Name of the counter store behind this backend, for log events.
    fn name(&self) -> &'static str;
}
