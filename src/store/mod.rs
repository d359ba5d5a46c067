//! Counter store abstraction.
//!
//! The admission controller never owns counter state. It talks to a shared
//! key-value service through the narrow set of atomic primitives defined by
//! [`CounterStore`]. Redis is the production implementation; the in-memory
//! store serves single-process deployments and tests.

mod memory;
mod redis_store;

#[cfg(test)]
pub(crate) mod test_support;

use async_trait::async_trait;

use crate::error::Result;

pub use self::memory::InMemoryCounterStore;
pub use self::redis_store::RedisCounterStore;

/// Time-to-live of a stored counter, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ttl {
    /// The key expires in the given number of seconds.
    Expiring(u64),
    /// The key exists but has no expiry.
    Persistent,
    /// The key does not exist.
    Missing,
}

impl Ttl {
    /// Convert a raw Redis `TTL` reply (`-1` no expiry, `-2` no key).
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            -1 => Ttl::Persistent,
            r if r < 0 => Ttl::Missing,
            r => Ttl::Expiring(r as u64),
        }
    }

    /// Seconds until expiry, with absent and non-expiring keys reported as 0.
    pub fn as_secs(&self) -> u64 {
        match self {
            Ttl::Expiring(secs) => *secs,
            Ttl::Persistent | Ttl::Missing => 0,
        }
    }
}

/// Result of one combined increment against a window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    /// Post-increment count
    pub count: u64,
    /// TTL observed right after the increment
    pub ttl: Ttl,
    /// A counter without expiry was found and given one
    pub repaired: bool,
}

/// Atomic counter primitives consumed by the admission controller.
///
/// Implementations must make `incr` atomic: concurrent callers on the same
/// key each observe a distinct post-increment value.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Short name used in log events.
    fn name(&self) -> &'static str;

    /// Increment the counter, creating it at 1 if absent.
    async fn incr(&self, key: &str) -> Result<u64>;

    /// Set (or overwrite) the key's expiry. Returns `false` if the key is absent.
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool>;

    /// Read the key's time-to-live.
    async fn ttl(&self, key: &str) -> Result<Ttl>;

    /// Read the counter without mutating it.
    async fn get(&self, key: &str) -> Result<Option<u64>>;

    /// Increment the counter and give it an expiry of `seconds` if this call
    /// created it.
    ///
    /// The default composes `incr`, `expire` and `ttl`. A crash between the
    /// increment and the expiry leaves a counter that never expires; the next
    /// call observes `Ttl::Persistent` and repairs it. Stores with a
    /// server-side combined primitive should override this.
    async fn incr_with_expiry(&self, key: &str, seconds: u64) -> Result<WindowSnapshot> {
        let count = self.incr(key).await?;
        if count == 1 {
            self.expire(key, seconds).await?;
        }

        let ttl = self.ttl(key).await?;
        if ttl == Ttl::Persistent {
            self.expire(key, seconds).await?;
            return Ok(WindowSnapshot {
                count,
                ttl: Ttl::Expiring(seconds),
                repaired: true,
            });
        }

        Ok(WindowSnapshot {
            count,
            ttl,
            repaired: false,
        })
    }

    /// Read the counter and its TTL together.
    async fn snapshot(&self, key: &str) -> Result<(Option<u64>, Ttl)> {
        let count = self.get(key).await?;
        let ttl = self.ttl(key).await?;
        Ok((count, ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::test_support::SplitStore;

    #[test]
    fn test_ttl_from_raw() {
        assert_eq!(Ttl::from_raw(7), Ttl::Expiring(7));
        assert_eq!(Ttl::from_raw(0), Ttl::Expiring(0));
        assert_eq!(Ttl::from_raw(-1), Ttl::Persistent);
        assert_eq!(Ttl::from_raw(-2), Ttl::Missing);
    }

    #[test]
    fn test_ttl_normalizes_sentinels_to_zero() {
        assert_eq!(Ttl::Expiring(9).as_secs(), 9);
        assert_eq!(Ttl::Persistent.as_secs(), 0);
        assert_eq!(Ttl::Missing.as_secs(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_incr_with_expiry_sets_ttl_on_creation() {
        let store = SplitStore::default();

        let first = store.incr_with_expiry("k", 10).await.unwrap();
        assert_eq!(first.count, 1);
        assert_eq!(first.ttl, Ttl::Expiring(10));
        assert!(!first.repaired);

        let second = store.incr_with_expiry("k", 10).await.unwrap();
        assert_eq!(second.count, 2);
        assert!(!second.repaired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_incr_with_expiry_repairs_missing_expiry() {
        let store = SplitStore::default();

        store.fail_next_expire();
        assert!(store.incr_with_expiry("k", 10).await.is_err());
        assert_eq!(store.ttl("k").await.unwrap(), Ttl::Persistent);

        let snapshot = store.incr_with_expiry("k", 10).await.unwrap();
        assert_eq!(snapshot.count, 2);
        assert!(snapshot.repaired);
        assert_eq!(store.ttl("k").await.unwrap(), Ttl::Expiring(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_default_snapshot() {
        let store = SplitStore::default();
        assert_eq!(store.snapshot("k").await.unwrap(), (None, Ttl::Missing));

        store.incr_with_expiry("k", 10).await.unwrap();
        assert_eq!(
            store.snapshot("k").await.unwrap(),
            (Some(1), Ttl::Expiring(10))
        );
    }
}
