//! Redis-backed counter store.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, Script};
use tracing::{debug, info};

use super::{CounterStore, Ttl, WindowSnapshot};
use crate::error::Result;

/// Increment a window counter and give it an expiry when it is created.
///
/// Runs as one script so no client can observe the counter between the
/// INCR and the EXPIRE. A pre-existing counter without expiry is given one
/// and flagged as repaired.
const INCR_WITH_EXPIRY_SCRIPT: &str = r#"
    local key = KEYS[1]
    local period = tonumber(ARGV[1])

    local count = redis.call("INCR", key)
    local repaired = 0

    if count == 1 then
        redis.call("EXPIRE", key, period)
    elseif redis.call("TTL", key) == -1 then
        redis.call("EXPIRE", key, period)
        repaired = 1
    end

    return {count, redis.call("TTL", key), repaired}
"#;

/// A counter store backed by a Redis server.
///
/// Cloning is cheap; all clones share the same multiplexed connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection_manager: ConnectionManager,
    incr_with_expiry_script: Script,
}

impl RedisCounterStore {
    /// Create a store from an existing connection manager.
    pub fn new(connection_manager: ConnectionManager) -> Self {
        Self {
            connection_manager,
            incr_with_expiry_script: Script::new(INCR_WITH_EXPIRY_SCRIPT),
        }
    }

    /// Open a client for `url` (e.g. `redis://localhost:6379/0`) and connect.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let connection_manager = client.get_connection_manager().await?;
        info!(url = %redact(url), "Connected to Redis counter store");
        Ok(Self::new(connection_manager))
    }

    /// Round-trip a PING to check that the server answers.
    pub async fn ping(&self) -> Result<()> {
        let mut connection_manager = self.connection_manager.clone();
        let reply: String = redis::cmd("PING").query_async(&mut connection_manager).await?;
        debug!(reply = %reply, "Redis ping");
        Ok(())
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn incr(&self, key: &str) -> Result<u64> {
        let mut connection_manager = self.connection_manager.clone();
        let count: u64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut connection_manager)
            .await?;
        Ok(count)
    }

    async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let mut connection_manager = self.connection_manager.clone();
        let set: bool = redis::cmd("EXPIRE")
            .arg(key)
            .arg(seconds)
            .query_async(&mut connection_manager)
            .await?;
        Ok(set)
    }

    async fn ttl(&self, key: &str) -> Result<Ttl> {
        let mut connection_manager = self.connection_manager.clone();
        let raw: i64 = redis::cmd("TTL")
            .arg(key)
            .query_async(&mut connection_manager)
            .await?;
        Ok(Ttl::from_raw(raw))
    }

    async fn get(&self, key: &str) -> Result<Option<u64>> {
        let mut connection_manager = self.connection_manager.clone();
        let count: Option<u64> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut connection_manager)
            .await?;
        Ok(count)
    }

    async fn incr_with_expiry(&self, key: &str, seconds: u64) -> Result<WindowSnapshot> {
        let mut connection_manager = self.connection_manager.clone();
        let (count, raw_ttl, repaired): (u64, i64, i64) = self
            .incr_with_expiry_script
            .key(key)
            .arg(seconds)
            .invoke_async(&mut connection_manager)
            .await?;

        Ok(WindowSnapshot {
            count,
            ttl: Ttl::from_raw(raw_ttl),
            repaired: repaired == 1,
        })
    }

    async fn snapshot(&self, key: &str) -> Result<(Option<u64>, Ttl)> {
        let mut connection_manager = self.connection_manager.clone();
        let (count, raw_ttl): (Option<u64>, i64) = redis::pipe()
            .atomic()
            .cmd("GET")
            .arg(key)
            .cmd("TTL")
            .arg(key)
            .query_async(&mut connection_manager)
            .await?;
        Ok((count, Ttl::from_raw(raw_ttl)))
    }
}

/// Hide the password portion of a Redis URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
