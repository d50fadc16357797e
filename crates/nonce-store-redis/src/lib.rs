#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Redis backend for the distributed nonce allocator.
//!
//! [`RedisStore`] implements [`NonceStore`] on top of a multiplexed, auto-reconnecting
//! [`ConnectionManager`]:
//!
//! | Primitive | Redis |
//! |-----------|-------|
//! | `set_if_not_exists` | `SET key value NX PX ttl` |
//! | `get` / `set` / `delete` | `GET` / `SET` / `DEL` |
//! | `compare_and_delete` | Lua script via `EVALSHA`, loaded on demand |
//!
//! The script runs on the server as one step, so no other command can slip in between
//! reading the lock's owner token and deleting the key. Deployments that forbid Lua can set
//! `scripting: false`; the store then reports compare-and-delete as unsupported and the
//! allocator uses its non-atomic fallback. A server that rejects the script at runtime is
//! treated the same way.
//!
//! # Example
//!
//! ```json
//! { "url": "$REDIS_URL", "scripting": true }
//! ```

use async_trait::async_trait;
use nonce_types::config::LiteralOrEnv;
use nonce_types::{FromConfig, NonceStore, StoreError};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use url::Url;

/// Deletes `KEYS[1]` if it holds `ARGV[1]`. Returns the number of deleted keys.
const COMPARE_AND_DELETE_LUA: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
else
    return 0
end
"#;

/// Configuration of the Redis store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisStoreConfig {
    /// Connection URL, e.g. `redis://:password@127.0.0.1:6379/0`, or an env var reference.
    pub url: LiteralOrEnv<Url>,
    /// Whether to use the Lua compare-and-delete script (default: true).
    #[serde(default = "redis_store_config::default_scripting")]
    pub scripting: bool,
}

mod redis_store_config {
    pub fn default_scripting() -> bool {
        true
    }
}

#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    compare_and_delete: Option<Script>,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("scripting", &self.compare_and_delete.is_some())
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to `url`. The connection reconnects on its own after failures.
    pub async fn connect(url: &Url, scripting: bool) -> Result<Self, RedisError> {
        let client = redis::Client::open(url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(conn, scripting))
    }

    pub fn from_connection(conn: ConnectionManager, scripting: bool) -> Self {
        Self {
            conn,
            compare_and_delete: scripting.then(|| Script::new(COMPARE_AND_DELETE_LUA)),
        }
    }

    pub fn scripting(&self) -> bool {
        self.compare_and_delete.is_some()
    }
}

#[async_trait]
impl FromConfig<RedisStoreConfig> for RedisStore {
    async fn from_config(config: &RedisStoreConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let url = config.url.inner();
        let store = RedisStore::connect(url, config.scripting)
            .await
            .map_err(connect_error)?;
        tracing::info!(
            host = url.host_str().unwrap_or_default(),
            scripting = config.scripting,
            "Using Redis nonce store"
        );
        Ok(store)
    }
}

#[async_trait]
impl NonceStore for RedisStore {
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(StoreError::backend)?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(key).await.map_err(StoreError::backend)?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value).await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(key).await.map_err(StoreError::backend)?;
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let Some(script) = &self.compare_and_delete else {
            return Err(StoreError::Unsupported("compare-and-delete"));
        };
        let mut conn = self.conn.clone();
        let deleted: i64 = match script.key(key).arg(expected).invoke_async(&mut conn).await {
            Ok(deleted) => deleted,
            Err(e) if is_scripting_unavailable(&e) => {
                tracing::warn!(error = %e, "Redis rejected the compare-and-delete script");
                return Err(StoreError::Unsupported("compare-and-delete"));
            }
            Err(e) => return Err(StoreError::backend(e)),
        };
        Ok(deleted > 0)
    }
}

/// Failures to reach the server are reported as [`StoreError::Backend`], which callers treat
/// as transient. Anything else, such as a malformed URL, stays a plain [`RedisError`].
fn connect_error(error: RedisError) -> Box<dyn std::error::Error> {
    if error.is_io_error() || error.is_connection_refusal() || error.is_timeout() {
        Box::new(StoreError::backend(error))
    } else {
        Box::new(error)
    }
}

/// `PX` rejects zero, and sub-millisecond TTLs round up.
fn ttl_millis(ttl: Duration) -> u64 {
    let millis = ttl.as_nanos().div_ceil(1_000_000);
    u64::try_from(millis).unwrap_or(u64::MAX).max(1)
}

/// Whether the server refused to run Lua at all, as opposed to failing while running it.
fn is_scripting_unavailable(error: &RedisError) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("unknown command")
        || message.contains("noperm")
        || message.contains("no permissions")
        || message.contains("scripting is disabled")
}
