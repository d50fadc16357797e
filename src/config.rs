//! Allocator configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of a [`NonceAllocator`](crate::NonceAllocator).
///
/// Fields use serde defaults that fall back to environment variables,
/// then to hardcoded defaults.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllocatorConfig {
    /// How long a lock may be held before the store expires it, in milliseconds. Must be
    /// positive: a zero TTL expires the lock as soon as it is written.
    #[serde(
        default = "config_defaults::default_lock_ttl_ms",
        deserialize_with = "config_defaults::deserialize_lock_ttl_ms"
    )]
    pub lock_ttl_ms: u64,
    /// Optional namespace prepended to every store key, e.g. a CAIP-2 chain id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_prefix: Option<String>,
}

impl AllocatorConfig {
    /// The lock TTL. A zero `lock_ttl_ms` set in code counts as unset and yields the default.
    pub fn lock_ttl(&self) -> Duration {
        match self.lock_ttl_ms {
            0 => Duration::from_millis(config_defaults::default_lock_ttl_ms()),
            ms => Duration::from_millis(ms),
        }
    }
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            lock_ttl_ms: config_defaults::default_lock_ttl_ms(),
            key_prefix: None,
        }
    }
}

pub mod config_defaults {
    use serde::{Deserialize, Deserializer, de};
    use std::env;

    pub const DEFAULT_LOCK_TTL_MS: u64 = 30_000;
    pub const ENV_LOCK_TTL_MS: &str = "NONCE_LOCK_TTL_MS";

    /// Returns the default lock TTL with fallback: $NONCE_LOCK_TTL_MS env var -> 30000
    pub fn default_lock_ttl_ms() -> u64 {
        env::var(ENV_LOCK_TTL_MS)
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_LOCK_TTL_MS)
    }

    /// Rejects an explicit `lock_ttl_ms` of zero.
    pub fn deserialize_lock_ttl_ms<'de, D>(deserializer: D) -> Result<u64, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        if ms == 0 {
            return Err(de::Error::invalid_value(
                de::Unexpected::Unsigned(0),
                &"a lock TTL of at least 1 millisecond",
            ));
        }
        Ok(ms)
    }
}
