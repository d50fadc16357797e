//! Key-value store seam for lock and tracked-nonce records.
//!
//! The allocator never touches a backend directly. Everything it needs from a shared store
//! fits into five primitives, four of which every key-value store offers. The fifth,
//! [`NonceStore::compare_and_delete`], has to be a single atomic step on the server; stores
//! that cannot provide that keep the default implementation, which reports
//! [`StoreError::Unsupported`].

use std::sync::Arc;
use std::time::Duration;

/// Errors reported by a [`NonceStore`] backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the command.
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The backend does not offer the requested primitive.
    #[error("store does not support {0}")]
    Unsupported(&'static str),
    /// A record holds a value that cannot be interpreted.
    #[error("invalid value {value:?} stored at {key}")]
    InvalidValue { key: String, value: String },
}

impl StoreError {
    pub fn backend<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(error))
    }
}

/// Shared key-value store holding per-address lock and nonce records.
///
/// Implementations must be safe to share between tasks; the allocator clones nothing but
/// the store handle itself.
#[async_trait::async_trait]
pub trait NonceStore: Send + Sync {
    /// Stores `value` at `key` with the given time-to-live, only if `key` is absent.
    ///
    /// Returns `true` if the value was written.
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Overwrites `key` with `value`, without expiry.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Deletes `key` only if it currently holds `expected`, as one atomic step.
    ///
    /// Returns `true` if the key was deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        let _ = (key, expected);
        Err(StoreError::Unsupported("compare-and-delete"))
    }
}

#[async_trait::async_trait]
impl<T: NonceStore + ?Sized> NonceStore for Arc<T> {
    async fn set_if_not_exists(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        (**self).set_if_not_exists(key, value, ttl).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        (**self).compare_and_delete(key, expected).await
    }
}
