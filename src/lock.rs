//! Per-address distributed lock held in the shared store.
//!
//! A lock is a store key holding a random owner token with a time-to-live. Only the
//! holder of the matching token may delete it, and the TTL guarantees that a crashed
//! holder cannot block the address forever.

use nonce_types::{NonceStore, StoreError};
use std::time::Duration;
use tokio::time::Instant;

/// Random value identifying a single acquisition attempt.
#[derive(Clone, PartialEq, Eq)]
pub struct OwnerToken(String);

impl OwnerToken {
    pub fn generate() -> Self {
        let bytes: [u8; 16] = rand::random();
        Self(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for OwnerToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Enough to correlate log lines without printing the whole token.
        write!(f, "OwnerToken({}..)", &self.0[..8])
    }
}

/// What happened to the lock key when its holder released it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockRelease {
    /// The key still held our token and was deleted.
    Released,
    /// The key had expired or belonged to another holder; it was left alone.
    NotOwned,
}

/// A held lock. Must be handed back through [`NonceLock::release`].
///
/// Dropping it without release (cancelled future, panic) leaves the key in the store
/// until its TTL runs out.
#[derive(Debug)]
pub struct NonceLock {
    key: String,
    token: OwnerToken,
    deadline: Instant,
    released: bool,
}

impl NonceLock {
    /// Attempts `SET key token NX` with the given TTL.
    ///
    /// Returns `Ok(None)` if the key is already held; never waits for it.
    pub async fn try_acquire<S>(
        store: &S,
        key: String,
        ttl: Duration,
    ) -> Result<Option<Self>, StoreError>
    where
        S: NonceStore + ?Sized,
    {
        let token = OwnerToken::generate();
        let deadline = Instant::now() + ttl;
        if !store.set_if_not_exists(&key, token.as_str(), ttl).await? {
            return Ok(None);
        }
        tracing::trace!(%key, ?token, ?ttl, "acquired nonce lock");
        Ok(Some(Self {
            key,
            token,
            deadline,
            released: false,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &OwnerToken {
        &self.token
    }

    /// Point in time after which the store may hand the lock to someone else.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Deletes the lock key if it still holds this lock's token.
    ///
    /// Tries the store's atomic compare-and-delete first and falls back to a
    /// get-compare-delete sequence only when the store reports it as unsupported.
    pub async fn release<S>(mut self, store: &S) -> Result<LockRelease, StoreError>
    where
        S: NonceStore + ?Sized,
    {
        self.released = true;
        match store
            .compare_and_delete(&self.key, self.token.as_str())
            .await
        {
            Ok(true) => Ok(LockRelease::Released),
            Ok(false) => Ok(LockRelease::NotOwned),
            Err(StoreError::Unsupported(_)) => {
                tracing::debug!(
                    key = %self.key,
                    "compare-and-delete unsupported, using get-then-delete"
                );
                self.release_non_atomic(store).await
            }
            Err(e) => Err(e),
        }
    }

    /// Degraded release for stores without an atomic compare-and-delete.
    ///
    /// Not atomic: if the lock expires and is re-acquired by another caller between the
    /// `get` and the `delete`, this deletes the new holder's lock and a third caller can
    /// then enter the critical section alongside it. The window is one store round trip
    /// and only opens when the critical section already ran close to the TTL.
    async fn release_non_atomic<S>(&self, store: &S) -> Result<LockRelease, StoreError>
    where
        S: NonceStore + ?Sized,
    {
        let current = store.get(&self.key).await?;
        if current.as_deref() != Some(self.token.as_str()) {
            return Ok(LockRelease::NotOwned);
        }
        store.delete(&self.key).await?;
        Ok(LockRelease::Released)
    }
}

impl Drop for NonceLock {
    fn drop(&mut self) {
        if !self.released {
            tracing::warn!(
                key = %self.key,
                token = ?self.token,
                "nonce lock dropped without release, it stays held until its ttl expires"
            );
        }
    }
}
