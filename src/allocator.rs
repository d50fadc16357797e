//! The nonce allocator.
//!
//! [`NonceAllocator`] serializes nonce issuance per wallet address across processes that
//! share nothing but a [`NonceStore`]. It keeps no per-address state of its own, so any
//! number of instances can run side by side against the same store.
//!
//! # How it works
//!
//! - **acquire**: takes the address lock (failing fast if it is busy), asks the ledger for
//!   the pending nonce, reconciles it with the last issued nonce, records the result and
//!   releases the lock on every exit path.
//! - **confirm**: records a broadcast nonce as the last issued one.
//! - **release**: hands an unused nonce back so the next acquisition reissues it, unless
//!   newer nonces have been issued since.
//! - **reset_nonce**: forgets the tracked value so the next acquisition trusts the ledger.

use nonce_types::{LedgerError, NonceStore, PendingNonceSource, StoreError};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::AllocatorConfig;
use crate::error::AllocatorError;
use crate::keys::{CanonicalAddress, KeySpace};
use crate::lock::{LockRelease, NonceLock};

/// Outcome of [`NonceAllocator::release`]. Every variant is a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The tracked nonce was stepped back; the released nonce is issued next.
    RolledBack { tracked: u64 },
    /// Nonce zero was released; the tracked value was removed.
    Cleared,
    /// Nothing was tracked for the address.
    NotTracked,
    /// The tracked nonce has moved past the released one and was left untouched.
    Stale { tracked: u64 },
}

impl fmt::Display for ReleaseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReleaseOutcome::RolledBack { tracked } => write!(f, "rolled back to {tracked}"),
            ReleaseOutcome::Cleared => f.write_str("cleared"),
            ReleaseOutcome::NotTracked => f.write_str("not tracked"),
            ReleaseOutcome::Stale { tracked } => write!(f, "stale, tracked nonce is {tracked}"),
        }
    }
}

/// Next nonce to issue given the ledger's pending nonce and the last issued one.
///
/// The ledger wins unless this allocator has already issued nonces the network has not
/// seen yet, in which case issuance continues right after the last one.
pub fn next_nonce(pending: u64, tracked: Option<u64>) -> u64 {
    match tracked {
        Some(tracked) => pending.max(tracked.saturating_add(1)),
        None => pending,
    }
}

/// Distributed nonce allocator over a shared [`NonceStore`].
#[derive(Debug, Clone)]
pub struct NonceAllocator<S> {
    store: S,
    keys: KeySpace,
    lock_ttl: Duration,
}

impl<S> NonceAllocator<S>
where
    S: NonceStore,
{
    /// Creates an allocator whose locks expire after `lock_ttl`.
    ///
    /// # Panics
    ///
    /// If `lock_ttl` is zero, since such a lock expires as soon as it is taken.
    pub fn new(store: S, lock_ttl: Duration) -> Self {
        assert!(!lock_ttl.is_zero(), "nonce lock TTL must be positive");
        Self {
            store,
            keys: KeySpace::default(),
            lock_ttl,
        }
    }

    pub fn from_config(store: S, config: &AllocatorConfig) -> Self {
        Self {
            store,
            keys: KeySpace::new(config.key_prefix.clone()),
            lock_ttl: config.lock_ttl(),
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.keys = KeySpace::new(Some(prefix.into()));
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn keys(&self) -> &KeySpace {
        &self.keys
    }

    pub fn lock_ttl(&self) -> Duration {
        self.lock_ttl
    }

    /// Allocates the next nonce for `address`.
    ///
    /// Fails with [`AllocatorError::LockContention`] without waiting if another caller is
    /// allocating for the same address. The ledger query is bounded by the lock's TTL so
    /// that the critical section never outlives the lock. Whatever the outcome, the lock is
    /// released before this returns; release problems are logged and never replace the
    /// result.
    pub async fn acquire<L>(&self, address: &str, ledger: &L) -> Result<u64, AllocatorError>
    where
        L: PendingNonceSource + ?Sized,
    {
        let address = CanonicalAddress::parse(address)?;
        let lock = self.lock(&address).await?;
        let result = self.issue(&address, ledger, lock.deadline()).await;
        self.unlock(lock, &address).await;
        result
    }

    /// Records `nonce` as successfully broadcast for `address`.
    ///
    /// Unconditional overwrite without locking: only the caller that acquired `nonce`
    /// confirms it, and it confirms in acquisition order.
    pub async fn confirm(&self, address: &str, nonce: u64) -> Result<(), AllocatorError> {
        let address = CanonicalAddress::parse(address)?;
        let key = self.keys.nonce_key(&address);
        self.store.set(&key, &nonce.to_string()).await?;
        tracing::debug!(%address, nonce, "confirmed nonce");
        Ok(())
    }

    /// Returns an acquired but never broadcast `nonce` to the pool.
    ///
    /// Only rolls back if `nonce` is still the last issued nonce; a release that arrives
    /// after newer acquisitions is ignored. Runs under the address lock so it cannot
    /// interleave with an acquisition, and like [`acquire`](Self::acquire) fails fast with
    /// [`AllocatorError::LockContention`] if the lock is busy.
    pub async fn release(
        &self,
        address: &str,
        nonce: u64,
    ) -> Result<ReleaseOutcome, AllocatorError> {
        let address = CanonicalAddress::parse(address)?;
        let lock = self.lock(&address).await?;
        let result = self.roll_back(&address, nonce).await;
        self.unlock(lock, &address).await;
        result
    }

    /// Forgets the tracked nonce for `address`; the next acquisition uses the ledger value.
    pub async fn reset_nonce(&self, address: &str) -> Result<(), AllocatorError> {
        let address = CanonicalAddress::parse(address)?;
        let key = self.keys.nonce_key(&address);
        self.store.delete(&key).await?;
        tracing::info!(%address, "reset tracked nonce");
        Ok(())
    }

    /// The last nonce issued for `address`, if any is tracked.
    pub async fn tracked_nonce(&self, address: &str) -> Result<Option<u64>, AllocatorError> {
        let address = CanonicalAddress::parse(address)?;
        let key = self.keys.nonce_key(&address);
        Ok(self.read_tracked(&key).await?)
    }

    async fn lock(&self, address: &CanonicalAddress) -> Result<NonceLock, AllocatorError> {
        let key = self.keys.lock_key(address);
        match NonceLock::try_acquire(&self.store, key, self.lock_ttl).await? {
            Some(lock) => Ok(lock),
            None => {
                tracing::warn!(
                    monotonic_counter.nonce_lock_contention = 1_u64,
                    %address,
                    "nonce lock is busy"
                );
                Err(AllocatorError::LockContention {
                    address: address.to_string(),
                })
            }
        }
    }

    async fn unlock(&self, lock: NonceLock, address: &CanonicalAddress) {
        let key = lock.key().to_string();
        match lock.release(&self.store).await {
            Ok(LockRelease::Released) => {
                tracing::trace!(%address, %key, "released nonce lock");
            }
            Ok(LockRelease::NotOwned) => {
                tracing::warn!(
                    %address,
                    %key,
                    "nonce lock expired or changed hands before release, left in place"
                );
            }
            Err(e) => {
                tracing::warn!(
                    %address,
                    %key,
                    error = %e,
                    "failed to release nonce lock, it stays held until its ttl expires"
                );
            }
        }
    }

    async fn issue<L>(
        &self,
        address: &CanonicalAddress,
        ledger: &L,
        deadline: Instant,
    ) -> Result<u64, AllocatorError>
    where
        L: PendingNonceSource + ?Sized,
    {
        let query = ledger.pending_nonce(address.as_str());
        let pending = match tokio::time::timeout_at(deadline, query).await {
            Ok(Ok(pending)) => pending,
            Ok(Err(source)) => {
                return Err(AllocatorError::LedgerUnavailable {
                    address: address.to_string(),
                    source,
                });
            }
            Err(_) => {
                return Err(AllocatorError::LedgerUnavailable {
                    address: address.to_string(),
                    source: LedgerError::Timeout(self.lock_ttl),
                });
            }
        };

        let key = self.keys.nonce_key(address);
        let tracked = self.read_tracked(&key).await?;
        let nonce = next_nonce(pending, tracked);
        self.store.set(&key, &nonce.to_string()).await?;
        tracing::info!(
            monotonic_counter.nonces_issued = 1_u64,
            %address,
            pending,
            ?tracked,
            nonce,
            "issued nonce"
        );
        Ok(nonce)
    }

    async fn roll_back(
        &self,
        address: &CanonicalAddress,
        nonce: u64,
    ) -> Result<ReleaseOutcome, AllocatorError> {
        let key = self.keys.nonce_key(address);
        let outcome = match self.read_tracked(&key).await? {
            None => ReleaseOutcome::NotTracked,
            Some(tracked) if tracked != nonce => ReleaseOutcome::Stale { tracked },
            Some(0) => {
                self.store.delete(&key).await?;
                ReleaseOutcome::Cleared
            }
            Some(tracked) => {
                let tracked = tracked - 1;
                self.store.set(&key, &tracked.to_string()).await?;
                ReleaseOutcome::RolledBack { tracked }
            }
        };
        tracing::info!(
            monotonic_counter.nonces_released = 1_u64,
            %address,
            nonce,
            %outcome,
            "released nonce"
        );
        Ok(outcome)
    }

    async fn read_tracked(&self, key: &str) -> Result<Option<u64>, StoreError> {
        match self.store.get(key).await? {
            None => Ok(None),
            Some(value) => value
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| StoreError::InvalidValue {
                    key: key.to_string(),
                    value,
                }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::sync::Notify;

    const ADDR: &str = "0x742d35cc6634c0532925a3b844bc9e7595f0beb0";
    const TTL: Duration = Duration::from_secs(30);

    /// Ledger reporting a settable pending nonce.
    struct FixedLedger(AtomicU64);

    impl FixedLedger {
        fn new(pending: u64) -> Self {
            Self(AtomicU64::new(pending))
        }

        fn set(&self, pending: u64) {
            self.0.store(pending, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PendingNonceSource for FixedLedger {
        async fn pending_nonce(&self, _address: &str) -> Result<u64, LedgerError> {
            Ok(self.0.load(Ordering::SeqCst))
        }
    }

    struct FailingLedger;

    #[async_trait]
    impl PendingNonceSource for FailingLedger {
        async fn pending_nonce(&self, _address: &str) -> Result<u64, LedgerError> {
            Err(LedgerError::rpc(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "rpc down",
            )))
        }
    }

    /// Ledger that parks inside the critical section until released by the test.
    struct GatedLedger {
        pending: u64,
        entered: Notify,
        gate: Notify,
    }

    #[async_trait]
    impl PendingNonceSource for GatedLedger {
        async fn pending_nonce(&self, _address: &str) -> Result<u64, LedgerError> {
            self.entered.notify_one();
            self.gate.notified().await;
            Ok(self.pending)
        }
    }

    /// Ledger that overwrites the lock while the query runs, as if the lock had expired
    /// and been taken by another caller.
    struct TakeoverLedger {
        store: MemoryStore,
        lock_key: String,
    }

    #[async_trait]
    impl PendingNonceSource for TakeoverLedger {
        async fn pending_nonce(&self, _address: &str) -> Result<u64, LedgerError> {
            self.store
                .set(&self.lock_key, "intruder")
                .await
                .map_err(LedgerError::rpc)?;
            Ok(0)
        }
    }

    struct SlowLedger;

    #[async_trait]
    impl PendingNonceSource for SlowLedger {
        async fn pending_nonce(&self, _address: &str) -> Result<u64, LedgerError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(0)
        }
    }

    /// Store whose `set` fails, wrapping a working one for everything else.
    struct BrokenSetStore(MemoryStore);

    #[async_trait]
    impl NonceStore for BrokenSetStore {
        async fn set_if_not_exists(
            &self,
            key: &str,
            value: &str,
            ttl: Duration,
        ) -> Result<bool, StoreError> {
            self.0.set_if_not_exists(key, value, ttl).await
        }
        async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
            self.0.get(key).await
        }
        async fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
            Err(StoreError::backend(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "write failed",
            )))
        }
        async fn delete(&self, key: &str) -> Result<(), StoreError> {
            self.0.delete(key).await
        }
        async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
            self.0.compare_and_delete(key, expected).await
        }
    }

    struct UnreachableStore;

    #[async_trait]
    impl NonceStore for UnreachableStore {
        async fn set_if_not_exists(
            &self,
            _: &str,
            _: &str,
            _: Duration,
        ) -> Result<bool, StoreError> {
            Err(unreachable_error())
        }
        async fn get(&self, _: &str) -> Result<Option<String>, StoreError> {
            Err(unreachable_error())
        }
        async fn set(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Err(unreachable_error())
        }
        async fn delete(&self, _: &str) -> Result<(), StoreError> {
            Err(unreachable_error())
        }
    }

    fn unreachable_error() -> StoreError {
        StoreError::backend(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "store down",
        ))
    }

    fn allocator() -> NonceAllocator<MemoryStore> {
        NonceAllocator::new(MemoryStore::new(), TTL)
    }

    fn lock_key() -> String {
        format!("lock:{ADDR}")
    }

    fn nonce_key() -> String {
        format!("nonce:{ADDR}")
    }

    #[test]
    fn next_nonce_takes_the_larger_value() {
        assert_eq!(next_nonce(3, Some(10)), 11);
        assert_eq!(next_nonce(20, Some(5)), 20);
        assert_eq!(next_nonce(7, None), 7);
        assert_eq!(next_nonce(7, Some(6)), 7);
        assert_eq!(next_nonce(0, Some(u64::MAX)), u64::MAX);
    }

    #[tokio::test]
    async fn tracked_ahead_of_network_wins() {
        let allocator = allocator();
        allocator.confirm(ADDR, 10).await.unwrap();
        let nonce = allocator.acquire(ADDR, &FixedLedger::new(3)).await.unwrap();
        assert_eq!(nonce, 11);
    }

    #[tokio::test]
    async fn network_ahead_of_tracked_wins() {
        let allocator = allocator();
        allocator.confirm(ADDR, 5).await.unwrap();
        let nonce = allocator.acquire(ADDR, &FixedLedger::new(20)).await.unwrap();
        assert_eq!(nonce, 20);
        assert_eq!(allocator.tracked_nonce(ADDR).await.unwrap(), Some(20));
    }

    #[tokio::test]
    async fn sequential_acquisitions_increment() {
        let allocator = allocator();
        let ledger = FixedLedger::new(0);
        let mut issued = Vec::new();
        for _ in 0..4 {
            issued.push(allocator.acquire(ADDR, &ledger).await.unwrap());
        }
        assert_eq!(issued, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn released_nonce_is_reissued() {
        let allocator = allocator();
        let ledger = FixedLedger::new(0);
        for _ in 0..3 {
            allocator.acquire(ADDR, &ledger).await.unwrap();
        }
        let outcome = allocator.release(ADDR, 2).await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::RolledBack { tracked: 1 });
        assert_eq!(allocator.acquire(ADDR, &ledger).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn releasing_nonce_zero_clears_tracking() {
        let allocator = allocator();
        let ledger = FixedLedger::new(0);
        assert_eq!(allocator.acquire(ADDR, &ledger).await.unwrap(), 0);
        assert_eq!(allocator.release(ADDR, 0).await.unwrap(), ReleaseOutcome::Cleared);
        assert_eq!(allocator.tracked_nonce(ADDR).await.unwrap(), None);
        assert_eq!(allocator.acquire(ADDR, &ledger).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn release_without_tracking_is_noop() {
        let allocator = allocator();
        assert_eq!(
            allocator.release(ADDR, 4).await.unwrap(),
            ReleaseOutcome::NotTracked
        );
        assert_eq!(allocator.tracked_nonce(ADDR).await.unwrap(), None);
    }

    #[tokio::test]
    async fn stale_release_is_noop() {
        let allocator = allocator();
        let ledger = FixedLedger::new(0);
        for _ in 0..6 {
            allocator.acquire(ADDR, &ledger).await.unwrap();
        }
        let outcome = allocator.release(ADDR, 3).await.unwrap();
        assert_eq!(outcome, ReleaseOutcome::Stale { tracked: 5 });
        assert_eq!(allocator.tracked_nonce(ADDR).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn confirmed_nonce_is_never_reissued() {
        let allocator = allocator();
        let ledger = FixedLedger::new(0);
        let nonce = allocator.acquire(ADDR, &ledger).await.unwrap();
        allocator.confirm(ADDR, nonce).await.unwrap();
        assert_eq!(allocator.acquire(ADDR, &ledger).await.unwrap(), nonce + 1);
    }

    #[tokio::test]
    async fn reset_defers_to_network() {
        let allocator = allocator();
        let ledger = FixedLedger::new(0);
        for _ in 0..5 {
            allocator.acquire(ADDR, &ledger).await.unwrap();
        }
        allocator.reset_nonce(ADDR).await.unwrap();
        assert_eq!(allocator.tracked_nonce(ADDR).await.unwrap(), None);

        ledger.set(2);
        assert_eq!(allocator.acquire(ADDR, &ledger).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn reset_without_tracking_is_noop() {
        let allocator = allocator();
        allocator.reset_nonce(ADDR).await.unwrap();
        assert_eq!(allocator.tracked_nonce(ADDR).await.unwrap(), None);
    }

    #[tokio::test]
    async fn concurrent_acquire_hits_lock_contention() {
        let allocator = Arc::new(allocator());
        let gated = Arc::new(GatedLedger {
            pending: 7,
            entered: Notify::new(),
            gate: Notify::new(),
        });

        let first = tokio::spawn({
            let allocator = Arc::clone(&allocator);
            let gated = Arc::clone(&gated);
            async move { allocator.acquire(ADDR, &*gated).await }
        });
        gated.entered.notified().await;

        let second = allocator.acquire(ADDR, &FixedLedger::new(7)).await;
        assert!(matches!(
            second,
            Err(AllocatorError::LockContention { ref address }) if address == ADDR
        ));
        let release = allocator.release(ADDR, 7).await;
        assert!(matches!(release, Err(AllocatorError::LockContention { .. })));

        gated.gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), 7);
        assert_eq!(allocator.acquire(ADDR, &FixedLedger::new(7)).await.unwrap(), 8);
    }

    #[tokio::test]
    async fn different_addresses_do_not_contend() {
        let allocator = Arc::new(allocator());
        let gated = Arc::new(GatedLedger {
            pending: 1,
            entered: Notify::new(),
            gate: Notify::new(),
        });
        let first = tokio::spawn({
            let allocator = Arc::clone(&allocator);
            let gated = Arc::clone(&gated);
            async move { allocator.acquire(ADDR, &*gated).await }
        });
        gated.entered.notified().await;

        let other = "0x0000000000000000000000000000000000000001";
        assert_eq!(allocator.acquire(other, &FixedLedger::new(4)).await.unwrap(), 4);

        gated.gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), 1);
    }

    #[tokio::test]
    async fn ledger_failure_releases_lock() {
        let allocator = allocator();
        let err = allocator.acquire(ADDR, &FailingLedger).await.unwrap_err();
        assert!(matches!(
            err,
            AllocatorError::LedgerUnavailable {
                source: LedgerError::Rpc(_),
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(allocator.store().get(&lock_key()).await.unwrap(), None);
        assert_eq!(allocator.tracked_nonce(ADDR).await.unwrap(), None);

        assert_eq!(allocator.acquire(ADDR, &FixedLedger::new(9)).await.unwrap(), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ledger_is_cut_off_at_lock_ttl() {
        let allocator = allocator();
        let err = allocator.acquire(ADDR, &SlowLedger).await.unwrap_err();
        assert!(matches!(
            err,
            AllocatorError::LedgerUnavailable {
                source: LedgerError::Timeout(ttl),
                ..
            } if ttl == TTL
        ));
        assert_eq!(allocator.tracked_nonce(ADDR).await.unwrap(), None);
        assert_eq!(allocator.acquire(ADDR, &FixedLedger::new(1)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn store_failure_in_critical_section_releases_lock() {
        let inner = MemoryStore::new();
        let allocator = NonceAllocator::new(BrokenSetStore(inner.clone()), TTL);
        let err = allocator.acquire(ADDR, &FixedLedger::new(0)).await.unwrap_err();
        assert!(matches!(
            err,
            AllocatorError::StoreUnavailable(StoreError::Backend(_))
        ));
        assert_eq!(inner.get(&lock_key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unreachable_store_is_reported() {
        let allocator = NonceAllocator::new(UnreachableStore, TTL);
        let err = allocator.acquire(ADDR, &FixedLedger::new(0)).await.unwrap_err();
        assert!(matches!(err, AllocatorError::StoreUnavailable(_)));
        assert!(matches!(
            allocator.confirm(ADDR, 1).await,
            Err(AllocatorError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn foreign_lock_survives_cleanup() {
        let store = MemoryStore::new();
        let allocator = NonceAllocator::new(store.clone(), TTL);
        let ledger = TakeoverLedger {
            store: store.clone(),
            lock_key: lock_key(),
        };
        assert_eq!(allocator.acquire(ADDR, &ledger).await.unwrap(), 0);
        assert_eq!(
            store.get(&lock_key()).await.unwrap().as_deref(),
            Some("intruder")
        );
        assert_eq!(store.compare_and_delete_calls(), 1);
    }

    #[tokio::test]
    async fn fallback_cleanup_keeps_foreign_lock() {
        let store = MemoryStore::without_compare_and_delete();
        let allocator = NonceAllocator::new(store.clone(), TTL);
        let ledger = TakeoverLedger {
            store: store.clone(),
            lock_key: lock_key(),
        };
        assert_eq!(allocator.acquire(ADDR, &ledger).await.unwrap(), 0);
        assert_eq!(
            store.get(&lock_key()).await.unwrap().as_deref(),
            Some("intruder")
        );
    }

    #[tokio::test]
    async fn fallback_cleanup_releases_own_lock() {
        let store = MemoryStore::without_compare_and_delete();
        let allocator = NonceAllocator::new(store.clone(), TTL);
        assert_eq!(allocator.acquire(ADDR, &FixedLedger::new(0)).await.unwrap(), 0);
        assert_eq!(store.get(&lock_key()).await.unwrap(), None);
        assert_eq!(allocator.acquire(ADDR, &FixedLedger::new(0)).await.unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_lock_expires_after_ttl() {
        let store = MemoryStore::new();
        let allocator = NonceAllocator::new(store.clone(), TTL);
        // A crashed holder never cleaned up.
        store
            .set_if_not_exists(&lock_key(), "crashed", TTL)
            .await
            .unwrap();
        assert!(matches!(
            allocator.acquire(ADDR, &FixedLedger::new(0)).await,
            Err(AllocatorError::LockContention { .. })
        ));

        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        assert_eq!(allocator.acquire(ADDR, &FixedLedger::new(0)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn checksummed_and_lowercase_addresses_share_state() {
        let allocator = allocator();
        let ledger = FixedLedger::new(0);
        let checksummed = "0x742d35Cc6634C0532925a3b844Bc9e7595f0bEb0";
        assert_eq!(allocator.acquire(checksummed, &ledger).await.unwrap(), 0);
        assert_eq!(allocator.acquire(ADDR, &ledger).await.unwrap(), 1);
        assert_eq!(allocator.store().get(&nonce_key()).await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn key_prefix_isolates_streams() {
        let store = MemoryStore::new();
        let base = NonceAllocator::new(store.clone(), TTL).with_key_prefix("eip155:8453");
        let mainnet = NonceAllocator::new(store.clone(), TTL).with_key_prefix("eip155:1");
        let ledger = FixedLedger::new(0);

        assert_eq!(base.acquire(ADDR, &ledger).await.unwrap(), 0);
        assert_eq!(base.acquire(ADDR, &ledger).await.unwrap(), 1);
        assert_eq!(mainnet.acquire(ADDR, &ledger).await.unwrap(), 0);
        assert_eq!(
            store
                .get(&format!("eip155:8453:nonce:{ADDR}"))
                .await
                .unwrap()
                .as_deref(),
            Some("1")
        );
    }

    #[tokio::test]
    async fn corrupt_tracked_value_is_reported() {
        let allocator = allocator();
        allocator.store().set(&nonce_key(), "twelve").await.unwrap();
        let err = allocator.acquire(ADDR, &FixedLedger::new(0)).await.unwrap_err();
        assert!(matches!(
            err,
            AllocatorError::StoreUnavailable(StoreError::InvalidValue { .. })
        ));
        assert!(!err.is_retryable());
        assert_eq!(allocator.store().get(&lock_key()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn empty_address_is_rejected() {
        let allocator = allocator();
        assert!(matches!(
            allocator.acquire("  ", &FixedLedger::new(0)).await,
            Err(AllocatorError::InvalidAddress)
        ));
    }

    #[tokio::test]
    async fn allocator_from_config() {
        let config = AllocatorConfig {
            lock_ttl_ms: 1500,
            key_prefix: Some("eip155:10".to_string()),
        };
        let allocator = NonceAllocator::from_config(MemoryStore::new(), &config);
        assert_eq!(allocator.lock_ttl(), Duration::from_millis(1500));
        assert_eq!(allocator.keys().prefix(), Some("eip155:10"));
    }

    #[tokio::test]
    async fn zero_ttl_in_config_still_excludes_concurrent_callers() {
        let config = AllocatorConfig {
            lock_ttl_ms: 0,
            key_prefix: None,
        };
        let allocator = Arc::new(NonceAllocator::from_config(MemoryStore::new(), &config));
        assert!(!allocator.lock_ttl().is_zero());

        let gated = Arc::new(GatedLedger {
            pending: 0,
            entered: Notify::new(),
            gate: Notify::new(),
        });
        let first = tokio::spawn({
            let allocator = Arc::clone(&allocator);
            let gated = Arc::clone(&gated);
            async move { allocator.acquire(ADDR, &*gated).await }
        });
        gated.entered.notified().await;

        let second = allocator.acquire(ADDR, &FixedLedger::new(0)).await;
        assert!(matches!(second, Err(AllocatorError::LockContention { .. })));

        gated.gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), 0);
    }

    #[test]
    #[should_panic(expected = "nonce lock TTL must be positive")]
    fn zero_ttl_is_refused() {
        let _ = NonceAllocator::new(MemoryStore::new(), Duration::ZERO);
    }

    /// Collects the field names of every event, including `monotonic_counter.*` metrics.
    #[derive(Clone, Default)]
    struct EventFields(Arc<std::sync::Mutex<Vec<String>>>);

    impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for EventFields {
        fn on_event(
            &self,
            event: &tracing::Event<'_>,
            _ctx: tracing_subscriber::layer::Context<'_, S>,
        ) {
            let names = event.metadata().fields().iter().map(|f| f.name().to_string());
            self.0.lock().unwrap().extend(names);
        }
    }

    #[tokio::test]
    async fn allocator_events_carry_metric_counters() {
        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let fields = EventFields::default();
        let _guard = tracing_subscriber::registry()
            .with(fields.clone())
            .set_default();

        let allocator = allocator();
        let nonce = allocator.acquire(ADDR, &FixedLedger::new(2)).await.unwrap();
        allocator.release(ADDR, nonce).await.unwrap();
        allocator.store().set(&lock_key(), "someone-else").await.unwrap();
        assert!(allocator.acquire(ADDR, &FixedLedger::new(2)).await.is_err());

        let seen = fields.0.lock().unwrap().clone();
        for counter in [
            "monotonic_counter.nonces_issued",
            "monotonic_counter.nonces_released",
            "monotonic_counter.nonce_lock_contention",
        ] {
            assert!(seen.iter().any(|name| name == counter), "missing {counter}");
        }
    }
}
