use nonce_types::{LedgerError, StoreError};

/// Errors surfaced by [`NonceAllocator`](crate::NonceAllocator) operations.
///
/// A stale release is not an error; see [`ReleaseOutcome::Stale`](crate::ReleaseOutcome::Stale).
#[derive(Debug, thiserror::Error)]
pub enum AllocatorError {
    /// Another acquisition holds the lock for this address. Not retried internally.
    #[error("nonce lock for {address} is held by another caller")]
    LockContention { address: String },
    /// The pending nonce query failed. The lock has been released by the time this is returned.
    #[error("pending nonce query for {address} failed: {source}")]
    LedgerUnavailable {
        address: String,
        #[source]
        source: LedgerError,
    },
    /// The shared store is unreachable or returned unusable data.
    #[error("nonce store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("wallet address must not be empty")]
    InvalidAddress,
}

impl AllocatorError {
    /// Whether the whole operation can simply be attempted again later.
    pub fn is_retryable(&self) -> bool {
        match self {
            AllocatorError::LockContention { .. } => true,
            AllocatorError::LedgerUnavailable { source, .. } => {
                !matches!(source, LedgerError::InvalidAddress { .. })
            }
            AllocatorError::StoreUnavailable(StoreError::Backend(_)) => true,
            AllocatorError::StoreUnavailable(_) => false,
            AllocatorError::InvalidAddress => false,
        }
    }
}
