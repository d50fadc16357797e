//! Ledger seam: the network's view of an address.

use std::sync::Arc;
use std::time::Duration;

/// Errors reported while querying the ledger for a pending nonce.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    /// The RPC call failed.
    #[error("rpc error: {0}")]
    Rpc(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// The query did not finish before the allocator's lock deadline.
    #[error("pending nonce query timed out after {0:?}")]
    Timeout(Duration),
    /// The address is not valid for this ledger.
    #[error("invalid address {address:?}: {reason}")]
    InvalidAddress { address: String, reason: String },
}

impl LedgerError {
    pub fn rpc<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        LedgerError::Rpc(Box::new(error))
    }
}

/// Source of the network's pending nonce for an address.
///
/// The value is the next nonce the network expects, counting transactions that are still
/// pending in the mempool. Implementations must be idempotent and side-effect free.
#[async_trait::async_trait]
pub trait PendingNonceSource: Send + Sync {
    async fn pending_nonce(&self, address: &str) -> Result<u64, LedgerError>;
}

#[async_trait::async_trait]
impl<T: PendingNonceSource + ?Sized> PendingNonceSource for Arc<T> {
    async fn pending_nonce(&self, address: &str) -> Result<u64, LedgerError> {
        (**self).pending_nonce(address).await
    }
}
