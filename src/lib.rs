//! Distributed nonce allocation for wallets shared between processes.
//!
//! Every outgoing transaction from an address must carry the next nonce in sequence. When
//! several processes (API servers, workers, retry jobs) send from the same wallet, reading
//! the pending nonce from the network is not enough: two of them read the same value and
//! one transaction replaces or invalidates the other. This crate serializes nonce
//! acquisition per address through a lock held in a shared key-value store.
//!
//! # Overview
//!
//! [`NonceAllocator`] is the only component. It is generic over a
//! [`NonceStore`](nonce_types::NonceStore) and takes the ledger query as a
//! [`PendingNonceSource`](nonce_types::PendingNonceSource) per call. It holds no per-address
//! state, so any number of instances may run against the same store.
//!
//! Two records per address live in the store:
//!
//! - `lock:<address>` - owner token of the acquisition in flight, with a TTL
//! - `nonce:<address>` - the last nonce issued
//!
//! # Modules
//!
//! - [`allocator`] - [`NonceAllocator`] and the nonce reconciliation rule.
//! - [`config`] - Lock TTL and key prefix settings.
//! - [`error`] - [`AllocatorError`].
//! - [`keys`] - Store key layout and address canonicalization.
//! - [`lock`] - The per-address lock with compare-and-delete release.
//! - [`memory`] - An in-process [`NonceStore`](nonce_types::NonceStore).
//!
//! # Example
//!
//! ```ignore
//! use nonce_allocator::{MemoryStore, NonceAllocator};
//! use std::time::Duration;
//!
//! let allocator = NonceAllocator::new(MemoryStore::new(), Duration::from_secs(30));
//! let nonce = allocator.acquire("0x742d35cc6634c0532925a3b844bc9e7595f0beb0", &ledger).await?;
//! match broadcast(nonce).await {
//!     Ok(_) => allocator.confirm(address, nonce).await?,
//!     Err(_) => {
//!         allocator.release(address, nonce).await?;
//!     }
//! }
//! ```

pub mod allocator;
pub mod config;
pub mod error;
pub mod keys;
pub mod lock;
pub mod memory;

pub use allocator::{NonceAllocator, ReleaseOutcome, next_nonce};
pub use config::AllocatorConfig;
pub use error::AllocatorError;
pub use memory::MemoryStore;
pub use nonce_types;
