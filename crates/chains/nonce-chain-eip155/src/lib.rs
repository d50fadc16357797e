//! EIP-155 (EVM) ledger support for the distributed nonce allocator.
//!
//! This crate provides [`Eip155PendingNonce`], a
//! [`PendingNonceSource`](nonce_types::PendingNonceSource) that asks an EVM JSON-RPC endpoint
//! for the pending transaction count of an address.
//!
//! # Transports
//!
//! Every configured HTTP(S) endpoint gets its own rate-limited transport, and all of them
//! are combined behind a fallback layer, so a single flaky RPC provider does not stall
//! nonce allocation.
//!
//! # Example
//!
//! ```ignore
//! use nonce_chain_eip155::{Eip155LedgerConfig, Eip155PendingNonce};
//! use nonce_types::FromConfig;
//!
//! let ledger = Eip155PendingNonce::from_config(&config).await?;
//! let nonce = allocator.acquire("0x742d35cc6634c0532925a3b844bc9e7595f0beb0", &ledger).await?;
//! ```

pub mod config;
pub mod provider;

pub use config::*;
pub use provider::*;
