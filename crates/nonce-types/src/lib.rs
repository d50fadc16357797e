#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Shared seams for the distributed nonce allocator.
//!
//! The allocator itself is stateless: every bit of per-address state lives in a shared
//! key-value store, and the network's view of an address comes from a ledger query.
//! This crate defines both collaborators as traits so that store backends and chain
//! integrations can live in their own crates.
//!
//! # Modules
//!
//! - [`config`] - RPC configuration and environment variable resolution
//! - [`ledger`] - The [`PendingNonceSource`](ledger::PendingNonceSource) trait for querying
//!   the network
//! - [`store`] - The [`NonceStore`](store::NonceStore) trait for lock and nonce records

pub mod config;
pub mod ledger;
pub mod store;

pub use ledger::{LedgerError, PendingNonceSource};
pub use store::{NonceStore, StoreError};

/// Asynchronously constructs an instance of `Self` from a configuration type.
///
/// Store backends and ledger integrations implement this so that the binary can build
/// them straight out of the parsed configuration file.
///
/// Return an error if:
/// - Configuration values are invalid or missing
/// - Required external connections (RPC, Redis, etc.) cannot be established
#[async_trait::async_trait]
pub trait FromConfig<TConfig>
where
    Self: Sized,
{
    async fn from_config(config: &TConfig) -> Result<Self, Box<dyn std::error::Error>>;
}
