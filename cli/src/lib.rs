//! Operator command line for the distributed nonce allocator.
//!
//! Wires a [`RedisStore`](nonce_store_redis::RedisStore) and an
//! [`Eip155PendingNonce`](nonce_chain_eip155::Eip155PendingNonce) ledger into a
//! [`NonceAllocator`](nonce_allocator::NonceAllocator) and exposes its operations as
//! subcommands. Useful for unsticking an address by hand: `show` it, `reset` it, or `release`
//! a nonce whose transaction was never sent.

pub mod config;
pub mod run;
pub mod telemetry;
