//! Command dispatch for the `nonce-allocator` binary.
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` points at the JSON configuration file
//! - `RUST_LOG` sets the log level, `OTEL_*` variables enable export (with `telemetry`)

use clap::Parser;
use dotenvy::dotenv;
use nonce_allocator::{AllocatorError, NonceAllocator};
use nonce_chain_eip155::Eip155PendingNonce;
use nonce_store_redis::RedisStore;
use nonce_types::{FromConfig, StoreError};

use crate::config::{CliArgs, Command, Config};
use crate::telemetry::Telemetry;

/// `EX_TEMPFAIL` from `sysexits.h`.
pub const EXIT_TEMPFAIL: i32 = 75;

/// Runs one allocator command against the configured store.
///
/// Results go to stdout: `acquire` and `show` print a nonce (`show` prints `none` when the
/// address is untracked), `release` prints what happened to the tracked value.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    let args = CliArgs::parse();
    let _telemetry = Telemetry::init()?;

    let config = Config::load(&args.config)?;
    let store = RedisStore::from_config(config.store()).await?;
    let allocator = NonceAllocator::from_config(store, config.allocator());

    tracing::debug!(address = args.command.address(), command = ?args.command, "running command");
    match &args.command {
        Command::Acquire { address } => {
            let ledger = Eip155PendingNonce::from_config(config.ledger()?).await?;
            let nonce = allocator.acquire(address, &ledger).await?;
            println!("{nonce}");
        }
        Command::Confirm { address, nonce } => {
            allocator.confirm(address, *nonce).await?;
        }
        Command::Release { address, nonce } => {
            let outcome = allocator.release(address, *nonce).await?;
            println!("{outcome}");
        }
        Command::Reset { address } => {
            allocator.reset_nonce(address).await?;
        }
        Command::Show { address } => match allocator.tracked_nonce(address).await? {
            Some(nonce) => println!("{nonce}"),
            None => println!("none"),
        },
    }
    Ok(())
}

/// Process exit code for an error returned by [`run`].
///
/// Failures that may go away on their own (lock contention, an unreachable store or ledger)
/// map to [`EXIT_TEMPFAIL`], everything else to `1`.
pub fn exit_code(error: &(dyn std::error::Error + 'static)) -> i32 {
    let retryable = if let Some(e) = error.downcast_ref::<AllocatorError>() {
        e.is_retryable()
    } else if let Some(e) = error.downcast_ref::<StoreError>() {
        matches!(e, StoreError::Backend(_))
    } else {
        false
    };
    if retryable { EXIT_TEMPFAIL } else { 1 }
}
