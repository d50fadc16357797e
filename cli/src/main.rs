//! Operator entrypoint for the distributed nonce allocator.
//!
//! Exit codes: `0` on success, `75` (`EX_TEMPFAIL`) when the failure is worth retrying
//! (lock contention, an unreachable store or ledger), `1` otherwise.

use nonce_allocator_cli::run::{exit_code, run};
use std::process;

#[tokio::main]
async fn main() {
    let result = run().await;
    if let Err(e) = result {
        eprintln!("{e}");
        process::exit(exit_code(e.as_ref()))
    }
}
