//! Command line and configuration file of the nonce allocator binary.

use clap::{Parser, Subcommand};
use nonce_allocator::AllocatorConfig;
use nonce_chain_eip155::Eip155LedgerConfig;
use nonce_store_redis::RedisStoreConfig;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// CLI arguments for the nonce allocator.
#[derive(Parser, Debug)]
#[command(name = "nonce-allocator")]
#[command(about = "Allocate, confirm, release and reset wallet nonces in a shared store")]
pub struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Allocate the next nonce for an address and print it
    Acquire { address: String },
    /// Record a nonce as broadcast
    Confirm { address: String, nonce: u64 },
    /// Hand back a nonce that was never broadcast
    Release { address: String, nonce: u64 },
    /// Forget the tracked nonce so the next acquisition trusts the network
    Reset { address: String },
    /// Print the tracked nonce, or `none`
    Show { address: String },
}

impl Command {
    pub fn address(&self) -> &str {
        match self {
            Command::Acquire { address }
            | Command::Confirm { address, .. }
            | Command::Release { address, .. }
            | Command::Reset { address }
            | Command::Show { address } => address,
        }
    }
}

/// Configuration file contents.
///
/// ```json
/// {
///   "allocator": { "lock_ttl_ms": 30000, "key_prefix": "eip155:8453" },
///   "store": { "url": "$REDIS_URL" },
///   "ledger": { "chain_id": 8453, "rpc": [{ "http": "$RPC_URL" }] }
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    allocator: AllocatorConfig,
    store: RedisStoreConfig,
    /// Only needed by `acquire`.
    #[serde(default)]
    ledger: Option<Eip155LedgerConfig>,
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
    #[error("Config file has no `ledger` section, which `acquire` needs")]
    MissingLedger,
}

impl Config {
    pub fn allocator(&self) -> &AllocatorConfig {
        &self.allocator
    }

    pub fn store(&self) -> &RedisStoreConfig {
        &self.store
    }

    pub fn ledger(&self) -> Result<&Eip155LedgerConfig, ConfigError> {
        self.ledger.as_ref().ok_or(ConfigError::MissingLedger)
    }

    /// Load configuration from a JSON file.
    ///
    /// `$VAR` references inside the file are resolved while parsing; missing allocator
    /// settings fall back to environment variables, then to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}
