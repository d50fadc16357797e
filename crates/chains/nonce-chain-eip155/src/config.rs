use nonce_types::config::RpcConfig;
use serde::{Deserialize, Serialize};

/// Configuration of the EVM pending nonce source.
///
/// Example JSON:
/// ```json
/// {
///   "chain_id": 8453,
///   "rpc": [
///     { "http": "$BASE_RPC_URL", "rate_limit": 25 },
///     { "http": "https://mainnet.base.org" }
///   ]
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Eip155LedgerConfig {
    /// Expected EIP-155 chain id. When set, the RPC is checked against it on startup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_id: Option<u64>,
    /// RPC endpoints, tried in order with fallback (required).
    pub rpc: Vec<RpcConfig>,
}

impl Eip155LedgerConfig {
    pub fn rpc(&self) -> &[RpcConfig] {
        &self.rpc
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }
}
