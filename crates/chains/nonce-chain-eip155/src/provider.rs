use alloy_primitives::Address;
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use nonce_types::config::RpcConfig;
use nonce_types::{FromConfig, LedgerError, PendingNonceSource};
use std::num::NonZeroUsize;
use std::str::FromStr;
use tower::ServiceBuilder;

use crate::config::Eip155LedgerConfig;

#[derive(Debug, thiserror::Error)]
pub enum Eip155LedgerError {
    #[error("no http(s) rpc endpoint configured")]
    NoHttpTransport,
    #[error("rpc reports chain id {actual}, expected {expected}")]
    ChainIdMismatch { expected: u64, actual: u64 },
}

/// Pending nonce source for EVM chains.
///
/// Answers with `eth_getTransactionCount(address, "pending")`, which counts transactions
/// still sitting in the mempool and therefore equals the next nonce the network will accept.
#[derive(Debug, Clone)]
pub struct Eip155PendingNonce {
    provider: RootProvider,
}

impl Eip155PendingNonce {
    /// Builds a JSON-RPC client over every HTTP(S) endpoint in `rpc`.
    ///
    /// Each endpoint is throttled to its configured `rate_limit` (requests per second,
    /// unlimited if absent); requests fall back across endpoints. Other URL schemes are
    /// skipped.
    pub fn rpc_client(rpc: &[RpcConfig]) -> Result<RpcClient, Eip155LedgerError> {
        let transports = rpc
            .iter()
            .filter_map(|provider_config| {
                let scheme = provider_config.http.scheme();
                let is_http = scheme == "http" || scheme == "https";
                if !is_http {
                    tracing::warn!(
                        rpc_url = %provider_config.http.inner(),
                        "Skipping non-HTTP RPC endpoint"
                    );
                    return None;
                }
                let rpc_url = provider_config.http.inner().clone();
                tracing::info!(
                    rpc_url = %rpc_url,
                    rate_limit = ?provider_config.rate_limit,
                    "Using HTTP transport"
                );
                let rate_limit = provider_config.rate_limit.unwrap_or(u32::MAX);
                let service = ServiceBuilder::new()
                    .layer(ThrottleLayer::new(rate_limit))
                    .service(Http::new(rpc_url));
                Some(service)
            })
            .collect::<Vec<_>>();
        let active =
            NonZeroUsize::new(transports.len()).ok_or(Eip155LedgerError::NoHttpTransport)?;
        let fallback = ServiceBuilder::new()
            .layer(FallbackLayer::default().with_active_transport_count(active))
            .service(transports);
        Ok(RpcClient::new(fallback, false))
    }

    pub fn new(rpc: &[RpcConfig]) -> Result<Self, Eip155LedgerError> {
        let client = Self::rpc_client(rpc)?;
        Ok(Self::from_provider(RootProvider::new(client)))
    }

    pub fn from_provider(provider: RootProvider) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &RootProvider {
        &self.provider
    }
}

#[async_trait::async_trait]
impl FromConfig<Eip155LedgerConfig> for Eip155PendingNonce {
    async fn from_config(config: &Eip155LedgerConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let ledger = Self::new(config.rpc())?;
        if let Some(expected) = config.chain_id() {
            let actual = ledger.provider.get_chain_id().await?;
            if actual != expected {
                return Err(Eip155LedgerError::ChainIdMismatch { expected, actual }.into());
            }
        }
        tracing::info!(
            chain_id = ?config.chain_id(),
            endpoints = config.rpc().len(),
            "Using EVM pending nonce source"
        );
        Ok(ledger)
    }
}

#[async_trait::async_trait]
impl PendingNonceSource for Eip155PendingNonce {
    async fn pending_nonce(&self, address: &str) -> Result<u64, LedgerError> {
        let parsed = Address::from_str(address).map_err(|e| LedgerError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
        tracing::trace!(address = %parsed, "fetching pending nonce");
        self.provider
            .get_transaction_count(parsed)
            .pending()
            .await
            .map_err(LedgerError::rpc)
    }
}
