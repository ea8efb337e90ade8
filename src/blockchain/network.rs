use async_trait::async_trait;
use ethers::prelude::JsonRpcClient;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::U256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::core::errors::{HardwareWalletError, Result};

/// Source of the chain id a transaction is signed for.
#[async_trait]
pub trait ChainIdProvider: Send + Sync {
    async fn network_id(&self) -> Result<u64>;
}

#[async_trait]
impl<P: ChainIdProvider + ?Sized> ChainIdProvider for Arc<P> {
    async fn network_id(&self) -> Result<u64> {
        (**self).network_id().await
    }
}

#[async_trait]
impl<P: ChainIdProvider + ?Sized> ChainIdProvider for Box<P> {
    async fn network_id(&self) -> Result<u64> {
        (**self).network_id().await
    }
}

/// Chain id pinned by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedChainId(pub u64);

#[async_trait]
impl ChainIdProvider for FixedChainId {
    async fn network_id(&self) -> Result<u64> {
        Ok(self.0)
    }
}

/// Chain id fetched via `eth_chainId` on every call.
#[derive(Clone)]
pub struct RpcNetwork<P: JsonRpcClient + Clone = Http> {
    provider: Provider<P>,
}

impl RpcNetwork<Http> {
    pub fn new(rpc_url: &str, timeout: Duration) -> Result<Self> {
        let rpc_url_clean = rpc_url.trim();
        let parsed_url = reqwest::Url::parse(rpc_url_clean).map_err(|e| {
            HardwareWalletError::Config(format!("Invalid Ethereum RPC URL '{}': {}", rpc_url_clean, e))
        })?;

        info!("Using Ethereum RPC endpoint: {}", parsed_url);
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Ok(proxy) = std::env::var("HTTPS_PROXY").or_else(|_| std::env::var("HTTP_PROXY")) {
            if let Ok(p) = reqwest::Proxy::all(proxy) {
                builder = builder.proxy(p);
            }
        }
        let client = builder
            .build()
            .map_err(|e| HardwareWalletError::Network(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { provider: Provider::new(Http::new_with_client(parsed_url, client)) })
    }
}

impl<P: JsonRpcClient + Clone> RpcNetwork<P> {
    /// Wrap an existing provider, e.g. `Provider::mocked()` in tests.
    pub fn new_with_provider(provider: Provider<P>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<P> ChainIdProvider for RpcNetwork<P>
where
    P: JsonRpcClient + Clone + Send + Sync,
{
    async fn network_id(&self) -> Result<u64> {
        let chain_id = self
            .provider
            .get_chainid()
            .await
            .map_err(|e| HardwareWalletError::Network(format!("Failed to get chain ID: {}", e)))?;

        if chain_id > U256::from(u64::MAX) {
            return Err(HardwareWalletError::Network(format!("chain id out of range: {}", chain_id)));
        }
        debug!(chain_id = chain_id.low_u64(), "resolved chain id");
        Ok(chain_id.low_u64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::providers::MockProvider;

    #[tokio::test]
    async fn test_fixed_chain_id() {
        assert_eq!(FixedChainId(137).network_id().await.unwrap(), 137);
    }

    #[tokio::test]
    async fn test_rpc_chain_id_from_mock() {
        let (provider, mock) = Provider::mocked();
        mock.push::<U256, _>(U256::from(11_155_111u64)).unwrap();

        let network: RpcNetwork<MockProvider> = RpcNetwork::new_with_provider(provider);
        assert_eq!(network.network_id().await.unwrap(), 11_155_111);
    }

    #[tokio::test]
    async fn test_rpc_failure_maps_to_network_error() {
        // Empty mock: the request fails.
        let (provider, _mock) = Provider::mocked();
        let network = RpcNetwork::new_with_provider(provider);
        let err = network.network_id().await.unwrap_err();
        assert!(matches!(err, HardwareWalletError::Network(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(matches!(
            RpcNetwork::new("not a url", Duration::from_secs(1)),
            Err(HardwareWalletError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_boxed_provider() {
        let provider: Box<dyn ChainIdProvider> = Box::new(FixedChainId(1));
        assert_eq!(provider.network_id().await.unwrap(), 1);
    }
}
