//! Gateway address resolution (spec.md §6): the pool of candidate gateway
//! endpoints a transport may bind through, and the provider seam that lets
//! a deployment swap in service-discovery logic instead of the static list
//! drawn from [`crate::config::ClientConfig`].

use crate::error::ClientError;
use async_trait::async_trait;

/// Resolves the ordered set of candidate gateway endpoints a transport
/// should try during `Start`. Object-safe so the runtime can hold
/// `Arc<dyn GatewayListProvider>` and tests can substitute a fixed list.
#[async_trait]
pub trait GatewayListProvider: Send + Sync {
    async fn gateway_addresses(&self) -> Result<Vec<String>, ClientError>;
}

/// The default provider: the static list configured up front. Real
/// deployments that need DNS SRV lookups or a discovery service implement
/// [`GatewayListProvider`] themselves and wire it in at construction.
pub struct StaticGatewayListProvider {
    addresses: Vec<String>,
}

impl StaticGatewayListProvider {
    pub fn new(addresses: Vec<String>) -> Self {
        Self { addresses }
    }
}

#[async_trait]
impl GatewayListProvider for StaticGatewayListProvider {
    async fn gateway_addresses(&self) -> Result<Vec<String>, ClientError> {
        if self.addresses.is_empty() {
            return Err(ClientError::ConfigInvalid(
                "no gateway addresses configured".to_string(),
            ));
        }
        Ok(self.addresses.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_provider_returns_configured_addresses() {
        let provider = StaticGatewayListProvider::new(vec!["gw-1:5000".to_string()]);
        let addresses = provider.gateway_addresses().await.expect("addresses");
        assert_eq!(addresses, vec!["gw-1:5000".to_string()]);
    }

    #[tokio::test]
    async fn empty_list_is_a_config_error() {
        let provider = StaticGatewayListProvider::new(vec![]);
        assert!(matches!(
            provider.gateway_addresses().await,
            Err(ClientError::ConfigInvalid(_))
        ));
    }
}
