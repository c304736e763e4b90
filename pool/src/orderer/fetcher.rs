//! Registry of connected orderer clients.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::{AppConfig, DistributionHandle};
use crate::error::{ConfigError, DispatchError};

use super::client::OrdererClient;

/// Owns one [`OrdererClient`] per configured orderer, keyed by name.
///
/// Built once at startup; the set of orderers never changes at runtime,
/// only their per-orderer capacity does.
#[derive(Debug)]
pub struct Fetcher {
    clients: HashMap<String, Arc<OrdererClient>>,
}

impl Fetcher {
    /// Dials every configured orderer and builds the registry. Any dial
    /// failure, an empty fleet, or missing TLS material aborts startup.
    pub async fn from_config(
        config: &AppConfig,
        rule: DistributionHandle,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut clients = HashMap::with_capacity(config.orderers.len());
        for endpoint in &config.orderers {
            let addr = endpoint.dial_addr(config.local);
            let client = OrdererClient::connect(
                &endpoint.name,
                &addr,
                config.default_capacity,
                Arc::clone(&rule),
            )
            .await
            .map_err(|e| ConfigError::OrdererUnreachable {
                orderer: endpoint.name.clone(),
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
            info!(orderer = %endpoint.name, addr = %addr, "connected orderer service");
            clients.insert(endpoint.name.clone(), Arc::new(client));
        }
        Ok(Self { clients })
    }

    /// Registry from pre-built clients. Test support.
    #[cfg(test)]
    pub(crate) fn from_clients(clients: impl IntoIterator<Item = Arc<OrdererClient>>) -> Self {
        Self {
            clients: clients
                .into_iter()
                .map(|c| (c.name().to_string(), c))
                .collect(),
        }
    }

    /// Looks up a client by orderer name.
    pub fn get(&self, name: &str) -> Option<Arc<OrdererClient>> {
        self.clients.get(name).map(Arc::clone)
    }

    /// Every connected client, in no particular order.
    pub fn all(&self) -> Vec<Arc<OrdererClient>> {
        self.clients.values().map(Arc::clone).collect()
    }

    /// Number of connected orderers.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the registry is empty. Never true after a successful
    /// [`Fetcher::from_config`].
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Updates the requested batch size for the named orderer.
    pub fn set_capacity(&self, name: &str, capacity: u32) -> Result<(), DispatchError> {
        match self.get(name) {
            Some(client) => {
                client.set_capacity(capacity);
                Ok(())
            }
            None => Err(DispatchError::UnknownOrderer(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{distribution_handle, DistributionRule, OrdererEndpoint};

    #[test]
    fn lookup_and_capacity_update() {
        let rule = distribution_handle(DistributionRule::AllToOne);
        let fetcher = Fetcher::from_clients([
            Arc::new(OrdererClient::detached("orderer0", 10, Arc::clone(&rule))),
            Arc::new(OrdererClient::detached("orderer1", 10, rule)),
        ]);

        assert_eq!(fetcher.len(), 2);
        assert!(fetcher.get("orderer0").is_some());
        assert!(fetcher.get("nobody").is_none());

        fetcher.set_capacity("orderer1", 42).unwrap();
        assert_eq!(fetcher.get("orderer1").unwrap().capacity(), 42);

        let err = fetcher.set_capacity("nobody", 1).unwrap_err();
        assert!(matches!(err, DispatchError::UnknownOrderer(_)));
    }

    #[tokio::test]
    async fn from_config_fails_fast_on_unreachable_orderer() {
        // Bind-then-drop guarantees a port with no listener.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let config = AppConfig {
            local: true,
            tls_enabled: false,
            req_timeout_secs: 1,
            default_capacity: 10,
            orderers: vec![OrdererEndpoint {
                name: "orderer0".into(),
                host: "127.0.0.1".into(),
                port,
                ca_cert: None,
            }],
        };
        let rule = distribution_handle(DistributionRule::AllToOne);
        let err = Fetcher::from_config(&config, rule).await.unwrap_err();
        assert!(matches!(err, ConfigError::OrdererUnreachable { .. }));
    }
}
