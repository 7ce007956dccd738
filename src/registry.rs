//! Named clients and their exchange wrappers
//!
//! Everything is built once from [`Config`] at startup; lookups never
//! construct anything and fail fast on unknown names.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::exchange::{OidcHttpClientFactory, OidcTokenFactory, TokenExchangeClient};
use crate::oidc::{OidcClient, OidcDependencies};
use crate::{Error, Result};

/// Name of the client used when a lookup names none
pub const DEFAULT_CLIENT: &str = "default";

/// Dependencies shared by every registered client
pub type RegistryDependencies = OidcDependencies;

struct RegisteredClient {
    client: Arc<OidcClient>,
    token_exchange: Arc<TokenExchangeClient>,
    token_factory: Option<Arc<OidcTokenFactory>>,
    http_client_factory: Option<Arc<OidcHttpClientFactory>>,
}

/// Lookup of configured clients by name
pub struct OidcRegistry {
    default_client: String,
    clients: BTreeMap<String, RegisteredClient>,
}

impl OidcRegistry {
    /// Build every configured client and wrapper
    ///
    /// # Errors
    ///
    /// Returns [`Error::ClientNotFound`] when the configured default client
    /// does not exist, or [`Error::Config`] for an invalid client.
    pub fn from_config(config: &Config, deps: &RegistryDependencies) -> Result<Self> {
        Self::from_config_with(config, deps, |client| client)
    }

    /// Like [`Self::from_config`], letting `customize` attach constraint
    /// providers or discovery parsers to each client before it is shared.
    ///
    /// # Errors
    ///
    /// See [`Self::from_config`].
    pub fn from_config_with<F>(
        config: &Config,
        deps: &RegistryDependencies,
        mut customize: F,
    ) -> Result<Self>
    where
        F: FnMut(OidcClient) -> OidcClient,
    {
        config.validate()?;

        let mut clients = BTreeMap::new();
        for (name, client_config) in &config.clients {
            let client = Arc::new(customize(OidcClient::new(
                name.clone(),
                client_config.clone(),
                deps.clone(),
            )));

            let token_exchange = Arc::new(TokenExchangeClient::new(client.clone(), deps.cache.clone()));
            let token_factory = client_config
                .enable_token_factory
                .then(|| Arc::new(OidcTokenFactory::new(client.clone(), deps.cache.clone())));
            let http_client_factory = client_config.enable_http_client.then(|| {
                Arc::new(OidcHttpClientFactory::new(
                    client.clone(),
                    deps.cache.clone(),
                    &config.http,
                ))
            });

            info!(
                client = %name,
                token_factory = token_factory.is_some(),
                http_client_factory = http_client_factory.is_some(),
                "Registered OIDC client"
            );
            clients.insert(
                name.clone(),
                RegisteredClient {
                    client,
                    token_exchange,
                    token_factory,
                    http_client_factory,
                },
            );
        }

        Ok(Self {
            default_client: config.default_client.clone(),
            clients,
        })
    }

    /// Name used for `None` lookups
    #[must_use]
    pub fn default_client_name(&self) -> &str {
        &self.default_client
    }

    /// Registered client names
    pub fn client_names(&self) -> impl Iterator<Item = &str> {
        self.clients.keys().map(String::as_str)
    }

    fn entry(&self, name: Option<&str>) -> Result<(&str, &RegisteredClient)> {
        let name = name.unwrap_or(&self.default_client);
        self.clients
            .get_key_value(name)
            .map(|(k, v)| (k.as_str(), v))
            .ok_or_else(|| Error::ClientNotFound(name.to_string()))
    }

    /// Client `name`, or the default client
    ///
    /// # Errors
    ///
    /// [`Error::ClientNotFound`] for unknown names.
    pub fn client(&self, name: Option<&str>) -> Result<Arc<OidcClient>> {
        Ok(self.entry(name)?.1.client.clone())
    }

    /// Token-exchange client of `name`
    ///
    /// # Errors
    ///
    /// [`Error::ClientNotFound`] for unknown names.
    pub fn token_exchange_client(&self, name: Option<&str>) -> Result<Arc<TokenExchangeClient>> {
        Ok(self.entry(name)?.1.token_exchange.clone())
    }

    /// Token factory of `name`
    ///
    /// # Errors
    ///
    /// [`Error::ClientNotFound`] for unknown names or when the client has no
    /// token factory enabled.
    pub fn token_factory(&self, name: Option<&str>) -> Result<Arc<OidcTokenFactory>> {
        let (key, entry) = self.entry(name)?;
        entry
            .token_factory
            .clone()
            .ok_or_else(|| Error::ClientNotFound(format!("{key} (token factory not enabled)")))
    }

    /// HTTP client factory of `name`
    ///
    /// # Errors
    ///
    /// [`Error::ClientNotFound`] for unknown names or when the client has no
    /// HTTP client factory enabled.
    pub fn http_client_factory(&self, name: Option<&str>) -> Result<Arc<OidcHttpClientFactory>> {
        let (key, entry) = self.entry(name)?;
        entry
            .http_client_factory
            .clone()
            .ok_or_else(|| Error::ClientNotFound(format!("{key} (HTTP client factory not enabled)")))
    }
}
