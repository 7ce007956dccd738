//! Token and HTTP client factories for calling downstream APIs
//! on behalf of the logged-in user.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{
    Client,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use tracing::debug;

use super::CachedExchange;
use crate::Result;
use crate::cache::CacheBackend;
use crate::config::HttpConfig;
use crate::oidc::{OidcClient, SessionStorage};

/// Hands out exchanged access tokens
pub struct OidcTokenFactory {
    exchange: CachedExchange,
}

impl OidcTokenFactory {
    /// Build over `client`, using its `token_factory_cache_time`
    #[must_use]
    pub fn new(client: Arc<OidcClient>, cache: Option<Arc<dyn CacheBackend>>) -> Self {
        let ttl = client.config().token_factory_cache_time;
        Self {
            exchange: CachedExchange::new(client, "token_factory", cache, ttl),
        }
    }

    /// Exchanged access token for the session's user
    ///
    /// # Errors
    ///
    /// See [`CachedExchange::exchange_from_session`].
    pub async fn get_access_token(&self, session: &SessionStorage) -> Result<String> {
        let tokens = self.exchange.exchange_from_session(session).await?;
        Ok(tokens.access_token().to_string())
    }
}

/// Builds `reqwest` clients that authenticate with an exchanged token
pub struct OidcHttpClientFactory {
    exchange: CachedExchange,
    timeout: Duration,
    user_agent: String,
}

impl OidcHttpClientFactory {
    /// Build over `client`, using its `http_client_factory_cache_time`
    #[must_use]
    pub fn new(
        client: Arc<OidcClient>,
        cache: Option<Arc<dyn CacheBackend>>,
        http: &HttpConfig,
    ) -> Self {
        let ttl = client.config().http_client_factory_cache_time;
        Self {
            exchange: CachedExchange::new(client, "http_client_factory", cache, ttl),
            timeout: http.timeout,
            user_agent: http.user_agent.clone(),
        }
    }

    /// Exchanged access token for the session's user
    ///
    /// # Errors
    ///
    /// See [`CachedExchange::exchange_from_session`].
    pub async fn get_access_token(&self, session: &SessionStorage) -> Result<String> {
        let tokens = self.exchange.exchange_from_session(session).await?;
        Ok(tokens.access_token().to_string())
    }

    /// A client sending `Authorization: Bearer <exchanged token>` on every
    /// request
    ///
    /// # Errors
    ///
    /// Exchange errors, or [`crate::Error::InvalidTokenResponse`] if the token
    /// cannot be carried in a header.
    pub async fn create_http_client_with_token(&self, session: &SessionStorage) -> Result<Client> {
        let token = self.get_access_token(session).await?;

        let mut value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
            crate::Error::InvalidTokenResponse(format!("token is not a valid header value: {e}"))
        })?;
        value.set_sensitive(true);
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value);

        debug!(client = %self.exchange.client().name(), "Building authenticated HTTP client");
        let client = Client::builder()
            .default_headers(headers)
            .timeout(self.timeout)
            .user_agent(&self.user_agent)
            .build()?;
        Ok(client)
    }
}
