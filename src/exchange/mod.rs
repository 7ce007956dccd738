//! Cached RFC 8693 token exchange
//!
//! Three thin wrappers share [`CachedExchange`]: a plain exchange client, a
//! token factory and an HTTP client factory. Each reads the logged-in user's
//! access token from the session and exchanges it once per (token, scope,
//! audience) for as long as the exchanged token lives.

mod factory;

use std::sync::Arc;

use tracing::debug;

use crate::cache::{self, CacheBackend, sha256_hex, slug};
use crate::oidc::{AccessTokens, OidcClient, SUBJECT_TOKEN_TYPE_ACCESS_TOKEN, SessionStorage};
use crate::{Error, Result};

pub use factory::{OidcHttpClientFactory, OidcTokenFactory};

/// Memoizes exchanges for one client and target
pub struct CachedExchange {
    client: Arc<OidcClient>,
    component: &'static str,
    scope: Option<String>,
    audience: Option<String>,
    cache: Option<Arc<dyn CacheBackend>>,
    ttl: Option<std::time::Duration>,
}

impl CachedExchange {
    /// Exchange towards the client's configured `scope`/`audience`.
    ///
    /// `ttl_secs` applies when the provider reports no expiry; `None` or `0`
    /// disables caching.
    #[must_use]
    pub fn new(
        client: Arc<OidcClient>,
        component: &'static str,
        cache: Option<Arc<dyn CacheBackend>>,
        ttl_secs: Option<u64>,
    ) -> Self {
        let scope = client.config().scope.clone();
        let audience = client.config().audience.clone();
        Self {
            client,
            component,
            scope,
            audience,
            cache,
            ttl: cache::positive_ttl(ttl_secs),
        }
    }

    /// Underlying client
    #[must_use]
    pub fn client(&self) -> &Arc<OidcClient> {
        &self.client
    }

    /// Exchange `access_token`, reusing a live cached result
    ///
    /// # Errors
    ///
    /// Errors of [`OidcClient::exchange_tokens`]. Cache failures are logged
    /// and never returned.
    pub async fn exchange(&self, access_token: &str) -> Result<AccessTokens> {
        let scope = self.scope.as_deref();
        let audience = self.audience.as_deref();
        let cache = self.ttl.and(self.cache.as_deref());
        let clock = self.client.clock();
        let fallback_expiry = cache::expiry_after(clock.now(), self.ttl.unwrap_or_default());
        let key = token_exchange_cache_key(self.component, scope, audience, access_token);

        debug!(client = %self.client.name(), component = self.component, "Resolving exchanged token");
        cache::read_through(
            cache,
            clock.as_ref(),
            &key,
            false,
            || {
                self.client
                    .exchange_tokens(access_token, scope, audience, SUBJECT_TOKEN_TYPE_ACCESS_TOKEN)
            },
            |tokens: &AccessTokens| tokens.expiry().unwrap_or(fallback_expiry),
        )
        .await
    }

    /// Exchange the access token stored in `session`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] when the session holds no access
    /// token, otherwise as [`Self::exchange`].
    pub async fn exchange_from_session(&self, session: &SessionStorage) -> Result<AccessTokens> {
        let access_token = session
            .get_access_token()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::authentication("No access token in session"))?;
        self.exchange(&access_token).await
    }
}

/// Cache key for an exchanged token.
///
/// Slugs keep keys readable; the trailing fingerprint of the raw target keeps
/// targets whose slugs coincide apart.
#[must_use]
pub fn token_exchange_cache_key(
    component: &str,
    scope: Option<&str>,
    audience: Option<&str>,
    access_token: &str,
) -> String {
    let scope = scope.unwrap_or_default();
    let audience = audience.unwrap_or_default();
    let token_hash = sha256_hex(access_token);
    let target_hash = sha256_hex(&format!("{}:{scope}{audience}", scope.len()));

    format!(
        "_oidc_gateway_{component}__token_exchange__{}__{}__{token_hash}__{}__{}",
        slug(scope),
        slug(audience),
        &token_hash[..8],
        &target_hash[..8],
    )
}

/// Exchanges the session's access token on demand
pub struct TokenExchangeClient {
    exchange: CachedExchange,
}

impl TokenExchangeClient {
    /// Build over `client`, using its `token_exchange_cache_time`
    #[must_use]
    pub fn new(client: Arc<OidcClient>, cache: Option<Arc<dyn CacheBackend>>) -> Self {
        let ttl = client.config().token_exchange_cache_time;
        Self {
            exchange: CachedExchange::new(client, "token_exchange_client", cache, ttl),
        }
    }

    /// Exchanged access token for the session's user
    ///
    /// # Errors
    ///
    /// See [`CachedExchange::exchange_from_session`].
    pub async fn get_exchanged_access_token(&self, session: &SessionStorage) -> Result<String> {
        let tokens = self.exchange.exchange_from_session(session).await?;
        Ok(tokens.access_token().to_string())
    }

    /// Exchange an explicitly supplied access token
    ///
    /// # Errors
    ///
    /// See [`CachedExchange::exchange`].
    pub async fn exchange_access_token(&self, access_token: &str) -> Result<AccessTokens> {
        self.exchange.exchange(access_token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_deterministic_and_portable() {
        let a = token_exchange_cache_key("token_factory", Some("orders:read"), Some("api"), "tok");
        let b = token_exchange_cache_key("token_factory", Some("orders:read"), Some("api"), "tok");
        assert_eq!(a, b);
        assert!(a.starts_with("_oidc_gateway_token_factory__token_exchange__orders-read__api__"));
        assert!(cache::validate_key(&a).is_ok());
    }

    #[test]
    fn key_contains_full_token_hash_and_prefix() {
        let key = token_exchange_cache_key("c", None, None, "token");
        let hash = "3c469e9d6c5875d37a43f353d4f88e61fcf812c66eee3457465a40b0da4153e0";
        assert!(key.contains(&format!("__{hash}__3c469e9d__")));
    }

    #[test]
    fn targets_with_colliding_slugs_get_distinct_keys() {
        // Both audiences slug to "api-orders"
        let a = token_exchange_cache_key("c", None, Some("api://orders"), "tok");
        let b = token_exchange_cache_key("c", None, Some("api.orders"), "tok");
        assert_ne!(a, b);

        // Moving text between scope and audience must not collide either
        let c = token_exchange_cache_key("c", Some("ab"), Some("c"), "tok");
        let d = token_exchange_cache_key("c", Some("a"), Some("bc"), "tok");
        assert_ne!(c, d);
    }

    #[test]
    fn key_differs_per_component_and_token() {
        let base = token_exchange_cache_key("token_factory", None, Some("api"), "tok");
        assert_ne!(base, token_exchange_cache_key("http_client_factory", None, Some("api"), "tok"));
        assert_ne!(base, token_exchange_cache_key("token_factory", None, Some("api"), "other"));
    }
}
