use std::sync::Arc;

use tracing::debug;

use super::resource::{required_bearer_token, resolve_bearer_user};
use super::{OidcUserProvider, Passport};
use crate::oidc::{OidcClient, SUBJECT_TOKEN_TYPE_ACCESS_TOKEN};
use crate::{Error, Result};

/// Authenticates API requests whose bearer token is meant for another
/// audience: the token is exchanged for one addressed to this service, and
/// the exchanged token is validated and resolved to a user.
pub struct TokenExchangeAuthenticator<P> {
    client: Arc<OidcClient>,
    provider: Arc<P>,
    user_identifier_property: String,
}

impl<P: OidcUserProvider> TokenExchangeAuthenticator<P> {
    /// Exchange towards `client`'s configured `scope` and `audience`
    #[must_use]
    pub fn new(client: Arc<OidcClient>, provider: Arc<P>) -> Self {
        let user_identifier_property = client.config().user_identifier_property.clone();
        Self {
            client,
            provider,
            user_identifier_property,
        }
    }

    /// Read the user identifier from `property` of the exchanged token
    #[must_use]
    pub fn with_user_identifier_property(mut self, property: impl Into<String>) -> Self {
        self.user_identifier_property = property.into();
        self
    }

    /// Whether the request presents a bearer token
    #[must_use]
    pub fn supports(&self, authorization: Option<&str>) -> bool {
        required_bearer_token(authorization).is_ok()
    }

    /// Exchange the bearer token, validate the result and resolve its user
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] when the header carries no bearer token, or
    /// wrapping the exchange, validation or user resolution failure.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Passport<P::User>> {
        let token = required_bearer_token(authorization)?;
        self.resolve(token)
            .await
            .map_err(Error::authentication_failed)
    }

    async fn resolve(&self, token: &str) -> Result<Passport<P::User>> {
        let config = self.client.config();
        let exchanged = self
            .client
            .exchange_tokens(
                token,
                config.scope.as_deref(),
                config.audience.as_deref(),
                SUBJECT_TOKEN_TYPE_ACCESS_TOKEN,
            )
            .await?;
        debug!(client = %self.client.name(), "Bearer token exchanged");

        let tokens = self
            .client
            .validate_access_token_resource_provider(exchanged.access_token())
            .await?;
        resolve_bearer_user(
            &self.client,
            self.provider.as_ref(),
            tokens,
            &self.user_identifier_property,
        )
        .await
    }
}
