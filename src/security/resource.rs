use std::sync::Arc;

use tracing::debug;

use super::{OidcUserProvider, Passport};
use crate::oidc::{AccessTokens, OidcClient};
use crate::{Error, Result};

/// Authenticates API requests carrying `Authorization: Bearer <jwt>`
pub struct ResourceProviderAuthenticator<P> {
    client: Arc<OidcClient>,
    provider: Arc<P>,
    user_identifier_property: String,
}

impl<P: OidcUserProvider> ResourceProviderAuthenticator<P> {
    /// Create an authenticator validating tokens for `client`
    #[must_use]
    pub fn new(client: Arc<OidcClient>, provider: Arc<P>) -> Self {
        let user_identifier_property = client.config().user_identifier_property.clone();
        Self {
            client,
            provider,
            user_identifier_property,
        }
    }

    /// Read the user identifier from `property` instead of the client's
    /// configured claim
    #[must_use]
    pub fn with_user_identifier_property(mut self, property: impl Into<String>) -> Self {
        self.user_identifier_property = property.into();
        self
    }

    /// Whether the request presents a bearer token
    #[must_use]
    pub fn supports(&self, authorization: Option<&str>) -> bool {
        authorization.is_some_and(|value| bearer_token(value).is_some())
    }

    /// Validate the bearer token and resolve its user
    ///
    /// # Errors
    ///
    /// [`Error::Authentication`] when the header carries no bearer token,
    /// or when validation or user resolution fails.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<Passport<P::User>> {
        let token = required_bearer_token(authorization)?;
        self.resolve(token)
            .await
            .map_err(Error::authentication_failed)
    }

    async fn resolve(&self, token: &str) -> Result<Passport<P::User>> {
        let tokens = self.client.validate_access_token_resource_provider(token).await?;
        resolve_bearer_user(
            &self.client,
            self.provider.as_ref(),
            tokens,
            &self.user_identifier_property,
        )
        .await
    }
}

/// Passport for an already validated bearer token
pub(super) async fn resolve_bearer_user<P: OidcUserProvider>(
    client: &OidcClient,
    provider: &P,
    tokens: AccessTokens,
    user_identifier_property: &str,
) -> Result<Passport<P::User>> {
    let extracted =
        client.extract_user_data_from_access_token_resource_provider(&tokens, user_identifier_property)?;

    provider
        .ensure_user_exists(&extracted.user_identifier, &extracted.user_data, &tokens)
        .await?;
    let user = provider.load_oidc_user(&extracted.user_identifier).await?;

    debug!(client = %client.name(), user = %extracted.user_identifier, "Bearer token accepted");
    Ok(Passport {
        user_identifier: extracted.user_identifier,
        user,
        tokens,
        user_data: extracted.user_data,
        remember_me: false,
    })
}

/// Bearer token of `authorization`, or the authentication error to report
pub(super) fn required_bearer_token(authorization: Option<&str>) -> Result<&str> {
    authorization
        .and_then(bearer_token)
        .ok_or_else(|| Error::authentication("Missing bearer token"))
}

/// Token part of a `Bearer` authorization value.
///
/// The header is trimmed first, so the token is never empty.
pub(super) fn bearer_token(value: &str) -> Option<&str> {
    value.trim().strip_prefix("Bearer ").map(str::trim)
}
