use std::sync::Arc;

use tracing::{debug, info};
use url::Url;

use super::{OidcUserProvider, Passport};
use crate::oidc::{
    AuthorizationRedirectOptions, CallbackParams, OidcClient, OidcTokens, OidcUserData,
    SessionStorage,
};
use crate::{Error, Result};

/// Completes browser logins at the client's callback path
pub struct OidcAuthenticator<P> {
    client: Arc<OidcClient>,
    provider: Arc<P>,
}

impl<P: OidcUserProvider> OidcAuthenticator<P> {
    /// Create an authenticator for `client`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when userinfo retrieval is disabled but the
    /// identifier is not taken from the ID token.
    pub fn new(client: Arc<OidcClient>, provider: Arc<P>) -> Result<Self> {
        let config = client.config();
        if !config.enable_retrieve_user_info && !config.user_identifier_from_id_token {
            return Err(Error::Config(format!(
                "client '{}': user_identifier_from_id_token must be enabled when \
                 enable_retrieve_user_info is disabled",
                client.name()
            )));
        }
        Ok(Self { client, provider })
    }

    /// Whether this request is a provider callback we should handle
    #[must_use]
    pub fn supports(&self, path: &str, callback: &CallbackParams) -> bool {
        path == self.client.config().login_check_path
            && callback.state.is_some()
            && (callback.code.is_some() || callback.error.is_some())
    }

    /// Redirect options for a login start request with query `query`.
    ///
    /// Remember-me is requested when the configured parameter is truthy.
    #[must_use]
    pub fn redirect_options(&self, query: &str) -> AuthorizationRedirectOptions {
        let parameter = &self.client.config().remember_me_parameter;
        let remember_me = url::form_urlencoded::parse(query.as_bytes())
            .find(|(key, _)| key == parameter.as_str())
            .is_some_and(|(_, value)| matches!(value.as_ref(), "1" | "true" | "on" | "yes"));

        AuthorizationRedirectOptions {
            remember_me,
            ..Default::default()
        }
    }

    /// Start a login: returns the URL to redirect the browser to
    ///
    /// # Errors
    ///
    /// See [`OidcClient::generate_authorization_redirect`].
    pub async fn start(&self, session: &SessionStorage, query: &str) -> Result<Url> {
        self.client
            .generate_authorization_redirect(session, self.redirect_options(query))
            .await
    }

    /// Finish a login and resolve the user.
    ///
    /// The remember-me flag is moved from the session into the passport;
    /// the tokens obtained are stored in the session.
    ///
    /// # Errors
    ///
    /// A single [`Error::Authentication`] wrapping the root cause.
    pub async fn authenticate(
        &self,
        session: &SessionStorage,
        callback: &CallbackParams,
    ) -> Result<Passport<P::User>> {
        let tokens = self.client.authenticate(session, callback).await?;

        let resolved = self
            .resolve_user(&tokens)
            .await
            .map_err(Error::authentication_failed);
        let remember_me = session.get_remember_me();
        session.clear_remember_me();
        let (user_identifier, user, user_data) = resolved?;

        session.store_access_token(tokens.access_token().to_string());
        match tokens.refresh_token() {
            Some(refresh_token) => session.store_refresh_token(refresh_token.to_string()),
            None => session.clear_refresh_token(),
        }

        info!(client = %self.client.name(), user = %user_identifier, remember_me, "User logged in");
        Ok(Passport {
            user_identifier,
            user,
            tokens: tokens.into_access_tokens(),
            user_data,
            remember_me,
        })
    }

    async fn resolve_user(&self, tokens: &OidcTokens) -> Result<(String, P::User, OidcUserData)> {
        let config = self.client.config();
        let id_token_data = self.client.id_token_user_data(tokens)?;
        let user_data = if config.enable_retrieve_user_info {
            self.client.retrieve_user_info(tokens).await?
        } else {
            id_token_data.clone()
        };

        let identifier_source = if config.user_identifier_from_id_token {
            &id_token_data
        } else {
            &user_data
        };
        let property = &config.user_identifier_property;
        let user_identifier = identifier_source
            .get_user_data_string(property)
            .ok_or_else(|| {
                Error::authentication(format!("User data does not contain the claim '{property}'"))
            })?;

        debug!(client = %self.client.name(), user = %user_identifier, "Provisioning user");
        self.provider
            .ensure_user_exists(&user_identifier, &user_data, tokens)
            .await?;
        let user = self.provider.load_oidc_user(&user_identifier).await?;
        Ok((user_identifier, user, user_data))
    }
}
