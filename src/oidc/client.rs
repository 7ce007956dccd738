//! OIDC client
//!
//! Orchestrates the authorization code flow, RFC 8693 token exchange and
//! bearer-token validation for one configured provider registration.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use url::Url;

use super::pkce::{self, CodeChallengeMethod};
use super::session::SessionStorage;
use super::tokens::{AccessTokens, OidcTokens, TokenResponse};
use super::user_data::OidcUserData;
use super::well_known::{WellKnownConfiguration, WellKnownParser};
use crate::cache::{self, CacheBackend};
use crate::clock::Clock;
use crate::config::ClientConfig;
use crate::fetcher::{HttpResponse, HttpTransport, UrlFetcher};
use crate::jwt::{AdditionalTokenConstraints, ExpectedClaims, JwtHelper, ParsedJwt, ValidationError};
use crate::{Error, Result};

/// RFC 8693 grant type
pub const GRANT_TYPE_TOKEN_EXCHANGE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";

/// RFC 8693 subject token type for access tokens
pub const SUBJECT_TOKEN_TYPE_ACCESS_TOKEN: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Shared collaborators of every client built from one configuration
#[derive(Clone)]
pub struct OidcDependencies {
    /// Outbound HTTP
    pub transport: Arc<dyn HttpTransport>,
    /// Shared cache; `None` disables all caching
    pub cache: Option<Arc<dyn CacheBackend>>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

/// Options for [`OidcClient::generate_authorization_redirect`]
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRedirectOptions {
    /// Extra scopes; `openid` is always requested
    pub scopes: Vec<String>,
    /// OIDC `prompt` value
    pub prompt: Option<String>,
    /// Carry the remember-me choice through the round-trip
    pub remember_me: bool,
    /// Additional query parameters
    pub extra_params: Vec<(String, String)>,
}

/// Query parameters of the provider's redirect back to us
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallbackParams {
    /// Authorization code
    pub code: Option<String>,
    /// Echoed `state`
    pub state: Option<String>,
    /// OAuth error code
    pub error: Option<String>,
    /// OAuth error description
    pub error_description: Option<String>,
}

impl CallbackParams {
    /// Parse from a raw query string
    #[must_use]
    pub fn from_query(query: &str) -> Self {
        let mut params = Self::default();
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            let slot = match key.as_ref() {
                "code" => &mut params.code,
                "state" => &mut params.state,
                "error" => &mut params.error,
                "error_description" => &mut params.error_description,
                _ => continue,
            };
            *slot = Some(value.into_owned());
        }
        params
    }
}

/// Claims of a validated bearer token plus the identifier they name
#[derive(Debug, Clone)]
pub struct ResourceUserData {
    /// All token claims
    pub user_data: OidcUserData,
    /// Value of the identifier claim
    pub user_identifier: String,
}

#[derive(Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Client for one provider registration
pub struct OidcClient {
    name: String,
    config: ClientConfig,
    fetcher: UrlFetcher,
    jwt: JwtHelper,
    cache: Option<Arc<dyn CacheBackend>>,
    clock: Arc<dyn Clock>,
    well_known_parser: Option<Arc<dyn WellKnownParser>>,
}

impl OidcClient {
    /// Create a client named `name`
    #[must_use]
    pub fn new(name: impl Into<String>, config: ClientConfig, deps: OidcDependencies) -> Self {
        let fetcher = UrlFetcher::new(deps.transport, config.custom_client_headers.clone());
        let jwt = JwtHelper::new(
            fetcher.clone(),
            deps.cache.clone(),
            cache::positive_ttl(config.jwks_cache_time),
            deps.clock.clone(),
        );
        Self {
            name: name.into(),
            config,
            fetcher,
            jwt,
            cache: deps.cache,
            clock: deps.clock,
            well_known_parser: None,
        }
    }

    /// Run extra checks on every validated token
    #[must_use]
    pub fn with_additional_constraints(
        mut self,
        constraints: Arc<dyn AdditionalTokenConstraints>,
    ) -> Self {
        self.jwt = self.jwt.with_additional_constraints(constraints);
        self
    }

    /// Rewrite the discovery document before use
    #[must_use]
    pub fn with_well_known_parser(mut self, parser: Arc<dyn WellKnownParser>) -> Self {
        self.well_known_parser = Some(parser);
        self
    }

    /// Client name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Client settings
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Time source
    #[must_use]
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The provider's discovery document, from cache when possible
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationResolve`] when the document cannot be
    /// fetched or parsed.
    pub async fn well_known(&self) -> Result<WellKnownConfiguration> {
        let ttl = cache::positive_ttl(self.config.well_known_cache_time);
        let cache = ttl.and(self.cache.as_deref());
        let expires_at = cache::expiry_after(self.clock.now(), ttl.unwrap_or_default());
        let key = format!(
            "_oidc_gateway__well_known__{}",
            cache::sha256_hex(&self.config.well_known_url)
        );

        cache::read_through(
            cache,
            self.clock.as_ref(),
            &key,
            false,
            || self.fetch_well_known(),
            |_| expires_at,
        )
        .await
    }

    async fn fetch_well_known(&self) -> Result<WellKnownConfiguration> {
        let url = &self.config.well_known_url;
        debug!(client = %self.name, url = %url, "Fetching discovery document");

        let body = self
            .fetcher
            .fetch_url(url, &[])
            .await
            .map_err(|e| Error::resolve(format!("could not fetch {url}"), e))?;
        let mut document: Value = serde_json::from_str(&body)
            .map_err(|e| Error::resolve(format!("invalid JSON at {url}"), e.into()))?;
        if let Some(parser) = &self.well_known_parser {
            document = parser.parse(document);
        }
        serde_json::from_value(document)
            .map_err(|e| Error::resolve(format!("invalid discovery document at {url}"), e.into()))
    }

    /// JWKS location advertised by the provider
    ///
    /// # Errors
    ///
    /// See [`Self::well_known`].
    pub async fn jwks_uri(&self) -> Result<String> {
        Ok(self.well_known().await?.jwks_uri)
    }

    /// Build the authorization-endpoint URL and remember the one-time
    /// values needed to verify the callback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationResolve`] when discovery fails or
    /// [`Error::Url`] when the authorization endpoint is not a URL.
    pub async fn generate_authorization_redirect(
        &self,
        session: &SessionStorage,
        options: AuthorizationRedirectOptions,
    ) -> Result<Url> {
        let well_known = self.well_known().await?;
        let mut url = Url::parse(&well_known.authorization_endpoint)?;

        let mut scopes = vec!["openid".to_string()];
        for scope in options.scopes {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        let state = pkce::generate_random_string();
        let nonce = (!self.config.disable_nonce).then(pkce::generate_random_string);
        let method = self.config.code_challenge_method;
        let verifier = (method != CodeChallengeMethod::None).then(pkce::generate_code_verifier);

        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", &self.config.client_id)
                .append_pair("redirect_uri", &self.config.redirect_uri)
                .append_pair("scope", &scopes.join(" "))
                .append_pair("state", &state);
            if let Some(nonce) = &nonce {
                query.append_pair("nonce", nonce);
            }
            if let (Some(verifier), Some(param)) = (&verifier, method.as_param()) {
                if !well_known.supports_code_challenge_method(param) {
                    warn!(client = %self.name, method = param, "Provider does not advertise PKCE method");
                }
                if let Some(challenge) = method.challenge(verifier) {
                    query
                        .append_pair("code_challenge", &challenge)
                        .append_pair("code_challenge_method", param);
                }
            }
            if let Some(prompt) = &options.prompt {
                query.append_pair("prompt", prompt);
            }
            for (key, value) in &options.extra_params {
                query.append_pair(key, value);
            }
        }

        session.store_state(state);
        match nonce {
            Some(nonce) => session.store_nonce(nonce),
            None => session.clear_nonce(),
        }
        match verifier {
            Some(verifier) => session.store_code_verifier(verifier),
            None => session.clear_code_verifier(),
        }
        if options.remember_me {
            session.store_remember_me(true);
        } else {
            session.clear_remember_me();
        }

        debug!(client = %self.name, "Generated authorization redirect");
        Ok(url)
    }

    /// Complete the authorization code flow.
    ///
    /// The stored `state`, `nonce` and code verifier are consumed whether or
    /// not the callback succeeds.
    ///
    /// # Errors
    ///
    /// Every failure is reported as a single [`Error::Authentication`] whose
    /// source is the root cause.
    pub async fn authenticate(
        &self,
        session: &SessionStorage,
        callback: &CallbackParams,
    ) -> Result<OidcTokens> {
        self.complete_login(session, callback).await.map_err(|e| {
            warn!(client = %self.name, error = %e, "OIDC login failed");
            Error::authentication_failed(e)
        })
    }

    async fn complete_login(
        &self,
        session: &SessionStorage,
        callback: &CallbackParams,
    ) -> Result<OidcTokens> {
        let expected_state = session.take_state();
        let expected_nonce = session.take_nonce();
        let code_verifier = session.take_code_verifier();

        if let Some(error) = &callback.error {
            let detail = callback
                .error_description
                .as_deref()
                .map(|d| format!(": {d}"))
                .unwrap_or_default();
            return Err(Error::authentication(format!(
                "Authorization failed ({error}){detail}"
            )));
        }

        let (Some(expected), Some(received)) = (expected_state, callback.state.as_deref()) else {
            return Err(Error::authentication("Missing authorization state"));
        };
        if !bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
            return Err(Error::authentication("Invalid session state"));
        }

        let code = callback
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::authentication("Missing authorization code"))?;

        let well_known = self.well_known().await?;
        let mut form = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), self.config.redirect_uri.clone()),
        ];
        if let Some(verifier) = code_verifier {
            form.push(("code_verifier".to_string(), verifier));
        }

        let response = self.request_tokens(&well_known.token_endpoint, form).await?;
        let tokens = OidcTokens::from_response(response, self.clock.now())?;
        let id_token = self.validate_id_token(&well_known, tokens.id_token()).await?;

        if !self.config.disable_nonce {
            let matches = match (expected_nonce, id_token.claim_str("nonce")) {
                (Some(expected), Some(actual)) => {
                    bool::from(expected.as_bytes().ct_eq(actual.as_bytes()))
                }
                _ => false,
            };
            if !matches {
                return Err(ValidationError::NonceMismatch.into());
            }
        }

        info!(
            client = %self.name,
            sub = id_token.claim_str("sub").unwrap_or_default(),
            "OIDC login succeeded"
        );
        Ok(tokens)
    }

    /// Fetch the userinfo claims for `tokens`
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationResolve`] if the provider has no userinfo
    /// endpoint, or the HTTP/JSON error.
    pub async fn retrieve_user_info(&self, tokens: &AccessTokens) -> Result<OidcUserData> {
        let well_known = self.well_known().await?;
        let endpoint = well_known
            .userinfo_endpoint
            .ok_or_else(|| Error::ConfigurationResolve {
                message: "provider has no userinfo endpoint".to_string(),
                source: None,
            })?;

        let authorization = format!("Bearer {}", tokens.access_token());
        let body = self
            .fetcher
            .fetch_url(&endpoint, &[("Authorization", authorization.as_str())])
            .await?;
        let claims: Map<String, Value> = serde_json::from_str(&body)?;

        debug!(client = %self.name, claims = claims.len(), "Retrieved user info");
        Ok(OidcUserData::new(claims))
    }

    /// Exchange `access_token` for a token aimed at another scope/audience
    /// (RFC 8693). Never cached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TokenEndpoint`] when the provider refuses the
    /// exchange, or [`Error::InvalidTokenResponse`] for an unusable answer.
    pub async fn exchange_tokens(
        &self,
        access_token: &str,
        target_scope: Option<&str>,
        target_audience: Option<&str>,
        subject_token_type: &str,
    ) -> Result<AccessTokens> {
        let well_known = self.well_known().await?;
        let mut form = vec![
            ("grant_type".to_string(), GRANT_TYPE_TOKEN_EXCHANGE.to_string()),
            ("subject_token".to_string(), access_token.to_string()),
            ("subject_token_type".to_string(), subject_token_type.to_string()),
        ];
        if let Some(scope) = target_scope {
            form.push(("scope".to_string(), scope.to_string()));
        }
        if let Some(audience) = target_audience {
            form.push(("audience".to_string(), audience.to_string()));
        }

        debug!(
            client = %self.name,
            scope = target_scope.unwrap_or_default(),
            audience = target_audience.unwrap_or_default(),
            "Exchanging token"
        );
        let response = self.request_tokens(&well_known.token_endpoint, form).await?;
        AccessTokens::from_response(response, self.clock.now())
    }

    /// Obtain fresh tokens with a refresh token.
    ///
    /// An ID token in the response is validated (without a nonce).
    ///
    /// # Errors
    ///
    /// Token endpoint and validation errors.
    pub async fn refresh_tokens(&self, refresh_token: &str) -> Result<AccessTokens> {
        let well_known = self.well_known().await?;
        let form = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ];

        let response = self.request_tokens(&well_known.token_endpoint, form).await?;
        let tokens = AccessTokens::from_response(response, self.clock.now())?;
        if let Some(id_token) = tokens.id_token() {
            self.validate_id_token(&well_known, id_token).await?;
        }
        debug!(client = %self.name, "Refreshed tokens");
        Ok(tokens)
    }

    /// Build the RP-initiated logout URL
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigurationResolve`] if the provider has no
    /// end-session endpoint.
    pub async fn generate_end_session_redirect(
        &self,
        id_token_hint: Option<&str>,
        post_logout_redirect_uri: Option<&str>,
        extra_params: &[(String, String)],
    ) -> Result<Url> {
        let well_known = self.well_known().await?;
        let endpoint = well_known
            .end_session_endpoint
            .ok_or_else(|| Error::ConfigurationResolve {
                message: "provider has no end_session_endpoint".to_string(),
                source: None,
            })?;

        let mut url = Url::parse(&endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
            if let Some(uri) = post_logout_redirect_uri {
                query.append_pair("post_logout_redirect_uri", uri);
            }
            for (key, value) in extra_params {
                query.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// Validate a bearer token presented to this resource server.
    ///
    /// The expected audience is the configured `audience`, else the client id.
    ///
    /// # Errors
    ///
    /// [`Error::TokenValidation`] naming the failed constraint.
    pub async fn validate_access_token_resource_provider(&self, token: &str) -> Result<AccessTokens> {
        let well_known = self.well_known().await?;
        let expected = ExpectedClaims {
            issuer: well_known.issuer,
            audience: self
                .config
                .audience
                .clone()
                .unwrap_or_else(|| self.config.client_id.clone()),
            leeway: self.config.token_leeway_seconds,
        };

        let parsed = self
            .jwt
            .validate_token(token, &well_known.jwks_uri, &expected)
            .await?;
        Ok(AccessTokens::bearer(token, parsed.expires_at()))
    }

    /// Claims and user identifier of an already validated bearer token
    ///
    /// # Errors
    ///
    /// Returns [`Error::Authentication`] when the token lacks
    /// `identifier_property`.
    pub fn extract_user_data_from_access_token_resource_provider(
        &self,
        tokens: &AccessTokens,
        identifier_property: &str,
    ) -> Result<ResourceUserData> {
        let parsed = JwtHelper::parse_token(tokens.access_token())?;
        let user_data = OidcUserData::new(parsed.claims);
        let user_identifier = user_data
            .get_user_data_string(identifier_property)
            .ok_or_else(|| {
                Error::authentication(format!(
                    "Token does not contain the user identifier claim '{identifier_property}'"
                ))
            })?;

        debug!(client = %self.name, user = %user_identifier, "Extracted bearer token user");
        Ok(ResourceUserData {
            user_data,
            user_identifier,
        })
    }

    /// Decode the claims of an ID token obtained by [`Self::authenticate`]
    ///
    /// # Errors
    ///
    /// [`Error::TokenValidation`] if the token is malformed.
    pub fn id_token_user_data(&self, tokens: &OidcTokens) -> Result<OidcUserData> {
        let parsed = JwtHelper::parse_token(tokens.id_token())?;
        Ok(OidcUserData::new(parsed.claims))
    }

    async fn validate_id_token(
        &self,
        well_known: &WellKnownConfiguration,
        id_token: &str,
    ) -> Result<ParsedJwt> {
        let expected = ExpectedClaims {
            issuer: well_known.issuer.clone(),
            audience: self.config.client_id.clone(),
            leeway: self.config.token_leeway_seconds,
        };
        self.jwt
            .validate_token(id_token, &well_known.jwks_uri, &expected)
            .await
    }

    /// POST to the token endpoint with client credentials in the body
    async fn request_tokens(
        &self,
        token_endpoint: &str,
        mut form: Vec<(String, String)>,
    ) -> Result<TokenResponse> {
        form.push(("client_id".to_string(), self.config.client_id.clone()));
        if !self.config.client_secret.is_empty() {
            form.push(("client_secret".to_string(), self.config.client_secret.clone()));
        }

        let response = self.fetcher.post_form(token_endpoint, form).await?;
        if !response.is_success() {
            return Err(token_endpoint_error(&response, token_endpoint));
        }
        serde_json::from_str(&response.body).map_err(|e| Error::InvalidTokenResponse(e.to_string()))
    }
}

fn token_endpoint_error(response: &HttpResponse, url: &str) -> Error {
    match serde_json::from_str::<OAuthErrorBody>(&response.body) {
        Ok(body) => Error::TokenEndpoint {
            error: body.error,
            description: body.error_description,
        },
        Err(_) => Error::HttpStatus {
            status: response.status,
            url: url.to_string(),
        },
    }
}
