//! Token payloads returned by the provider's token endpoint.

use std::ops::Deref;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Raw token endpoint response, before any validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: Option<String>,
    /// Token type (usually "Bearer")
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<i64>,
    /// Refresh token
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OIDC ID token
    #[serde(default)]
    pub id_token: Option<String>,
    /// Granted scope
    #[serde(default)]
    pub scope: Option<String>,
    /// RFC 8693 issued token type
    #[serde(default)]
    pub issued_token_type: Option<String>,
}

/// Access token plus the metadata the provider returned with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokens {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    id_token: Option<String>,
}

impl AccessTokens {
    /// Build from a token endpoint response received at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTokenResponse`] when `access_token` is missing
    /// or empty. An `expires_in` beyond the representable range is treated as
    /// unreported.
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self> {
        let access_token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::InvalidTokenResponse("missing access_token".to_string()))?;

        Ok(Self {
            access_token,
            refresh_token: response.refresh_token,
            expiry: response
                .expires_in
                .and_then(Duration::try_seconds)
                .and_then(|lifetime| now.checked_add_signed(lifetime)),
            token_type: response.token_type,
            scope: response.scope,
            id_token: response.id_token.filter(|t| !t.is_empty()),
        })
    }

    /// Wrap a bearer token whose lifetime is already known.
    #[must_use]
    pub fn bearer(access_token: impl Into<String>, expiry: Option<DateTime<Utc>>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expiry,
            token_type: Some("Bearer".to_string()),
            scope: None,
            id_token: None,
        }
    }

    /// The access token
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// The refresh token, if issued
    #[must_use]
    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    /// Absolute expiry, if the provider reported a lifetime
    #[must_use]
    pub fn expiry(&self) -> Option<DateTime<Utc>> {
        self.expiry
    }

    /// Token type
    #[must_use]
    pub fn token_type(&self) -> Option<&str> {
        self.token_type.as_deref()
    }

    /// Granted scope
    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// ID token, when the response happened to carry one
    #[must_use]
    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    /// Whether the token has expired at `now`
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|expiry| expiry <= now)
    }
}

/// Tokens from a login: access tokens plus a mandatory ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "AccessTokens", into = "AccessTokens")]
pub struct OidcTokens {
    tokens: AccessTokens,
}

impl OidcTokens {
    /// Build from a token endpoint response received at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTokenResponse`] when the response carries no
    /// `id_token` or no `access_token`.
    pub fn from_response(response: TokenResponse, now: DateTime<Utc>) -> Result<Self> {
        AccessTokens::from_response(response, now)?.try_into()
    }

    /// The ID token
    #[must_use]
    pub fn id_token(&self) -> &str {
        self.tokens.id_token.as_deref().unwrap_or_default()
    }

    /// Access-token view of these tokens
    #[must_use]
    pub fn as_access_tokens(&self) -> &AccessTokens {
        &self.tokens
    }

    /// Drop the ID-token guarantee
    #[must_use]
    pub fn into_access_tokens(self) -> AccessTokens {
        self.tokens
    }
}

impl TryFrom<AccessTokens> for OidcTokens {
    type Error = Error;

    fn try_from(tokens: AccessTokens) -> Result<Self> {
        if tokens.id_token.is_none() {
            return Err(Error::InvalidTokenResponse("missing id_token".to_string()));
        }
        Ok(Self { tokens })
    }
}

impl From<OidcTokens> for AccessTokens {
    fn from(tokens: OidcTokens) -> Self {
        tokens.tokens
    }
}

impl Deref for OidcTokens {
    type Target = AccessTokens;

    fn deref(&self) -> &AccessTokens {
        &self.tokens
    }
}
