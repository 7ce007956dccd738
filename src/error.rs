//! Error types for the OIDC gateway

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

use crate::cache::CacheError;
use crate::jwt::ValidationError;

/// Result type alias for the OIDC gateway
pub type Result<T> = std::result::Result<T, Error>;

/// OIDC gateway errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Discovery document or JWKS could not be fetched or parsed
    #[error("Failed to resolve OIDC configuration: {message}")]
    ConfigurationResolve {
        /// What was being resolved
        message: String,
        /// Underlying failure
        #[source]
        source: Option<Box<Error>>,
    },

    /// A JWT failed validation
    #[error("Token validation failed: {0}")]
    TokenValidation(#[from] ValidationError),

    /// Login or bearer authentication failed
    #[error("{message}")]
    Authentication {
        /// Human-readable reason
        message: String,
        /// Root cause, when the failure came from a lower layer
        #[source]
        source: Option<Box<Error>>,
    },

    /// Cache backend failure
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// Unknown named client or factory
    #[error("OIDC client not found: {0}")]
    ClientNotFound(String),

    /// Token endpoint answered with a payload we cannot use
    #[error("Invalid token response: {0}")]
    InvalidTokenResponse(String),

    /// Token endpoint answered with an OAuth error
    #[error("Token endpoint error: {error}{}", .description.as_deref().map(|d| format!(" ({d})")).unwrap_or_default())]
    TokenEndpoint {
        /// OAuth `error` code
        error: String,
        /// OAuth `error_description`
        description: Option<String>,
    },

    /// Upstream answered with a non-success status
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Status code
        status: u16,
        /// Requested URL
        url: String,
    },

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL error
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Create an authentication error without an underlying cause
    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap a lower-level failure into a single authentication error.
    ///
    /// Authentication errors pass through unchanged so the root cause is
    /// never buried under two identical layers.
    #[must_use]
    pub fn authentication_failed(cause: Self) -> Self {
        match cause {
            Self::Authentication { .. } => cause,
            other => Self::Authentication {
                message: "OIDC authentication failed".to_string(),
                source: Some(Box::new(other)),
            },
        }
    }

    /// Create a configuration-resolve error wrapping `cause`
    pub fn resolve(message: impl Into<String>, cause: Self) -> Self {
        Self::ConfigurationResolve {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// The wrapped lower-level error, if any
    #[must_use]
    pub fn cause(&self) -> Option<&Self> {
        match self {
            Self::Authentication { source, .. } | Self::ConfigurationResolve { source, .. } => {
                source.as_deref()
            }
            _ => None,
        }
    }

    /// Map to the HTTP status a caller should answer with
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Authentication { .. } | Self::TokenValidation(_) => StatusCode::UNAUTHORIZED,
            Self::ConfigurationResolve { .. }
            | Self::TokenEndpoint { .. }
            | Self::InvalidTokenResponse(_)
            | Self::HttpStatus { .. }
            | Self::Http(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "OIDC request failed");
        }
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;

    use super::*;

    #[test]
    fn authentication_failed_wraps_root_cause() {
        let err = Error::authentication_failed(Error::InvalidTokenResponse("no id_token".into()));

        assert!(matches!(err, Error::Authentication { .. }));
        assert_eq!(err.to_string(), "OIDC authentication failed");
        assert!(matches!(err.cause(), Some(Error::InvalidTokenResponse(_))));
        let source = err.source().expect("root cause kept");
        assert_eq!(source.to_string(), "Invalid token response: no id_token");
    }

    #[test]
    fn authentication_failed_does_not_double_wrap() {
        let err = Error::authentication_failed(Error::authentication("Invalid session state"));

        assert_eq!(err.to_string(), "Invalid session state");
        assert!(err.source().is_none());
    }

    #[test]
    fn token_endpoint_error_renders_description() {
        let err = Error::TokenEndpoint {
            error: "invalid_grant".into(),
            description: Some("code expired".into()),
        };
        assert_eq!(err.to_string(), "Token endpoint error: invalid_grant (code expired)");

        let bare = Error::TokenEndpoint {
            error: "invalid_grant".into(),
            description: None,
        };
        assert_eq!(bare.to_string(), "Token endpoint error: invalid_grant");
    }

    #[test]
    fn status_codes_follow_error_class() {
        assert_eq!(Error::authentication("x").status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            Error::TokenValidation(ValidationError::MissingKeyId).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            Error::ClientNotFound("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::HttpStatus {
                status: 500,
                url: "https://idp".into()
            }
            .status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
