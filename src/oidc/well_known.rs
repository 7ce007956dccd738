//! OIDC discovery document (`/.well-known/openid-configuration`).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Rewrites the raw discovery document before it is deserialized.
///
/// Some providers publish non-conforming documents (wrong issuer casing,
/// endpoints behind an internal host name); a parser can patch them up.
pub trait WellKnownParser: Send + Sync {
    /// Transform the raw document
    fn parse(&self, document: Value) -> Value;
}

impl<F> WellKnownParser for F
where
    F: Fn(Value) -> Value + Send + Sync,
{
    fn parse(&self, document: Value) -> Value {
        self(document)
    }
}

/// Provider metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WellKnownConfiguration {
    /// Issuer identifier
    pub issuer: String,

    /// Authorization endpoint URL
    pub authorization_endpoint: String,

    /// Token endpoint URL
    pub token_endpoint: String,

    /// Userinfo endpoint (optional)
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,

    /// RP-initiated logout endpoint (optional)
    #[serde(default)]
    pub end_session_endpoint: Option<String>,

    /// JWKS URL
    pub jwks_uri: String,

    /// Supported scopes (may be string or array)
    #[serde(default, deserialize_with = "deserialize_scopes")]
    pub scopes_supported: Vec<String>,

    /// Supported PKCE code challenge methods
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// Deserialize scopes that may be either a space separated string or an array
fn deserialize_scopes<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(s.split_whitespace().map(String::from).collect()),
        StringOrVec::Vec(v) => Ok(v),
    }
}

impl WellKnownConfiguration {
    /// Whether the provider advertises `method` for PKCE.
    ///
    /// Providers that omit the field are assumed to support it.
    #[must_use]
    pub fn supports_code_challenge_method(&self, method: &str) -> bool {
        self.code_challenge_methods_supported.is_empty()
            || self
                .code_challenge_methods_supported
                .iter()
                .any(|m| m == method)
    }
}
