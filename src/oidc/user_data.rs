//! Flat claim mapping from the userinfo endpoint or a validated token.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// User claims
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OidcUserData {
    claims: Map<String, Value>,
}

impl OidcUserData {
    /// Wrap a claim map
    #[must_use]
    pub fn new(claims: Map<String, Value>) -> Self {
        Self { claims }
    }

    /// Raw claim value
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    /// Claim rendered as a string.
    ///
    /// Numbers are stringified so numeric subject ids still identify a user;
    /// other non-string values yield `None`.
    #[must_use]
    pub fn get_user_data_string(&self, key: &str) -> Option<String> {
        match self.claims.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Boolean claim
    #[must_use]
    pub fn get_user_data_bool(&self, key: &str) -> Option<bool> {
        self.claims.get(key).and_then(Value::as_bool)
    }

    /// Array-of-strings claim; a single string becomes a one-element list
    #[must_use]
    pub fn get_user_data_array(&self, key: &str) -> Vec<String> {
        match self.claims.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// `sub`
    #[must_use]
    pub fn sub(&self) -> Option<String> {
        self.get_user_data_string("sub")
    }

    /// `email`
    #[must_use]
    pub fn email(&self) -> Option<String> {
        self.get_user_data_string("email")
    }

    /// `email_verified`, false when absent
    #[must_use]
    pub fn email_verified(&self) -> bool {
        self.get_user_data_bool("email_verified").unwrap_or(false)
    }

    /// `given_name`
    #[must_use]
    pub fn given_name(&self) -> Option<String> {
        self.get_user_data_string("given_name")
    }

    /// `family_name`
    #[must_use]
    pub fn family_name(&self) -> Option<String> {
        self.get_user_data_string("family_name")
    }

    /// `name`, or given + family name when the provider omits it
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        self.get_user_data_string("name").or_else(|| {
            match (self.given_name(), self.family_name()) {
                (Some(g), Some(f)) => Some(format!("{g} {f}")),
                (Some(g), None) => Some(g),
                (None, Some(f)) => Some(f),
                (None, None) => None,
            }
        })
    }

    /// All claims
    #[must_use]
    pub fn claims(&self) -> &Map<String, Value> {
        &self.claims
    }
}
