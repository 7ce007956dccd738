//! Per-client view over the host's browser session
//!
//! Holds the one-time authorization state (`state`, `nonce`, PKCE verifier,
//! remember-me flag) between the redirect and its callback, and the tokens
//! obtained by the login. Keys are scoped by client name so several clients
//! can share one session.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

/// String key/value store bound to one browser session.
pub trait SessionStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Option<String>;
    /// Write a value
    fn set(&self, key: &str, value: String);
    /// Remove a value, returning what was stored
    fn remove(&self, key: &str) -> Option<String>;
}

/// In-process session, one per browser session
#[derive(Debug, Default)]
pub struct InMemorySession {
    values: RwLock<HashMap<String, String>>,
}

impl InMemorySession {
    /// Create an empty session
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored values
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl SessionStore for InMemorySession {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) {
        self.values.write().insert(key.to_string(), value);
    }

    fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(key)
    }
}

const STATE: &str = "state";
const NONCE: &str = "nonce";
const CODE_VERIFIER: &str = "code_verifier";
const REMEMBER_ME: &str = "remember_me";
const ACCESS_TOKEN: &str = "access_token";
const REFRESH_TOKEN: &str = "refresh_token";

/// Session values belonging to one named OIDC client
#[derive(Clone)]
pub struct SessionStorage {
    client_name: String,
    store: Arc<dyn SessionStore>,
}

impl SessionStorage {
    /// Scope `store` to `client_name`
    #[must_use]
    pub fn new(client_name: impl Into<String>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            client_name: client_name.into(),
            store,
        }
    }

    /// Name of the client these values belong to
    #[must_use]
    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    fn key(&self, field: &str) -> String {
        format!("oidc_gateway.session.{field}.{}", self.client_name)
    }

    fn get(&self, field: &str) -> Option<String> {
        self.store.get(&self.key(field))
    }

    fn set(&self, field: &str, value: String) {
        self.store.set(&self.key(field), value);
    }

    fn take(&self, field: &str) -> Option<String> {
        self.store.remove(&self.key(field))
    }

    /// Store the pending `state`
    pub fn store_state(&self, state: String) {
        self.set(STATE, state);
    }

    /// Pending `state`
    #[must_use]
    pub fn get_state(&self) -> Option<String> {
        self.get(STATE)
    }

    /// Read and clear the pending `state`
    pub fn take_state(&self) -> Option<String> {
        self.take(STATE)
    }

    /// Clear the pending `state`
    pub fn clear_state(&self) {
        self.take(STATE);
    }

    /// Store the pending `nonce`
    pub fn store_nonce(&self, nonce: String) {
        self.set(NONCE, nonce);
    }

    /// Pending `nonce`
    #[must_use]
    pub fn get_nonce(&self) -> Option<String> {
        self.get(NONCE)
    }

    /// Read and clear the pending `nonce`
    pub fn take_nonce(&self) -> Option<String> {
        self.take(NONCE)
    }

    /// Clear the pending `nonce`
    pub fn clear_nonce(&self) {
        self.take(NONCE);
    }

    /// Store the PKCE verifier
    pub fn store_code_verifier(&self, verifier: String) {
        self.set(CODE_VERIFIER, verifier);
    }

    /// PKCE verifier
    #[must_use]
    pub fn get_code_verifier(&self) -> Option<String> {
        self.get(CODE_VERIFIER)
    }

    /// Read and clear the PKCE verifier
    pub fn take_code_verifier(&self) -> Option<String> {
        self.take(CODE_VERIFIER)
    }

    /// Clear the PKCE verifier
    pub fn clear_code_verifier(&self) {
        self.take(CODE_VERIFIER);
    }

    /// Remember the user's remember-me choice for the pending login
    pub fn store_remember_me(&self, remember_me: bool) {
        self.set(REMEMBER_ME, remember_me.to_string());
    }

    /// Remember-me flag, false when unset
    #[must_use]
    pub fn get_remember_me(&self) -> bool {
        self.get(REMEMBER_ME).is_some_and(|v| v == "true")
    }

    /// Clear the remember-me flag
    pub fn clear_remember_me(&self) {
        self.take(REMEMBER_ME);
    }

    /// Store the access token obtained by the login
    pub fn store_access_token(&self, token: String) {
        self.set(ACCESS_TOKEN, token);
    }

    /// Access token obtained by the login
    #[must_use]
    pub fn get_access_token(&self) -> Option<String> {
        self.get(ACCESS_TOKEN)
    }

    /// Forget the access token
    pub fn clear_access_token(&self) {
        self.take(ACCESS_TOKEN);
    }

    /// Store the refresh token obtained by the login
    pub fn store_refresh_token(&self, token: String) {
        self.set(REFRESH_TOKEN, token);
    }

    /// Refresh token obtained by the login
    #[must_use]
    pub fn get_refresh_token(&self) -> Option<String> {
        self.get(REFRESH_TOKEN)
    }

    /// Forget the refresh token
    pub fn clear_refresh_token(&self) {
        self.take(REFRESH_TOKEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_state_is_single_use() {
        let storage = SessionStorage::new("default", Arc::new(InMemorySession::new()));
        storage.store_state("abc".into());

        assert_eq!(storage.take_state(), Some("abc".to_string()));
        assert_eq!(storage.take_state(), None);
        assert_eq!(storage.get_state(), None);
    }

    #[test]
    fn values_are_scoped_by_client_name() {
        let session: Arc<dyn SessionStore> = Arc::new(InMemorySession::new());
        let a = SessionStorage::new("a", session.clone());
        let b = SessionStorage::new("b", session.clone());

        a.store_nonce("nonce-a".into());
        a.store_access_token("token-a".into());

        assert_eq!(b.get_nonce(), None);
        assert_eq!(b.get_access_token(), None);
        assert_eq!(
            session.get("oidc_gateway.session.nonce.a"),
            Some("nonce-a".to_string())
        );
    }

    #[test]
    fn remember_me_defaults_to_false() {
        let storage = SessionStorage::new("default", Arc::new(InMemorySession::new()));
        assert!(!storage.get_remember_me());

        storage.store_remember_me(true);
        assert!(storage.get_remember_me());

        storage.clear_remember_me();
        assert!(!storage.get_remember_me());
    }

    #[test]
    fn clearing_one_field_leaves_others() {
        let session = Arc::new(InMemorySession::new());
        let storage = SessionStorage::new("default", session.clone());
        storage.store_code_verifier("v".into());
        storage.store_refresh_token("rt".into());

        storage.clear_code_verifier();

        assert_eq!(storage.get_code_verifier(), None);
        assert_eq!(storage.get_refresh_token(), Some("rt".to_string()));
        assert_eq!(session.len(), 1);
    }
}
