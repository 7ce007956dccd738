//! Framework-neutral authenticators
//!
//! [`OidcAuthenticator`] completes a browser login at the callback path;
//! [`ResourceProviderAuthenticator`] accepts bearer tokens on API requests;
//! [`TokenExchangeAuthenticator`] accepts bearer tokens issued for another
//! audience by exchanging them first.
//! Both hand the host application a [`Passport`] for a user resolved through
//! its [`OidcUserProvider`].

mod authenticator;
pub mod middleware;
mod resource;
mod token_exchange;

use async_trait::async_trait;

use crate::Result;
use crate::oidc::{AccessTokens, OidcUserData};

pub use authenticator::OidcAuthenticator;
pub use middleware::require_bearer;
pub use resource::ResourceProviderAuthenticator;
pub use token_exchange::TokenExchangeAuthenticator;

/// Host application's user store
#[async_trait]
pub trait OidcUserProvider: Send + Sync {
    /// The host's user type
    type User: Clone + Send + Sync + 'static;

    /// Create or update the user named by `user_identifier`
    async fn ensure_user_exists(
        &self,
        user_identifier: &str,
        user_data: &OidcUserData,
        auth_data: &AccessTokens,
    ) -> Result<()>;

    /// Load the user after provisioning
    async fn load_oidc_user(&self, user_identifier: &str) -> Result<Self::User>;
}

/// Outcome of a successful authentication
#[derive(Debug, Clone)]
pub struct Passport<U> {
    /// Identifier claim value
    pub user_identifier: String,
    /// Loaded user
    pub user: U,
    /// Tokens the user authenticated with
    pub tokens: AccessTokens,
    /// Claims describing the user
    pub user_data: OidcUserData,
    /// Whether the user asked to be remembered
    pub remember_me: bool,
}
