//! OpenID Connect relying party and resource server
//!
//! [`OidcClient`] drives the authorization code flow, token exchange and
//! bearer validation. The remaining modules hold the values it produces and
//! consumes.

pub mod client;
pub mod pkce;
pub mod session;
pub mod tokens;
pub mod user_data;
pub mod well_known;

pub use client::{
    AuthorizationRedirectOptions, CallbackParams, OidcClient, OidcDependencies, ResourceUserData,
    SUBJECT_TOKEN_TYPE_ACCESS_TOKEN,
};
pub use pkce::CodeChallengeMethod;
pub use session::{InMemorySession, SessionStorage, SessionStore};
pub use tokens::{AccessTokens, OidcTokens, TokenResponse};
pub use user_data::OidcUserData;
pub use well_known::{WellKnownConfiguration, WellKnownParser};
