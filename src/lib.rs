//! OIDC Gateway Library
//!
//! OpenID Connect relying party and resource server building blocks.
//!
//! # Features
//!
//! - **Login**: authorization code flow with `state`, `nonce` and PKCE
//! - **Bearer validation**: JWT signature and claim checks against cached JWKS
//! - **Token exchange**: RFC 8693 exchange, memoized per token and target
//! - **Registry**: named clients and factories built once from configuration
//! - **axum middleware**: bearer authentication for API routes

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod exchange;
pub mod fetcher;
pub mod jwt;
pub mod oidc;
pub mod registry;
pub mod security;

pub use error::{Error, Result};
pub use registry::{DEFAULT_CLIENT, OidcRegistry, RegistryDependencies};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => {
            subscriber.with(fmt::layer().json()).init();
        }
        _ => {
            subscriber.with(fmt::layer()).init();
        }
    }

    Ok(())
}
