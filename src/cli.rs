//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// OpenID Connect relying party and resource server toolkit
#[derive(Parser, Debug)]
#[command(name = "oidc-gateway")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "OIDC_GATEWAY_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Client to use (defaults to the configured default client)
    #[arg(long, global = true)]
    pub client: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(
        long,
        default_value = "info",
        env = "OIDC_GATEWAY_LOG_LEVEL",
        global = true
    )]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "OIDC_GATEWAY_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Fetch and print the provider's discovery document
    Discover,

    /// Print an authorization URL and the one-time values behind it
    AuthorizeUrl {
        /// Additional scopes (openid is always requested)
        #[arg(short, long)]
        scope: Vec<String>,

        /// OIDC prompt value (e.g. login, consent)
        #[arg(long)]
        prompt: Option<String>,
    },

    /// Validate a bearer token as this resource server would
    Validate {
        /// The JWT to validate
        #[arg(required = true)]
        token: String,
    },

    /// Exchange an access token (RFC 8693) and print the result
    Exchange {
        /// Subject access token
        #[arg(required = true)]
        token: String,

        /// Target scope (defaults to the client's configured scope)
        #[arg(long)]
        scope: Option<String>,

        /// Target audience (defaults to the client's configured audience)
        #[arg(long)]
        audience: Option<String>,
    },
}
