//! OIDC Gateway - OpenID Connect relying party and resource server toolkit
//!
//! Inspects a provider configuration from the command line: discovery,
//! authorization URLs, bearer validation and token exchange.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::error;

use oidc_gateway::{
    OidcRegistry, RegistryDependencies,
    cache::InMemoryCache,
    cli::{Cli, Command},
    clock::{Clock, SystemClock},
    config::Config,
    fetcher::ReqwestTransport,
    oidc::{AuthorizationRedirectOptions, InMemorySession, SUBJECT_TOKEN_TYPE_ACCESS_TOKEN, SessionStorage},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.as_deref()) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            eprintln!("❌ {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load(cli.config.as_deref()).context("loading configuration")?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let transport = ReqwestTransport::new(config.http.timeout, &config.http.user_agent)
        .context("building HTTP client")?;
    let deps = RegistryDependencies {
        transport: Arc::new(transport),
        cache: Some(Arc::new(InMemoryCache::new(clock.clone()))),
        clock,
    };
    let registry = OidcRegistry::from_config(&config, &deps)?;
    let client = registry.client(cli.client.as_deref())?;

    match cli.command {
        Command::Discover => {
            let well_known = client.well_known().await?;
            println!("{}", serde_json::to_string_pretty(&well_known)?);
        }
        Command::AuthorizeUrl { scope, prompt } => {
            let session = SessionStorage::new(client.name(), Arc::new(InMemorySession::new()));
            let options = AuthorizationRedirectOptions {
                scopes: scope,
                prompt,
                ..Default::default()
            };
            let url = client.generate_authorization_redirect(&session, options).await?;

            println!("{url}");
            println!();
            println!("state:         {}", session.get_state().unwrap_or_default());
            if let Some(nonce) = session.get_nonce() {
                println!("nonce:         {nonce}");
            }
            if let Some(verifier) = session.get_code_verifier() {
                println!("code_verifier: {verifier}");
            }
        }
        Command::Validate { token } => {
            let tokens = client
                .validate_access_token_resource_provider(&token)
                .await
                .context("token rejected")?;
            let extracted = client.extract_user_data_from_access_token_resource_provider(
                &tokens,
                &client.config().user_identifier_property,
            )?;

            println!("✅ Valid token for {}", extracted.user_identifier);
            if let Some(expiry) = tokens.expiry() {
                println!("   Expires: {expiry}");
            }
            println!("{}", serde_json::to_string_pretty(&extracted.user_data)?);
        }
        Command::Exchange {
            token,
            scope,
            audience,
        } => {
            let scope = scope.or_else(|| client.config().scope.clone());
            let audience = audience.or_else(|| client.config().audience.clone());
            let tokens = client
                .exchange_tokens(
                    &token,
                    scope.as_deref(),
                    audience.as_deref(),
                    SUBJECT_TOKEN_TYPE_ACCESS_TOKEN,
                )
                .await
                .context("token exchange failed")?;
            println!("{}", serde_json::to_string_pretty(&tokens)?);
        }
    }

    Ok(())
}
