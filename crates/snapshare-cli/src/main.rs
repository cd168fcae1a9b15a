//! CLI entry point for Snapshare credential acquisition.
//!
//! This binary provides the `snapshare-auth` command with subcommands for
//! authorizing a configured service, printing its authorization URL, and
//! checking its token state. Tokens are printed, never persisted.

mod cli;
mod console;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Serialize;
use snapshare_auth::{
    BrowserLauncher, CredentialManager, ManualBrowser, OAuth1Settings, OAuth2Settings,
    ServiceConfig, SystemBrowser,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::console::ConsoleBrowser;

/// Replaces `oauth2.client_secret` when set.
const CLIENT_SECRET_ENV: &str = "SNAPSHARE_CLIENT_SECRET";

/// Replaces `oauth1.consumer_secret` when set.
const CONSUMER_SECRET_ENV: &str = "SNAPSHARE_CONSUMER_SECRET";

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing("info");

    match cli.command {
        Commands::Authorize { config, no_browser } => cmd_authorize(&config, no_browser).await,
        Commands::AuthUrl { config } => cmd_auth_url(&config),
        Commands::Status { config } => cmd_status(&config),
    }
}

// ---------------------------------------------------------------------------
// Subcommand: authorize
// ---------------------------------------------------------------------------

async fn cmd_authorize(path: &Path, no_browser: bool) -> Result<()> {
    let config = load_config(path)?;

    let launcher: Arc<dyn BrowserLauncher> = if no_browser {
        Arc::new(ManualBrowser)
    } else {
        Arc::new(SystemBrowser)
    };
    let manager = CredentialManager::new(Arc::clone(&launcher))
        .with_embedded_browser(Arc::new(ConsoleBrowser::new(launcher)));

    info!(service = %config.name, "authorizing");

    let state = if let Some(settings) = config.oauth2 {
        let settings = manager
            .ensure_oauth2(settings)
            .await
            .context("OAuth2 authorization failed")?;
        TokenState::from_oauth2(&config.name, &settings)
    } else if let Some(settings) = config.oauth1 {
        let outcome = manager
            .ensure_oauth1(settings)
            .await
            .context("OAuth1 authorization failed")?;
        if !outcome.is_authorized() {
            bail!("{} was not authorized", config.name);
        }
        TokenState::from_oauth1(&config.name, &outcome.into_inner())
    } else {
        bail!("{} has no OAuth configuration", config.name);
    };

    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: auth-url
// ---------------------------------------------------------------------------

fn cmd_auth_url(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let Some(settings) = config.oauth2 else {
        bail!("{} is not an OAuth2 service", config.name);
    };

    let url = settings
        .formatted_auth_url()
        .context("failed to build the authorization URL")?;
    println!("{url}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Subcommand: status
// ---------------------------------------------------------------------------

fn cmd_status(path: &Path) -> Result<()> {
    let config = load_config(path)?;

    let status = if let Some(mut settings) = config.oauth2 {
        let expired = settings.is_access_token_expired();
        serde_json::json!({
            "service": config.name,
            "protocol": "oauth2",
            "has_refresh_token": !settings.refresh_token.is_empty(),
            "access_token_expired": expired,
            "access_token_expires": settings.access_token_expires,
        })
    } else if let Some(settings) = config.oauth1 {
        serde_json::json!({
            "service": config.name,
            "protocol": "oauth1",
            "has_access_token": settings.has_access_token(),
        })
    } else {
        bail!("{} has no OAuth configuration", config.name);
    };

    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Token state printed after a successful authorization.
#[derive(Debug, Serialize)]
struct TokenState {
    service: String,
    protocol: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    access_token_expires: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_secret: Option<String>,
}

impl TokenState {
    fn from_oauth2(service: &str, settings: &OAuth2Settings) -> Self {
        Self {
            service: service.to_string(),
            protocol: "oauth2",
            access_token: Some(settings.access_token.clone()),
            refresh_token: Some(settings.refresh_token.clone()).filter(|t| !t.is_empty()),
            access_token_expires: settings.access_token_expires,
            token: None,
            token_secret: None,
        }
    }

    fn from_oauth1(service: &str, settings: &OAuth1Settings) -> Self {
        Self {
            service: service.to_string(),
            protocol: "oauth1",
            access_token: None,
            refresh_token: None,
            access_token_expires: None,
            token: Some(settings.token.clone()),
            token_secret: Some(settings.token_secret.clone()),
        }
    }
}

/// Load a service configuration and apply secret overrides from the
/// environment.
fn load_config(path: &Path) -> Result<ServiceConfig> {
    let mut config = ServiceConfig::load(path)
        .with_context(|| format!("failed to load {}", path.display()))?;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    Ok(config)
}

fn apply_env_overrides(config: &mut ServiceConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(oauth2) = config.oauth2.as_mut()
        && let Some(secret) = lookup(CLIENT_SECRET_ENV).filter(|s| !s.is_empty())
    {
        oauth2.client_secret = secret;
    }
    if let Some(oauth1) = config.oauth1.as_mut()
        && let Some(secret) = lookup(CONSUMER_SECRET_ENV).filter(|s| !s.is_empty())
    {
        oauth1.consumer_secret = secret;
    }
}

/// Initialize the tracing subscriber with the given default level.
///
/// `RUST_LOG` overrides the default. Logs go to stderr so stdout stays
/// machine-readable.
fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
