//! Browser capabilities consumed by the authorization flows.
//!
//! The flows never talk to a browser directly. They receive a
//! [`BrowserLauncher`] (fire-and-forget "open this URL") or an
//! [`EmbeddedBrowser`] (a hosted surface that reports the redirect back).
//! Tests supply fakes that record the URL and simulate the redirect.

use std::collections::HashMap;
use std::process::Command;

use async_trait::async_trait;

use crate::error::Result;
use crate::settings::BrowserSize;

/// Opens a URL in an external browser.
pub trait BrowserLauncher: Send + Sync {
    /// Launch the browser at `url`. Must not block until the page closes.
    fn open(&self, url: &str) -> Result<()>;
}

/// Launches the user's default browser through the OS "open URL" command.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBrowser;

impl BrowserLauncher for SystemBrowser {
    fn open(&self, url: &str) -> Result<()> {
        tracing::debug!(url = %url, "opening system browser");

        #[cfg(target_os = "macos")]
        {
            Command::new("open").arg(url).spawn()?;
        }
        #[cfg(target_os = "windows")]
        {
            Command::new("cmd").args(["/C", "start", "", url]).spawn()?;
        }
        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            Command::new("xdg-open").arg(url).spawn()?;
        }

        Ok(())
    }
}

/// Does not launch anything; logs the URL so the user can open it by hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct ManualBrowser;

impl BrowserLauncher for ManualBrowser {
    fn open(&self, url: &str) -> Result<()> {
        tracing::info!(url = %url, "open this URL in your browser to authorize");
        Ok(())
    }
}

/// What the embedded browser surface should show.
#[derive(Debug, Clone)]
pub struct EmbeddedBrowserRequest {
    /// Window title.
    pub title: String,
    pub size: BrowserSize,
    /// First page to load.
    pub start_url: String,
    /// The surface completes once navigation reaches a URL with this prefix.
    pub redirect_url_prefix: String,
}

/// How the embedded browser surface finished.
#[derive(Debug, Clone, Default)]
pub struct EmbeddedBrowserResult {
    /// `false` when the user closed the surface before the redirect.
    pub ok: bool,
    /// Query (or fragment) parameters of the redirect URL.
    pub callback_params: HashMap<String, String>,
}

/// A GUI-hosted browser control that blocks until the redirect is reached.
#[async_trait]
pub trait EmbeddedBrowser: Send + Sync {
    async fn show(&self, request: EmbeddedBrowserRequest) -> Result<EmbeddedBrowserResult>;
}
