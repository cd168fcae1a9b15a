//! Terminal stand-in for the embedded browser surface.
//!
//! Opens the authorization page with a [`BrowserLauncher`] and asks the user
//! to paste the URL they were redirected to, or a bare verifier (PIN) for
//! out-of-band OAuth1 services.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use snapshare_auth::error::Result;
use snapshare_auth::{BrowserLauncher, EmbeddedBrowser, EmbeddedBrowserRequest, EmbeddedBrowserResult};
use tokio::io::{AsyncBufReadExt, BufReader};
use url::Url;

/// Prompts on the terminal for the redirect the browser ended on.
pub struct ConsoleBrowser {
    launcher: Arc<dyn BrowserLauncher>,
}

impl ConsoleBrowser {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self { launcher }
    }
}

#[async_trait]
impl EmbeddedBrowser for ConsoleBrowser {
    async fn show(&self, request: EmbeddedBrowserRequest) -> Result<EmbeddedBrowserResult> {
        self.launcher.open(&request.start_url)?;

        eprintln!();
        if !request.title.is_empty() {
            eprintln!("  {}", request.title);
        }
        eprintln!("  Authorize in the browser, then paste the URL you were redirected to");
        eprintln!("  (or the verifier code) and press Enter. Leave empty to cancel.");
        eprint!("  > ");

        let mut line = String::new();
        BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

        Ok(parse_pasted(line.trim()))
    }
}

/// Turn what the user pasted into callback parameters.
fn parse_pasted(input: &str) -> EmbeddedBrowserResult {
    if input.is_empty() {
        return EmbeddedBrowserResult::default();
    }

    let callback_params = match Url::parse(input) {
        Ok(url) => {
            let mut params = HashMap::new();
            // Implicit grants put the token in the fragment.
            let fragment = url.fragment().unwrap_or_default().to_string();
            let pairs = url
                .query_pairs()
                .into_owned()
                .chain(url::form_urlencoded::parse(fragment.as_bytes()).into_owned());
            for (key, value) in pairs {
                params.entry(key).or_insert(value);
            }
            params
        }
        Err(_) => HashMap::from([("oauth_verifier".to_string(), input.to_string())]),
    };

    EmbeddedBrowserResult {
        ok: true,
        callback_params,
    }
}
