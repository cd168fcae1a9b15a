//! High-level credential manager.
//!
//! [`CredentialManager`] is the entry point for upload destinations: "give
//! me a usable credential for these settings". It decides whether to reuse,
//! refresh or authorize from scratch and hands the updated settings back so
//! the caller can persist them.

use std::sync::Arc;

use reqwest::Method;

use crate::browser::{BrowserLauncher, EmbeddedBrowser};
use crate::error::{AuthError, Result};
use crate::http::{HttpExecutor, PreparedRequest};
use crate::oauth1::OAuth1Session;
use crate::oauth2::OAuth2Flow;
use crate::settings::{AuthOutcome, OAuth1Settings, OAuth2Settings};
use crate::signer::Parameters;

/// Orchestrates OAuth1 sessions and OAuth2 flows over shared capabilities.
pub struct CredentialManager {
    http: HttpExecutor,
    oauth2: OAuth2Flow,
    embedded: Option<Arc<dyn EmbeddedBrowser>>,
}

impl CredentialManager {
    /// Create a manager that opens authorization pages with `browser`.
    pub fn new(browser: Arc<dyn BrowserLauncher>) -> Self {
        Self::with_http(HttpExecutor::new(), browser)
    }

    /// Create a manager over an existing HTTP executor.
    pub fn with_http(http: HttpExecutor, browser: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            oauth2: OAuth2Flow::new(http.clone(), browser),
            http,
            embedded: None,
        }
    }

    /// Enable embedded-browser authorization (OAuth1, and OAuth2's
    /// embedded mode).
    pub fn with_embedded_browser(mut self, embedded: Arc<dyn EmbeddedBrowser>) -> Self {
        self.oauth2 = self.oauth2.with_embedded_browser(Arc::clone(&embedded));
        self.embedded = Some(embedded);
        self
    }

    pub fn oauth2(&self) -> &OAuth2Flow {
        &self.oauth2
    }

    // -- OAuth 2.0 ----------------------------------------------------------

    /// Return settings holding a non-expired access token.
    ///
    /// # Errors
    ///
    /// See [`OAuth2Flow::check_and_authenticate_or_refresh`].
    pub async fn ensure_oauth2(&self, settings: OAuth2Settings) -> Result<OAuth2Settings> {
        tracing::debug!(service = %settings.cloud_service_name, "ensuring OAuth2 credentials");
        self.oauth2.check_and_authenticate_or_refresh(settings).await
    }

    /// The `Authorization` header value for a valid access token.
    ///
    /// # Errors
    ///
    /// See [`CredentialManager::ensure_oauth2`].
    pub async fn bearer_header(
        &self,
        settings: OAuth2Settings,
    ) -> Result<(OAuth2Settings, String)> {
        let settings = self.ensure_oauth2(settings).await?;
        let header = format!("Bearer {}", settings.access_token);
        Ok((settings, header))
    }

    /// Send `request` with a bearer token and return the response body.
    ///
    /// HTTP 401 is returned as [`AuthError::Unauthorized`]; OAuth2 calls
    /// are not retried.
    ///
    /// # Errors
    ///
    /// Any error from [`CredentialManager::ensure_oauth2`] or the request.
    pub async fn oauth2_request(
        &self,
        settings: OAuth2Settings,
        request: PreparedRequest,
    ) -> Result<(OAuth2Settings, String)> {
        let (settings, header) = self.bearer_header(settings).await?;
        let body = self
            .http
            .execute(request.header("Authorization", header))
            .await?;
        Ok((settings, body))
    }

    // -- OAuth 1.0a ---------------------------------------------------------

    /// An OAuth1 session over this manager's capabilities.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] without an embedded browser.
    pub fn oauth1_session(&self, settings: OAuth1Settings) -> Result<OAuth1Session> {
        let embedded = self
            .embedded
            .as_ref()
            .ok_or_else(|| AuthError::InvalidConfig {
                reason: "OAuth1 authorization needs an embedded browser".to_string(),
            })?;
        Ok(OAuth1Session::new(
            settings,
            self.http.clone(),
            Arc::clone(embedded),
        ))
    }

    /// Return OAuth1 settings holding an access token, authorizing if none
    /// is stored.
    ///
    /// # Errors
    ///
    /// See [`OAuth1Session::authorize`].
    pub async fn ensure_oauth1(
        &self,
        settings: OAuth1Settings,
    ) -> Result<AuthOutcome<OAuth1Settings>> {
        if settings.has_access_token() {
            return Ok(AuthOutcome::Authorized(settings));
        }

        let mut session = self.oauth1_session(settings)?;
        let authorized = session.authorize().await?;
        let settings = session.into_settings();

        Ok(if authorized {
            AuthOutcome::Authorized(settings)
        } else {
            AuthOutcome::NotAuthorized(settings)
        })
    }

    /// Sign and send an OAuth1 API request, re-authorizing on 401 when the
    /// settings allow it.
    ///
    /// # Errors
    ///
    /// See [`OAuth1Session::make_oauth_request`].
    pub async fn oauth1_request(
        &self,
        settings: OAuth1Settings,
        method: Method,
        url: &str,
        params: Parameters,
    ) -> Result<(OAuth1Settings, String)> {
        let mut session = self.oauth1_session(settings)?;
        let body = session.make_oauth_request(method, url, params, None).await;
        let settings = session.into_settings();
        body.map(|body| (settings, body))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
