//! OAuth 2.0 authorization code and refresh token grants.
//!
//! # Flow Overview
//!
//! 1. Capture an authorization code (or a token directly) through one of
//!    the [`AuthorizeMode`]s.
//! 2. Exchange the code at the token endpoint
//!    ([`OAuth2Flow::generate_refresh_token`]).
//! 3. Refresh the access token when it expires
//!    ([`OAuth2Flow::generate_access_token`]). A revoked refresh token
//!    (`invalid_grant`) clears the token state instead of failing.
//!
//! Every step takes the settings by value and hands back the updated copy.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde::Deserialize;

use crate::browser::{BrowserLauncher, EmbeddedBrowser, EmbeddedBrowserRequest};
use crate::callback::{CallbackResult, CaptureMode, LoopbackListener};
use crate::error::{AuthError, Result};
use crate::http::{self, HttpExecutor, PreparedRequest, RequestBody};
use crate::settings::{AuthOutcome, AuthorizeMode, OAuth2Settings};

const CODE_KEY: &str = "code";
const STATE_KEY: &str = "state";
const ERROR_KEY: &str = "error";
const ERROR_DESCRIPTION_KEY: &str = "error_description";
const ACCESS_TOKEN_KEY: &str = "access_token";
const REFRESH_TOKEN_KEY: &str = "refresh_token";
const EXPIRES_IN_KEY: &str = "expires_in";

const ACCESS_DENIED: &str = "access_denied";
const INVALID_GRANT: &str = "invalid_grant";

/// Version reported to the JSON receiver's caller.
const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// ---------------------------------------------------------------------------
// Token endpoint responses
// ---------------------------------------------------------------------------

/// JSON body of a token endpoint response, success or error.
#[derive(Debug, Default, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    /// Numeric on most services, a string on some.
    expires_in: Option<serde_json::Value>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn expires_in_secs(&self) -> Option<i64> {
        let value = self.expires_in.as_ref()?;
        value
            .as_i64()
            .or_else(|| value.as_f64().map(|f| f as i64))
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
    }

    /// Copy the tokens into `settings`. A missing refresh token keeps the
    /// stored one.
    fn apply_to(self, settings: &mut OAuth2Settings) {
        let expires_in = self.expires_in_secs();
        if let Some(access_token) = self.access_token {
            settings.access_token = access_token;
        }
        if let Some(refresh_token) = self.refresh_token.filter(|t| !t.is_empty()) {
            settings.refresh_token = refresh_token;
        }
        if let Some(seconds) = expires_in {
            settings.set_expires_in(seconds);
        }
    }
}

/// Map an OAuth `error` / `error_description` pair to an [`AuthError`].
fn oauth_error(error: String, description: Option<String>) -> AuthError {
    if error == ACCESS_DENIED {
        AuthError::AccessDenied {
            reason: description.filter(|d| !d.is_empty()).unwrap_or(error),
        }
    } else {
        AuthError::protocol(error, description)
    }
}

// ---------------------------------------------------------------------------
// OAuth flow
// ---------------------------------------------------------------------------

/// Runs OAuth 2.0 authorization and token exchanges.
///
/// Holds no token state; everything flows through the
/// [`OAuth2Settings`] passed to each method.
pub struct OAuth2Flow {
    http: HttpExecutor,
    browser: Arc<dyn BrowserLauncher>,
    embedded: Option<Arc<dyn EmbeddedBrowser>>,
}

impl OAuth2Flow {
    pub fn new(http: HttpExecutor, browser: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            http,
            browser,
            embedded: None,
        }
    }

    /// Enable [`AuthorizeMode::EmbeddedBrowser`].
    pub fn with_embedded_browser(mut self, embedded: Arc<dyn EmbeddedBrowser>) -> Self {
        self.embedded = Some(embedded);
        self
    }

    /// Obtain an authorization through the configured mode.
    ///
    /// Returns [`AuthOutcome::NotAuthorized`] when the user closed the
    /// browser, the wait timed out, or the capture carried neither a code
    /// nor a token.
    ///
    /// # Errors
    ///
    /// - [`AuthError::InvalidConfig`] for missing mode prerequisites.
    /// - [`AuthError::AccessDenied`] when the user declined.
    /// - [`AuthError::Protocol`] for any other reported `error`.
    /// - [`AuthError::FlowFailed`] when the returned `state` does not match.
    pub async fn authorize(&self, settings: OAuth2Settings) -> Result<AuthOutcome<OAuth2Settings>> {
        tracing::info!(
            service = %settings.cloud_service_name,
            mode = ?settings.authorize_mode,
            "starting OAuth2 authorization"
        );

        match settings.authorize_mode {
            AuthorizeMode::LocalServer => {
                require_service_name(&settings)?;
                let mode = CaptureMode::QueryString {
                    service_name: settings.cloud_service_name.clone(),
                };
                self.authorize_via_listener(settings, mode, false).await
            }
            AuthorizeMode::JsonReceiver => {
                let mode = CaptureMode::Json {
                    app_version: APP_VERSION.to_string(),
                };
                self.authorize_via_listener(settings, mode, true).await
            }
            AuthorizeMode::EmbeddedBrowser => self.authorize_via_embedded(settings).await,
        }
    }

    async fn authorize_via_listener(
        &self,
        mut settings: OAuth2Settings,
        mode: CaptureMode,
        accepts_tokens: bool,
    ) -> Result<AuthOutcome<OAuth2Settings>> {
        let mut listener = LoopbackListener::start(mode).await?;
        settings.redirect_url = listener.redirect_uri().to_string();

        let authorize_url = match settings.formatted_auth_url() {
            Ok(url) => url,
            Err(e) => {
                listener.stop();
                return Err(e);
            }
        };

        let timeout = Duration::from_secs(settings.redirect_timeout_secs);
        let captured = listener
            .wait_for_capture(self.browser.as_ref(), &authorize_url, timeout)
            .await?;

        match captured {
            Some(result) => self.complete_authorization(settings, result, accepts_tokens).await,
            None => Ok(AuthOutcome::NotAuthorized(settings)),
        }
    }

    async fn authorize_via_embedded(
        &self,
        settings: OAuth2Settings,
    ) -> Result<AuthOutcome<OAuth2Settings>> {
        require_service_name(&settings)?;
        let size = settings.browser_size.ok_or_else(|| AuthError::InvalidConfig {
            reason: "embedded browser mode needs browser_size".to_string(),
        })?;
        let embedded = self.embedded.as_ref().ok_or_else(|| AuthError::InvalidConfig {
            reason: "embedded browser mode needs an embedded browser".to_string(),
        })?;

        let request = EmbeddedBrowserRequest {
            title: settings.cloud_service_name.clone(),
            size,
            start_url: settings.formatted_auth_url()?,
            redirect_url_prefix: settings.redirect_url.clone(),
        };
        let result = embedded.show(request).await?;

        if !result.ok {
            tracing::info!("embedded browser closed without authorization");
            return Ok(AuthOutcome::NotAuthorized(settings));
        }
        self.complete_authorization(settings, result.callback_params, true)
            .await
    }

    /// Turn a captured redirect into tokens.
    async fn complete_authorization(
        &self,
        mut settings: OAuth2Settings,
        result: CallbackResult,
        accepts_tokens: bool,
    ) -> Result<AuthOutcome<OAuth2Settings>> {
        if let Some(error) = result.get(ERROR_KEY).filter(|e| !e.is_empty()) {
            tracing::warn!(error = %error, "authorization redirect reported an error");
            return Err(oauth_error(
                error.clone(),
                result.get(ERROR_DESCRIPTION_KEY).cloned(),
            ));
        }

        if let Some(state) = result.get(STATE_KEY)
            && *state != settings.state
        {
            return Err(AuthError::FlowFailed {
                reason: "state mismatch in authorization redirect".to_string(),
            });
        }

        if let Some(code) = result.get(CODE_KEY).filter(|c| !c.is_empty()) {
            settings.code = code.clone();
            let settings = self.generate_refresh_token(settings).await?;
            return Ok(AuthOutcome::Authorized(settings));
        }

        if accepts_tokens && result.contains_key(ACCESS_TOKEN_KEY) {
            return Ok(AuthOutcome::Authorized(update_from_callback(settings, &result)));
        }

        tracing::info!("authorization redirect carried neither code nor token");
        Ok(AuthOutcome::NotAuthorized(settings))
    }

    /// Exchange `settings.code` for an access and refresh token.
    ///
    /// The code is cleared afterwards.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AccessDenied`] / [`AuthError::Protocol`] for an
    ///   `error` in the response.
    /// - [`AuthError::RequestFailed`] for a non-JSON error response.
    /// - [`AuthError::Network`] on transport failure.
    pub async fn generate_refresh_token(
        &self,
        mut settings: OAuth2Settings,
    ) -> Result<OAuth2Settings> {
        let mut form = vec![
            (CODE_KEY.to_string(), settings.code.clone()),
            ("client_id".to_string(), settings.client_id.clone()),
            ("client_secret".to_string(), settings.client_secret.clone()),
            ("grant_type".to_string(), "authorization_code".to_string()),
        ];
        if !settings.redirect_url.is_empty() {
            form.push(("redirect_uri".to_string(), settings.redirect_url.clone()));
        }
        extend_with_attributes(&mut form, &settings);

        tracing::debug!(token_url = %settings.token_url, "exchanging authorization code");
        let response = self.post_token_request(&settings.token_url, form).await;
        settings.code.clear();
        let response = response?;

        if let Some(error) = response.error {
            return Err(oauth_error(error, response.error_description));
        }
        response.apply_to(&mut settings);

        tracing::info!("authorization code exchanged for tokens");
        Ok(settings)
    }

    /// Refresh the access token with `settings.refresh_token`.
    ///
    /// An `invalid_grant` answer clears refresh token, access token, expiry
    /// and code and is not an error: the caller must authorize again.
    ///
    /// # Errors
    ///
    /// Same as [`OAuth2Flow::generate_refresh_token`], minus `invalid_grant`.
    pub async fn generate_access_token(
        &self,
        mut settings: OAuth2Settings,
    ) -> Result<OAuth2Settings> {
        let mut form = vec![
            (REFRESH_TOKEN_KEY.to_string(), settings.refresh_token.clone()),
            ("client_id".to_string(), settings.client_id.clone()),
            ("client_secret".to_string(), settings.client_secret.clone()),
            ("grant_type".to_string(), "refresh_token".to_string()),
        ];
        extend_with_attributes(&mut form, &settings);

        tracing::debug!(token_url = %settings.token_url, "refreshing access token");
        let response = self.post_token_request(&settings.token_url, form).await?;

        match response.error {
            Some(error) if error == INVALID_GRANT => {
                tracing::warn!("refresh token was rejected, authorization required");
                settings.clear_tokens();
                return Ok(settings);
            }
            Some(error) => return Err(oauth_error(error, response.error_description)),
            None => {}
        }

        response.apply_to(&mut settings);
        tracing::info!("access token refreshed");
        Ok(settings)
    }

    /// Make sure `settings` holds a usable access token.
    ///
    /// Authorizes when there is no refresh token, refreshes an expired
    /// access token, and authorizes again when the refresh token was
    /// revoked.
    ///
    /// # Errors
    ///
    /// - [`AuthError::AuthenticationCancelled`] when authorization did not
    ///   complete.
    /// - [`AuthError::AuthenticationFailed`] when the token is still
    ///   expired at the end.
    /// - Any error from the individual steps.
    pub async fn check_and_authenticate_or_refresh(
        &self,
        mut settings: OAuth2Settings,
    ) -> Result<OAuth2Settings> {
        if settings.refresh_token.is_empty() {
            settings = self.authorize_or_cancel(settings).await?;
        }

        if settings.is_access_token_expired() {
            settings = self.generate_access_token(settings).await?;

            if settings.refresh_token.is_empty() {
                settings = self.authorize_or_cancel(settings).await?;
                // A fresh authorization usually carries a valid access token;
                // refresh again only when it did not.
                if settings.is_access_token_expired() && !settings.refresh_token.is_empty() {
                    settings = self.generate_access_token(settings).await?;
                }
            }
        }

        if settings.is_access_token_expired() {
            return Err(AuthError::AuthenticationFailed);
        }
        Ok(settings)
    }

    async fn authorize_or_cancel(&self, settings: OAuth2Settings) -> Result<OAuth2Settings> {
        match self.authorize(settings).await? {
            AuthOutcome::Authorized(settings) => Ok(settings),
            AuthOutcome::NotAuthorized(_) => Err(AuthError::AuthenticationCancelled),
        }
    }

    /// POST a token request and parse the JSON body, whatever the status.
    async fn post_token_request(
        &self,
        token_url: &str,
        form: Vec<(String, String)>,
    ) -> Result<TokenResponse> {
        let request = PreparedRequest::new(Method::POST, token_url)
            .header("Accept", "application/json")
            .body(RequestBody::Form(form));
        let response = self.http.send(request).await?;

        match serde_json::from_str::<TokenResponse>(&response.body) {
            Ok(parsed) if parsed.error.is_some() || response.is_success() => Ok(parsed),
            Ok(_) => Err(http::status_error(token_url, response)),
            Err(e) if response.is_success() => Err(e.into()),
            Err(_) => Err(http::status_error(token_url, response)),
        }
    }
}

/// Copy tokens delivered directly on a redirect into `settings`.
///
/// Reads `access_token`, `refresh_token` and `expires_in` (seconds). An
/// unparseable `expires_in` leaves the expiry unchanged.
pub fn update_from_callback(mut settings: OAuth2Settings, result: &CallbackResult) -> OAuth2Settings {
    if let Some(access_token) = result.get(ACCESS_TOKEN_KEY) {
        settings.access_token = access_token.clone();
    }
    if let Some(refresh_token) = result.get(REFRESH_TOKEN_KEY).filter(|t| !t.is_empty()) {
        settings.refresh_token = refresh_token.clone();
    }
    if let Some(seconds) = result
        .get(EXPIRES_IN_KEY)
        .and_then(|s| s.trim().parse::<f64>().ok())
    {
        settings.set_expires_in(seconds as i64);
    }
    settings
}

fn extend_with_attributes(form: &mut Vec<(String, String)>, settings: &OAuth2Settings) {
    form.extend(
        settings
            .additional_attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
}

fn require_service_name(settings: &OAuth2Settings) -> Result<()> {
    if settings.cloud_service_name.is_empty() {
        return Err(AuthError::InvalidConfig {
            reason: "cloud_service_name must be set".to_string(),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
