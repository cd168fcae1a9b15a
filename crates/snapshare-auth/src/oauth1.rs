//! OAuth 1.0a three-legged session.
//!
//! # Flow Overview
//!
//! 1. Request a temporary token from `request_token_url` (signed with the
//!    consumer secret and `oauth_callback`).
//! 2. Show `authorize_url?oauth_token=...` in the embedded browser and read
//!    `oauth_token` / `oauth_verifier` from the redirect.
//! 3. Pause briefly, then exchange token + verifier at `access_token_url`
//!    for the access token and secret.
//!
//! [`OAuth1Session::make_oauth_request`] signs API calls with the access
//! token and re-runs the whole flow once when the service answers 401.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use url::Url;

use crate::browser::{EmbeddedBrowser, EmbeddedBrowserRequest};
use crate::error::{AuthError, Result};
use crate::http::{self, HttpExecutor, OAuth1RequestOptions};
use crate::settings::{BrowserSize, OAuth1Settings};
use crate::signer::{
    self, OAUTH_CALLBACK_KEY, OAUTH_TOKEN_KEY, OAUTH_TOKEN_SECRET_KEY, OAUTH_VERIFIER_KEY,
    Parameters, SigningKeys,
};

/// Attempts made by [`OAuth1Session::make_oauth_request`] before giving up.
const MAX_REQUEST_ATTEMPTS: usize = 2;

/// Embedded browser size when the settings do not name one.
const DEFAULT_BROWSER_SIZE: BrowserSize = BrowserSize {
    width: 864,
    height: 587,
};

/// Drives the OAuth 1.0a flow for one service and signs its API calls.
///
/// The session owns its settings for the duration of the flow. Take them
/// back with [`OAuth1Session::into_settings`] to persist them.
pub struct OAuth1Session {
    settings: OAuth1Settings,
    http: HttpExecutor,
    browser: Arc<dyn EmbeddedBrowser>,
}

impl OAuth1Session {
    pub fn new(
        settings: OAuth1Settings,
        http: HttpExecutor,
        browser: Arc<dyn EmbeddedBrowser>,
    ) -> Self {
        Self {
            settings,
            http,
            browser,
        }
    }

    pub fn settings(&self) -> &OAuth1Settings {
        &self.settings
    }

    pub fn into_settings(self) -> OAuth1Settings {
        self.settings
    }

    /// Run the full flow from a clean session.
    ///
    /// Returns `Ok(false)` when the user did not authorize (empty verifier
    /// with `check_verifier` on, or no access token in the final response).
    ///
    /// # Errors
    ///
    /// - [`AuthError::ServiceUnavailable`] if the request-token step fails.
    /// - [`AuthError::RequestTokenMissing`] if no request token was issued.
    /// - Any error from the access-token request.
    pub async fn authorize(&mut self) -> Result<bool> {
        self.settings.clear_session();

        tracing::info!(url = %self.settings.request_token_url, "starting OAuth1 authorization");

        if let Err(e) = self.get_request_token().await {
            return Err(AuthError::ServiceUnavailable {
                reason: e.to_string(),
            });
        }

        if !self.get_authorize_token().await? {
            tracing::info!("OAuth1 authorization was not granted");
            return Ok(false);
        }

        if self.settings.access_token_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.settings.access_token_delay_ms)).await;
        }

        self.get_access_token().await?;

        let authorized = self.settings.has_access_token();
        tracing::info!(authorized, "OAuth1 authorization finished");
        Ok(authorized)
    }

    /// Step 1: obtain the temporary request token and secret.
    pub async fn get_request_token(&mut self) -> Result<()> {
        let mut params: Parameters = self
            .settings
            .request_token_parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().into()))
            .collect();

        let method = self.settings.request_token_method.as_method();
        let url = self.settings.request_token_url.clone();
        let keys = SigningKeys {
            consumer_key: &self.settings.consumer_key,
            consumer_secret: &self.settings.consumer_secret,
            token: None,
            token_secret: None,
            verifier: None,
            callback: Some(&self.settings.callback_url),
            signature_type: self.settings.signature_type,
        };
        signer::sign(method.as_str(), &url, &mut params, &keys)?;

        let body = self.send_signed(method, &url, params, None).await?;
        let response = http::parse_form_body(&body);

        self.settings.token = response.get(OAUTH_TOKEN_KEY).cloned().unwrap_or_default();
        self.settings.token_secret = response
            .get(OAUTH_TOKEN_SECRET_KEY)
            .cloned()
            .unwrap_or_default();
        self.settings.request_token_response_parameters = response;

        tracing::debug!(
            issued = !self.settings.token.is_empty(),
            "OAuth1 request token response parsed"
        );
        Ok(())
    }

    /// Step 2: let the user authorize the request token.
    ///
    /// Returns `false` when the flow must stop without an error.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RequestTokenMissing`] if step 1 issued no token.
    pub async fn get_authorize_token(&mut self) -> Result<bool> {
        if self.settings.token.is_empty() {
            return Err(AuthError::RequestTokenMissing);
        }

        let start_url = self.authorization_url()?;
        let request = EmbeddedBrowserRequest {
            title: self.settings.login_title.clone(),
            size: self.settings.browser_size.unwrap_or(DEFAULT_BROWSER_SIZE),
            start_url,
            redirect_url_prefix: self.settings.callback_url.clone(),
        };

        let result = self.browser.show(request).await?;
        if result.ok {
            apply_authorize_callback(&mut self.settings, &result.callback_params);
        } else {
            tracing::debug!("embedded browser closed before the redirect");
        }

        if self.settings.check_verifier && self.settings.verifier.is_empty() {
            return Ok(false);
        }
        Ok(true)
    }

    /// Step 3: exchange the authorized request token for the access token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::RequestTokenMissing`] without a request token,
    /// or a verifier when `check_verifier` is on.
    pub async fn get_access_token(&mut self) -> Result<()> {
        if self.settings.token.is_empty()
            || (self.settings.check_verifier && self.settings.verifier.is_empty())
        {
            return Err(AuthError::RequestTokenMissing);
        }

        let method = self.settings.access_token_method.as_method();
        let url = self.settings.access_token_url.clone();
        let mut params = Parameters::new();
        let keys = SigningKeys {
            consumer_key: &self.settings.consumer_key,
            consumer_secret: &self.settings.consumer_secret,
            token: Some(&self.settings.token),
            token_secret: Some(&self.settings.token_secret),
            verifier: Some(&self.settings.verifier),
            callback: None,
            signature_type: self.settings.signature_type,
        };
        signer::sign(method.as_str(), &url, &mut params, &keys)?;

        let body = self.send_signed(method, &url, params, None).await?;
        let response = http::parse_form_body(&body);

        self.settings.token = response.get(OAUTH_TOKEN_KEY).cloned().unwrap_or_default();
        self.settings.token_secret = response
            .get(OAUTH_TOKEN_SECRET_KEY)
            .cloned()
            .unwrap_or_default();
        self.settings.access_token_response_parameters = response;
        Ok(())
    }

    /// Sign and send an API request with the access token.
    ///
    /// Authorizes first when there is no token and `auto_login` is on. A 401
    /// answer clears the token and retries once, re-authorizing from
    /// scratch.
    ///
    /// # Errors
    ///
    /// - The last [`AuthError::Unauthorized`] when every attempt was rejected.
    /// - [`AuthError::AuthenticationCancelled`] when re-authorization was
    ///   declined, or [`AuthError::AuthenticationFailed`] with `auto_login`
    ///   off and no token.
    pub async fn make_oauth_request(
        &mut self,
        method: Method,
        url: &str,
        mut params: Parameters,
        binary: Option<(String, Vec<u8>)>,
    ) -> Result<String> {
        let mut last_error = None;

        for attempt in 1..=MAX_REQUEST_ATTEMPTS {
            if !self.settings.has_access_token() {
                if !self.settings.auto_login {
                    return Err(last_error.unwrap_or(AuthError::AuthenticationFailed));
                }
                if !self.authorize().await? {
                    return Err(AuthError::AuthenticationCancelled);
                }
            }

            let keys = SigningKeys {
                consumer_key: &self.settings.consumer_key,
                consumer_secret: &self.settings.consumer_secret,
                token: Some(&self.settings.token),
                token_secret: Some(&self.settings.token_secret),
                verifier: None,
                callback: None,
                signature_type: self.settings.signature_type,
            };
            signer::sign(method.as_str(), url, &mut params, &keys)?;

            match self
                .send_signed(method.clone(), url, params.clone(), binary.clone())
                .await
            {
                Ok(body) => return Ok(body),
                Err(e) if e.is_unauthorized() => {
                    tracing::warn!(attempt, url = %url, "OAuth1 request rejected, re-authorizing");
                    self.settings.token.clear();
                    self.settings.token_secret.clear();
                    signer::strip_oauth_parameters(&mut params);
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(AuthError::AuthenticationFailed))
    }

    /// `authorize_url?oauth_token=...[&oauth_callback=...]`
    fn authorization_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.settings.authorize_url)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair(OAUTH_TOKEN_KEY, &self.settings.token);
            if !self.settings.callback_url.is_empty() {
                pairs.append_pair(OAUTH_CALLBACK_KEY, &self.settings.callback_url);
            }
        }
        Ok(url.to_string())
    }

    async fn send_signed(
        &self,
        method: Method,
        url: &str,
        params: Parameters,
        binary: Option<(String, Vec<u8>)>,
    ) -> Result<String> {
        let options = OAuth1RequestOptions {
            use_authorization_header: self.settings.use_http_header_for_authorization,
            use_multipart: self.settings.use_multipart_form_data,
        };
        let request = http::prepare_oauth1_request(method, url, params, &[], binary, options)?;
        self.http.execute(request).await
    }
}

/// Copy the token and verifier the service put on the redirect.
fn apply_authorize_callback(settings: &mut OAuth1Settings, params: &HashMap<String, String>) {
    if let Some(token) = params.get(OAUTH_TOKEN_KEY).filter(|t| !t.is_empty()) {
        settings.token = token.clone();
    }
    if let Some(verifier) = params.get(OAUTH_VERIFIER_KEY) {
        settings.verifier = verifier.clone();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
