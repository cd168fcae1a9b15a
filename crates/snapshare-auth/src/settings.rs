//! Per-service credential state.
//!
//! [`OAuth2Settings`] and [`OAuth1Settings`] hold identity, endpoints and
//! the mutable token state a flow produces. The caller owns them and is
//! responsible for persisting them; the flows only hand back updated copies.
//!
//! All fields default, so a TOML table only has to carry what the service
//! needs (see [`crate::config`]).

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};
use crate::signer::{SignatureType, percent_encode};

/// An access token this close to its expiry already counts as expired.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

/// Default loopback wait before giving up, in seconds.
pub const DEFAULT_REDIRECT_TIMEOUT_SECS: u64 = 240;

/// Default pause between user authorization and the access-token request.
pub const DEFAULT_ACCESS_TOKEN_DELAY_MS: u64 = 1000;

// ---------------------------------------------------------------------------
// Shared types
// ---------------------------------------------------------------------------

/// Size of an embedded browser surface, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserSize {
    pub width: u32,
    pub height: u32,
}

/// Result of an authorization attempt that can end without an error.
///
/// `NotAuthorized` covers the user closing the page, declining an OAuth1
/// verifier, or the loopback wait timing out. Either way the settings are
/// handed back.
#[derive(Debug, Clone)]
pub enum AuthOutcome<S> {
    Authorized(S),
    NotAuthorized(S),
}

impl<S> AuthOutcome<S> {
    pub fn is_authorized(&self) -> bool {
        matches!(self, Self::Authorized(_))
    }

    /// The settings, regardless of outcome.
    pub fn into_inner(self) -> S {
        match self {
            Self::Authorized(s) | Self::NotAuthorized(s) => s,
        }
    }
}

// ---------------------------------------------------------------------------
// OAuth 2.0
// ---------------------------------------------------------------------------

/// How the OAuth2 authorization code (or token) is captured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizeMode {
    /// Loopback listener capturing the redirect query string.
    #[default]
    LocalServer,
    /// Hosted browser surface reporting the redirect URL.
    EmbeddedBrowser,
    /// Loopback listener capturing a JSON POST from a static page.
    JsonReceiver,
}

/// OAuth 2.0 identity, endpoints and token state for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth2Settings {
    pub client_id: String,
    pub client_secret: String,

    /// Authorization endpoint used when no `auth_url_pattern` is set.
    pub authorize_url: String,
    /// Full authorization URL with `{ClientId}`, `{RedirectUrl}`, `{State}`
    /// and `{<attribute>}` placeholders.
    pub auth_url_pattern: Option<String>,
    pub token_url: String,
    /// Filled in by the loopback listener in local modes.
    pub redirect_url: String,

    /// Display name substituted into the loopback landing page.
    pub cloud_service_name: String,
    pub browser_size: Option<BrowserSize>,
    pub authorize_mode: AuthorizeMode,
    pub redirect_timeout_secs: u64,

    /// Merged into every token request (e.g. `scope`).
    pub additional_attributes: BTreeMap<String, String>,

    /// Authorization code; single use.
    pub code: String,
    pub access_token: String,
    pub refresh_token: String,
    /// `None` means the access token never expires.
    pub access_token_expires: Option<DateTime<Utc>>,
    /// Anti-CSRF value sent with the authorization request.
    pub state: String,
}

impl Default for OAuth2Settings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            authorize_url: String::new(),
            auth_url_pattern: None,
            token_url: String::new(),
            redirect_url: String::new(),
            cloud_service_name: String::new(),
            browser_size: None,
            authorize_mode: AuthorizeMode::default(),
            redirect_timeout_secs: DEFAULT_REDIRECT_TIMEOUT_SECS,
            additional_attributes: BTreeMap::new(),
            code: String::new(),
            access_token: String::new(),
            refresh_token: String::new(),
            access_token_expires: None,
            state: uuid::Uuid::now_v7().to_string(),
        }
    }
}

impl OAuth2Settings {
    /// Whether the access token must not be used any more.
    ///
    /// A token expiring within [`EXPIRY_MARGIN_SECS`] is expired, and so is
    /// an empty token with an expiry set. An expired token is cleared.
    pub fn is_access_token_expired(&mut self) -> bool {
        self.is_access_token_expired_at(Utc::now())
    }

    pub(crate) fn is_access_token_expired_at(&mut self, now: DateTime<Utc>) -> bool {
        let Some(expires) = self.access_token_expires else {
            return false;
        };

        let expired = self.access_token.is_empty()
            || now + TimeDelta::seconds(EXPIRY_MARGIN_SECS) > expires;
        if expired {
            self.access_token.clear();
        }
        expired
    }

    /// Set the expiry `seconds` from now.
    ///
    /// Lifetimes past the representable range clamp to the far end of it.
    pub fn set_expires_in(&mut self, seconds: i64) {
        let expires = TimeDelta::try_seconds(seconds)
            .and_then(|delta| Utc::now().checked_add_signed(delta))
            .unwrap_or(if seconds < 0 {
                DateTime::<Utc>::MIN_UTC
            } else {
                DateTime::<Utc>::MAX_UTC
            });
        self.access_token_expires = Some(expires);
    }

    /// Forget every token so the next call authorizes from scratch.
    pub fn clear_tokens(&mut self) {
        self.refresh_token.clear();
        self.access_token.clear();
        self.access_token_expires = Some(DateTime::<Utc>::MIN_UTC);
        self.code.clear();
    }

    /// The authorization URL the user must visit.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] when neither a pattern nor an
    /// authorize URL is configured, or [`AuthError::UrlParse`] when the
    /// authorize URL is malformed.
    pub fn formatted_auth_url(&self) -> Result<String> {
        if let Some(pattern) = self.auth_url_pattern.as_deref().filter(|p| !p.is_empty()) {
            let mut url = pattern
                .replace("{ClientId}", &percent_encode(&self.client_id))
                .replace("{RedirectUrl}", &percent_encode(&self.redirect_url))
                .replace("{State}", &percent_encode(&self.state));
            for (key, value) in &self.additional_attributes {
                url = url.replace(&format!("{{{key}}}"), &percent_encode(value));
            }
            return Ok(url);
        }

        if self.authorize_url.is_empty() {
            return Err(AuthError::InvalidConfig {
                reason: "oauth2 needs either authorize_url or auth_url_pattern".to_string(),
            });
        }

        let mut url = Url::parse(&self.authorize_url)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("response_type", "code");
            pairs.append_pair("client_id", &self.client_id);
            if !self.redirect_url.is_empty() {
                pairs.append_pair("redirect_uri", &self.redirect_url);
            }
            pairs.append_pair("state", &self.state);
            for (key, value) in &self.additional_attributes {
                pairs.append_pair(key, value);
            }
        }
        Ok(url.to_string())
    }
}

// ---------------------------------------------------------------------------
// OAuth 1.0a
// ---------------------------------------------------------------------------

/// HTTP method used for the request-token and access-token calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TokenRequestMethod {
    #[default]
    Get,
    Post,
}

impl TokenRequestMethod {
    pub fn as_method(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
        }
    }
}

/// OAuth 1.0a identity, endpoints, session options and token state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuth1Settings {
    pub consumer_key: String,
    pub consumer_secret: String,

    pub request_token_url: String,
    pub authorize_url: String,
    pub access_token_url: String,
    /// Sent as `oauth_callback`; the embedded browser completes on it.
    pub callback_url: String,

    pub signature_type: SignatureType,
    pub request_token_method: TokenRequestMethod,
    pub access_token_method: TokenRequestMethod,
    pub use_http_header_for_authorization: bool,
    pub use_multipart_form_data: bool,
    /// An empty verifier after user authorization means "not authorized".
    pub check_verifier: bool,
    /// Re-run the whole authorization when an API call answers 401.
    pub auto_login: bool,
    pub login_title: String,
    pub browser_size: Option<BrowserSize>,
    /// Extra parameters sent with the request-token call.
    pub request_token_parameters: BTreeMap<String, String>,
    pub access_token_delay_ms: u64,

    pub token: String,
    pub token_secret: String,
    pub verifier: String,

    /// Raw parameters of the last request-token response.
    #[serde(skip)]
    pub request_token_response_parameters: HashMap<String, String>,
    /// Raw parameters of the last access-token response (user ids and the like).
    #[serde(skip)]
    pub access_token_response_parameters: HashMap<String, String>,
}

impl Default for OAuth1Settings {
    fn default() -> Self {
        Self {
            consumer_key: String::new(),
            consumer_secret: String::new(),
            request_token_url: String::new(),
            authorize_url: String::new(),
            access_token_url: String::new(),
            callback_url: String::new(),
            signature_type: SignatureType::default(),
            request_token_method: TokenRequestMethod::Get,
            access_token_method: TokenRequestMethod::Get,
            use_http_header_for_authorization: true,
            use_multipart_form_data: false,
            check_verifier: true,
            auto_login: true,
            login_title: String::new(),
            browser_size: None,
            request_token_parameters: BTreeMap::new(),
            access_token_delay_ms: DEFAULT_ACCESS_TOKEN_DELAY_MS,
            token: String::new(),
            token_secret: String::new(),
            verifier: String::new(),
            request_token_response_parameters: HashMap::new(),
            access_token_response_parameters: HashMap::new(),
        }
    }
}

impl OAuth1Settings {
    /// Whether an access token/secret pair is present.
    pub fn has_access_token(&self) -> bool {
        !self.token.is_empty() && !self.token_secret.is_empty()
    }

    /// Clear the session state before a fresh authorization.
    pub fn clear_session(&mut self) {
        self.token.clear();
        self.token_secret.clear();
        self.verifier.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
