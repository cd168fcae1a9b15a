//! Credential acquisition for Snapshare cloud uploads.
//!
//! This crate obtains, signs and refreshes the credentials upload
//! destinations need:
//!
//! - **OAuth 1.0a**: request-token / user-authorization / access-token
//!   dance with HMAC-SHA1 or PLAINTEXT signing (RFC 5849)
//! - **OAuth 2.0**: authorization code and refresh token grants (RFC 6749)
//!   with three ways to capture the redirect
//! - **Loopback listener** for browser redirects on `localhost`
//!
//! Token state lives in [`OAuth1Settings`] / [`OAuth2Settings`], owned and
//! persisted by the caller. The [`CredentialManager`] decides whether to
//! reuse, refresh or authorize and hands the updated settings back.
//!
//! # Architecture
//!
//! ```text
//! CredentialManager
//! ├── OAuth1Session    (signer + HTTP executor + embedded browser)
//! ├── OAuth2Flow       (HTTP executor + browser launcher)
//! │   └── LoopbackListener (query-string or JSON capture)
//! └── HttpExecutor     (reqwest)
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use snapshare_auth::{CredentialManager, OAuth2Settings, SystemBrowser};
//!
//! # async fn example() -> snapshare_auth::error::Result<()> {
//! let manager = CredentialManager::new(Arc::new(SystemBrowser));
//!
//! let settings = OAuth2Settings {
//!     client_id: "my-app".to_string(),
//!     client_secret: "secret".to_string(),
//!     authorize_url: "https://auth.example.com/authorize".to_string(),
//!     token_url: "https://auth.example.com/token".to_string(),
//!     cloud_service_name: "Example".to_string(),
//!     ..OAuth2Settings::default()
//! };
//!
//! let (settings, header) = manager.bearer_header(settings).await?;
//! println!("{header}; persist refresh token for next time");
//! # let _ = settings;
//! # Ok(())
//! # }
//! ```

pub mod browser;
pub mod callback;
pub mod config;
pub mod error;
pub mod http;
pub mod manager;
pub mod oauth1;
pub mod oauth2;
pub mod settings;
pub mod signer;

// Re-export key types at the crate root for convenience.
pub use browser::{
    BrowserLauncher, EmbeddedBrowser, EmbeddedBrowserRequest, EmbeddedBrowserResult,
    ManualBrowser, SystemBrowser,
};
pub use callback::{CallbackResult, CaptureMode, ListenerState, LoopbackListener};
pub use config::ServiceConfig;
pub use error::{AuthError, Result};
pub use http::{HttpExecutor, HttpResponse, PreparedRequest, RequestBody};
pub use manager::CredentialManager;
pub use oauth1::OAuth1Session;
pub use oauth2::OAuth2Flow;
pub use settings::{
    AuthOutcome, AuthorizeMode, BrowserSize, OAuth1Settings, OAuth2Settings, TokenRequestMethod,
};
pub use signer::{FilePart, ParamValue, Parameters, SignatureType};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn re_exports_available() {
        let _: fn() -> OAuth2Settings = OAuth2Settings::default;
        let _: fn() -> OAuth1Settings = OAuth1Settings::default;
        let _ = AuthorizeMode::JsonReceiver;
        let _ = ListenerState::Idle;
    }

    #[test]
    fn authorize_mode_serialization() {
        let json = serde_json::to_string(&AuthorizeMode::LocalServer).unwrap();
        assert_eq!(json, "\"local_server\"");

        let json = serde_json::to_string(&AuthorizeMode::EmbeddedBrowser).unwrap();
        assert_eq!(json, "\"embedded_browser\"");

        let mode: AuthorizeMode = serde_json::from_str("\"json_receiver\"").unwrap();
        assert_eq!(mode, AuthorizeMode::JsonReceiver);
    }

    #[test]
    fn signature_type_serialization() {
        let json = serde_json::to_string(&SignatureType::HmacSha1).unwrap();
        assert_eq!(json, "\"HMAC-SHA1\"");

        let kind: SignatureType = serde_json::from_str("\"PLAINTEXT\"").unwrap();
        assert_eq!(kind, SignatureType::Plaintext);
    }
}
