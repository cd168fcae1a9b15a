//! TOML service configuration.
//!
//! A service file names the destination and carries an `[oauth1]` or
//! `[oauth2]` table with identity and endpoints:
//!
//! ```toml
//! name = "Imgur"
//!
//! [oauth2]
//! client_id = "abc"
//! client_secret = "def"
//! authorize_url = "https://api.imgur.com/oauth2/authorize"
//! token_url = "https://api.imgur.com/oauth2/token"
//! cloud_service_name = "Imgur"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};
use crate::settings::{AuthorizeMode, OAuth1Settings, OAuth2Settings};

/// One upload destination's credential configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth1: Option<OAuth1Settings>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth2: Option<OAuth2Settings>,
}

impl ServiceConfig {
    /// Parse and validate a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] for malformed TOML and
    /// [`AuthError::InvalidConfig`] when validation fails.
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if the file cannot be read, otherwise as
    /// [`ServiceConfig::from_toml_str`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let input = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loaded service configuration");
        Self::from_toml_str(&input)
    }

    /// Check that the configured protocol has its identity and endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidConfig`] naming the first missing field.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }

        match (&self.oauth1, &self.oauth2) {
            (None, None) => Err(invalid("either [oauth1] or [oauth2] must be present")),
            (Some(_), Some(_)) => Err(invalid("only one of [oauth1] or [oauth2] may be present")),
            (Some(oauth1), None) => validate_oauth1(oauth1),
            (None, Some(oauth2)) => validate_oauth2(oauth2),
        }
    }
}

fn validate_oauth1(settings: &OAuth1Settings) -> Result<()> {
    require("oauth1.consumer_key", &settings.consumer_key)?;
    require("oauth1.request_token_url", &settings.request_token_url)?;
    require("oauth1.authorize_url", &settings.authorize_url)?;
    require("oauth1.access_token_url", &settings.access_token_url)
}

fn validate_oauth2(settings: &OAuth2Settings) -> Result<()> {
    require("oauth2.client_id", &settings.client_id)?;
    require("oauth2.token_url", &settings.token_url)?;

    let has_pattern = settings
        .auth_url_pattern
        .as_deref()
        .is_some_and(|p| !p.is_empty());
    if !has_pattern {
        require("oauth2.authorize_url", &settings.authorize_url)?;
    }

    if settings.authorize_mode != AuthorizeMode::JsonReceiver {
        require("oauth2.cloud_service_name", &settings.cloud_service_name)?;
    }
    if settings.authorize_mode == AuthorizeMode::EmbeddedBrowser && settings.browser_size.is_none()
    {
        return Err(invalid("oauth2.browser_size is required for embedded_browser mode"));
    }
    Ok(())
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(invalid(&format!("{field} must not be empty")));
    }
    Ok(())
}

fn invalid(reason: &str) -> AuthError {
    AuthError::InvalidConfig {
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{DEFAULT_REDIRECT_TIMEOUT_SECS, TokenRequestMethod};
    use crate::signer::SignatureType;

    const OAUTH2: &str = r#"
        name = "Imgur"

        [oauth2]
        client_id = "abc"
        client_secret = "def"
        authorize_url = "https://api.imgur.com/oauth2/authorize"
        token_url = "https://api.imgur.com/oauth2/token"
        cloud_service_name = "Imgur"

        [oauth2.additional_attributes]
        scope = "upload"
    "#;

    const OAUTH1: &str = r#"
        name = "Photobucket"

        [oauth1]
        consumer_key = "ck"
        consumer_secret = "cs"
        request_token_url = "https://api.photobucket.com/login/request"
        authorize_url = "https://photobucket.com/apilogin/login"
        access_token_url = "https://api.photobucket.com/login/access"
        access_token_method = "POST"
        signature_type = "PLAINTEXT"
        check_verifier = false
    "#;

    #[test]
    fn parses_oauth2_with_defaults() {
        let config = ServiceConfig::from_toml_str(OAUTH2).unwrap();
        let oauth2 = config.oauth2.unwrap();
        assert_eq!(config.name, "Imgur");
        assert_eq!(oauth2.client_id, "abc");
        assert_eq!(oauth2.additional_attributes["scope"], "upload");
        assert_eq!(oauth2.authorize_mode, AuthorizeMode::LocalServer);
        assert_eq!(oauth2.redirect_timeout_secs, DEFAULT_REDIRECT_TIMEOUT_SECS);
        assert!(oauth2.access_token.is_empty());
        assert!(oauth2.access_token_expires.is_none());
        assert!(!oauth2.state.is_empty());
    }

    #[test]
    fn parses_oauth1_options() {
        let config = ServiceConfig::from_toml_str(OAUTH1).unwrap();
        let oauth1 = config.oauth1.unwrap();
        assert_eq!(oauth1.access_token_method, TokenRequestMethod::Post);
        assert_eq!(oauth1.request_token_method, TokenRequestMethod::Get);
        assert_eq!(oauth1.signature_type, SignatureType::Plaintext);
        assert!(!oauth1.check_verifier);
        assert!(oauth1.auto_login);
    }

    #[test]
    fn rejects_missing_protocol() {
        let err = ServiceConfig::from_toml_str(r#"name = "Nothing""#).unwrap_err();
        assert!(matches!(err, AuthError::InvalidConfig { .. }));
    }

    #[test]
    fn rejects_missing_endpoint() {
        let input = OAUTH2.replace("token_url = \"https://api.imgur.com/oauth2/token\"", "");
        let err = ServiceConfig::from_toml_str(&input).unwrap_err();
        assert!(err.to_string().contains("oauth2.token_url"));
    }

    #[test]
    fn embedded_mode_needs_browser_size() {
        let input = OAUTH2.replace(
            "cloud_service_name = \"Imgur\"",
            "cloud_service_name = \"Imgur\"\nauthorize_mode = \"embedded_browser\"",
        );
        let err = ServiceConfig::from_toml_str(&input).unwrap_err();
        assert!(err.to_string().contains("browser_size"));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        let err = ServiceConfig::from_toml_str("name = ").unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("imgur.toml");
        std::fs::write(&path, OAUTH2).unwrap();

        let config = ServiceConfig::load(&path).unwrap();
        assert_eq!(config.name, "Imgur");
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let err = ServiceConfig::load("/nonexistent/service.toml").unwrap_err();
        assert!(matches!(err, AuthError::Io(_)));
    }
}
