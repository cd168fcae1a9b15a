//! Error types for the credential acquisition crate.
//!
//! All operations surface errors through [`AuthError`], the single error
//! type for this crate. Each variant carries enough context for callers to
//! decide whether to retry, re-authorize, or report to the user.
//!
//! Two outcomes that look like failures are not errors:
//! an `invalid_grant` answer to a refresh request clears the token state
//! instead, and a loopback wait that times out yields `Ok(None)`.

/// Unified error type for the Snapshare auth crate.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The request-token, authorize, or token endpoint could not be reached.
    #[error("service is not available: {reason}")]
    ServiceUnavailable {
        /// What went wrong while contacting the service.
        reason: String,
    },

    /// The service answered HTTP 401.
    #[error("unauthorized request to {url}")]
    Unauthorized {
        /// The URL that rejected the credentials.
        url: String,
    },

    /// The user explicitly declined the authorization request.
    #[error("access denied: {reason}")]
    AccessDenied {
        /// Description reported by the service, or the bare error code.
        reason: String,
    },

    /// A token endpoint or redirect reported an OAuth `error`.
    #[error("{}", description.as_deref().unwrap_or(error.as_str()))]
    Protocol {
        /// The OAuth error code (e.g. `invalid_request`).
        error: String,
        /// The human-readable `error_description`, if the service sent one.
        description: Option<String>,
    },

    /// The service answered with a non-success status other than 401.
    #[error("request failed with HTTP {status}: {body}")]
    RequestFailed {
        /// HTTP status code.
        status: u16,
        /// Response body as returned by the service.
        body: String,
    },

    /// Required settings are missing or malformed.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// The OAuth1 authorize step was reached without a request token.
    #[error("the request token is not set")]
    RequestTokenMissing,

    /// The user closed the authorization page or the wait timed out.
    #[error("authentication cancelled")]
    AuthenticationCancelled,

    /// Authorization completed but no usable access token was obtained.
    #[error("authentication failed")]
    AuthenticationFailed,

    /// The flow failed for a non-specific reason (malformed callback,
    /// state mismatch, missing response fields).
    #[error("authentication flow failed: {reason}")]
    FlowFailed {
        /// Details about why the flow failed.
        reason: String,
    },

    /// Transport-level HTTP error.
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error (loopback listener sockets, browser process spawn).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// URL parsing error.
    #[error("url parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// TOML configuration could not be parsed.
    #[error("config parse error: {0}")]
    Config(#[from] toml::de::Error),
}

impl AuthError {
    /// Build a [`AuthError::Protocol`] from an OAuth error response.
    pub(crate) fn protocol(error: impl Into<String>, description: Option<String>) -> Self {
        Self::Protocol {
            error: error.into(),
            description: description.filter(|d| !d.is_empty()),
        }
    }

    /// Whether the failure was an HTTP 401 from the service.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_prefers_description() {
        let err = AuthError::protocol("invalid_request", Some("Missing client_id".to_string()));
        assert_eq!(err.to_string(), "Missing client_id");
    }

    #[test]
    fn protocol_error_falls_back_to_code() {
        let err = AuthError::protocol("temporarily_unavailable", None);
        assert_eq!(err.to_string(), "temporarily_unavailable");
    }

    #[test]
    fn protocol_error_ignores_empty_description() {
        let err = AuthError::protocol("server_error", Some(String::new()));
        assert_eq!(err.to_string(), "server_error");
    }

    #[test]
    fn error_display_unauthorized() {
        let err = AuthError::Unauthorized {
            url: "https://api.example.com/upload".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unauthorized request to https://api.example.com/upload"
        );
        assert!(err.is_unauthorized());
    }

    #[test]
    fn error_display_request_failed() {
        let err = AuthError::RequestFailed {
            status: 503,
            body: "down".to_string(),
        };
        assert_eq!(err.to_string(), "request failed with HTTP 503: down");
        assert!(!err.is_unauthorized());
    }

    #[test]
    fn error_display_service_unavailable() {
        let err = AuthError::ServiceUnavailable {
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "service is not available: connection refused"
        );
    }

    #[test]
    fn error_display_invalid_config() {
        let err = AuthError::InvalidConfig {
            reason: "missing client_id".to_string(),
        };
        assert_eq!(err.to_string(), "invalid configuration: missing client_id");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuthError>();
    }
}
