//! OAuth 1.0a request signing (RFC 5849).
//!
//! Pure functions for RFC 3986 percent-encoding, nonce and timestamp
//! generation, normalized parameter strings, signature base strings and
//! HMAC-SHA1 / PLAINTEXT signatures.
//!
//! # Signing Overview
//!
//! 1. The caller collects request parameters in a [`Parameters`] map.
//! 2. [`sign`] adds the protocol parameters (`oauth_nonce`,
//!    `oauth_timestamp`, `oauth_signature_method`, `oauth_version`,
//!    `oauth_consumer_key` and the optional token, verifier and callback).
//! 3. The signature base string is computed over every text parameter and
//!    the result is stored under `oauth_signature`.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AuthError, Result};

/// Prefix shared by every OAuth protocol parameter.
pub const OAUTH_PARAMETER_PREFIX: &str = "oauth_";

pub const OAUTH_VERSION_KEY: &str = "oauth_version";
pub const OAUTH_NONCE_KEY: &str = "oauth_nonce";
pub const OAUTH_TIMESTAMP_KEY: &str = "oauth_timestamp";
pub const OAUTH_SIGNATURE_METHOD_KEY: &str = "oauth_signature_method";
pub const OAUTH_CONSUMER_KEY_KEY: &str = "oauth_consumer_key";
pub const OAUTH_CALLBACK_KEY: &str = "oauth_callback";
pub const OAUTH_TOKEN_KEY: &str = "oauth_token";
pub const OAUTH_TOKEN_SECRET_KEY: &str = "oauth_token_secret";
pub const OAUTH_VERIFIER_KEY: &str = "oauth_verifier";
pub const OAUTH_SIGNATURE_KEY: &str = "oauth_signature";

const OAUTH_VERSION: &str = "1.0";

/// Nonces are drawn from `[NONCE_MIN, NONCE_MAX)`.
const NONCE_MIN: u32 = 123_400;
const NONCE_MAX: u32 = 9_999_999;

// ---------------------------------------------------------------------------
// Parameter types
// ---------------------------------------------------------------------------

/// The signature method announced in `oauth_signature_method`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureType {
    /// `Base64(HMAC-SHA1(key, base_string))`.
    #[default]
    #[serde(rename = "HMAC-SHA1")]
    HmacSha1,
    /// The signing key itself is the signature.
    #[serde(rename = "PLAINTEXT")]
    Plaintext,
}

impl SignatureType {
    /// Wire name of the signature method.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HmacSha1 => "HMAC-SHA1",
            Self::Plaintext => "PLAINTEXT",
        }
    }
}

/// A binary part sent in a multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePart {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A request parameter value.
///
/// Only [`ParamValue::Text`] values take part in the signature; file parts
/// travel in the multipart body but are left out of the base string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    File(FilePart),
}

impl ParamValue {
    /// The text value, or `None` for file parts.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            Self::File(_) => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<FilePart> for ParamValue {
    fn from(value: FilePart) -> Self {
        Self::File(value)
    }
}

/// Request parameters, ordered by key.
pub type Parameters = BTreeMap<String, ParamValue>;

/// Key material and session values that go into one signature.
#[derive(Debug, Clone, Copy)]
pub struct SigningKeys<'a> {
    pub consumer_key: &'a str,
    pub consumer_secret: &'a str,
    pub token: Option<&'a str>,
    pub token_secret: Option<&'a str>,
    pub verifier: Option<&'a str>,
    /// Only set when signing the request-token request.
    pub callback: Option<&'a str>,
    pub signature_type: SignatureType,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Percent-encode per RFC 3986 with upper-case hex digits.
///
/// Every byte of the UTF-8 encoding outside `[A-Za-z0-9-_.~]` becomes `%XX`.
pub fn percent_encode(input: &str) -> String {
    let mut encoded = String::with_capacity(input.len() * 3);
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                encoded.push(byte as char);
            }
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Build the normalized parameter string: `k=v` pairs sorted by key and
/// joined with `&`, keys and values percent-encoded.
///
/// File parts are skipped.
pub fn normalized_parameter_string(params: &Parameters) -> String {
    params
        .iter()
        .filter_map(|(key, value)| {
            value
                .as_text()
                .map(|v| format!("{}={}", percent_encode(key), percent_encode(v)))
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Normalize a URL for the base string: `scheme://host[:port]path`.
///
/// The port is kept only when it differs from the scheme default; the
/// query and fragment are dropped.
pub fn normalize_url(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    let host = parsed.host_str().ok_or_else(|| AuthError::InvalidConfig {
        reason: format!("url has no host: {url}"),
    })?;

    let mut normalized = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        normalized.push_str(&format!(":{port}"));
    }
    normalized.push_str(parsed.path());
    Ok(normalized)
}

/// `METHOD&encoded(normalized url)&encoded(normalized parameters)`.
pub fn signature_base_string(method: &str, url: &str, params: &Parameters) -> Result<String> {
    Ok(format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(&normalize_url(url)?),
        percent_encode(&normalized_parameter_string(params))
    ))
}

// ---------------------------------------------------------------------------
// Nonce and timestamp
// ---------------------------------------------------------------------------

/// Generate a numeric nonce.
///
/// # Errors
///
/// Returns an error if the system random source fails.
pub fn generate_nonce() -> Result<String> {
    let rng = SystemRandom::new();
    let mut bytes = [0u8; 4];
    rng.fill(&mut bytes).map_err(|_| AuthError::FlowFailed {
        reason: "failed to generate OAuth nonce: random source error".to_string(),
    })?;
    let value = NONCE_MIN + u32::from_le_bytes(bytes) % (NONCE_MAX - NONCE_MIN);
    Ok(value.to_string())
}

/// Current Unix time in seconds.
pub fn generate_timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

/// Sign a request, adding the protocol parameters and `oauth_signature` to
/// `params`.
///
/// # Errors
///
/// Returns an error if `url` cannot be parsed or no nonce can be generated.
pub fn sign(method: &str, url: &str, params: &mut Parameters, keys: &SigningKeys<'_>) -> Result<()> {
    let nonce = generate_nonce()?;
    let timestamp = generate_timestamp();
    sign_with(method, url, params, keys, &nonce, &timestamp)
}

/// Like [`sign`], with a caller-supplied nonce and timestamp.
pub fn sign_with(
    method: &str,
    url: &str,
    params: &mut Parameters,
    keys: &SigningKeys<'_>,
    nonce: &str,
    timestamp: &str,
) -> Result<()> {
    params.insert(OAUTH_VERSION_KEY.to_string(), OAUTH_VERSION.into());
    params.insert(OAUTH_NONCE_KEY.to_string(), nonce.into());
    params.insert(OAUTH_TIMESTAMP_KEY.to_string(), timestamp.into());
    params.insert(
        OAUTH_SIGNATURE_METHOD_KEY.to_string(),
        keys.signature_type.as_str().into(),
    );
    params.insert(OAUTH_CONSUMER_KEY_KEY.to_string(), keys.consumer_key.into());

    if let Some(callback) = keys.callback.filter(|c| !c.is_empty()) {
        params.insert(OAUTH_CALLBACK_KEY.to_string(), callback.into());
    }
    if let Some(verifier) = keys.verifier.filter(|v| !v.is_empty()) {
        params.insert(OAUTH_VERIFIER_KEY.to_string(), verifier.into());
    }
    if let Some(token) = keys.token.filter(|t| !t.is_empty()) {
        params.insert(OAUTH_TOKEN_KEY.to_string(), token.into());
    }

    let signing_key = format!(
        "{}&{}",
        percent_encode(keys.consumer_secret),
        percent_encode(keys.token_secret.unwrap_or_default())
    );

    let signature = match keys.signature_type {
        SignatureType::Plaintext => signing_key,
        SignatureType::HmacSha1 => {
            let base_string = signature_base_string(method, url, params)?;
            tracing::trace!(base_string = %base_string, "computed OAuth signature base string");
            hmac_sha1_base64(&signing_key, &base_string)
        }
    };

    params.insert(OAUTH_SIGNATURE_KEY.to_string(), signature.into());
    Ok(())
}

fn hmac_sha1_base64(key: &str, data: &str) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key.as_bytes());
    let tag = hmac::sign(&key, data.as_bytes());
    STANDARD.encode(tag.as_ref())
}

/// Remove every `oauth_*` parameter so a retry is signed from scratch.
pub fn strip_oauth_parameters(params: &mut Parameters) {
    params.retain(|key, _| !key.starts_with(OAUTH_PARAMETER_PREFIX));
}

/// Build the `Authorization: OAuth ...` header value from the `oauth_*`
/// text parameters in `params`.
pub fn authorization_header(params: &Parameters) -> String {
    let parts: Vec<String> = params
        .iter()
        .filter(|(key, _)| key.starts_with(OAUTH_PARAMETER_PREFIX))
        .filter_map(|(key, value)| {
            value
                .as_text()
                .map(|v| format!("{}=\"{}\"", key, percent_encode(v)))
        })
        .collect();
    format!("OAuth {}", parts.join(", "))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
