//! HTTP request execution for signed OAuth calls and token endpoints.
//!
//! [`HttpExecutor`] wraps a `reqwest` client. It sends [`PreparedRequest`]s
//! and classifies failures: HTTP 401 becomes [`AuthError::Unauthorized`] so
//! the OAuth1 session can re-authorize, any other non-success status becomes
//! [`AuthError::RequestFailed`] with the status and body.

use std::time::Duration;

use reqwest::Method;
use reqwest::multipart::{Form, Part};
use url::Url;

use crate::error::{AuthError, Result};
use crate::signer::{self, OAUTH_PARAMETER_PREFIX, ParamValue, Parameters};

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// User agent sent with every request.
const USER_AGENT: &str = concat!("Snapshare/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

/// Body of an outgoing request.
#[derive(Debug, Clone, Default)]
pub enum RequestBody {
    /// No body.
    #[default]
    Empty,
    /// `application/x-www-form-urlencoded` pairs.
    Form(Vec<(String, String)>),
    /// `multipart/form-data`; file parts become file fields.
    Multipart(Vec<(String, ParamValue)>),
    /// Raw upload with an explicit content type.
    Binary { content_type: String, data: Vec<u8> },
}

/// A fully assembled request, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: RequestBody,
}

impl PreparedRequest {
    /// A request with no headers and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: RequestBody::Empty,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Replace the body.
    pub fn body(mut self, body: RequestBody) -> Self {
        self.body = body;
        self
    }
}

/// Status and body of a completed request.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    /// Whether the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

// ---------------------------------------------------------------------------
// OAuth1 request assembly
// ---------------------------------------------------------------------------

/// Options controlling where signed OAuth1 parameters travel.
#[derive(Debug, Clone, Copy)]
pub struct OAuth1RequestOptions {
    /// Send `oauth_*` parameters in an `Authorization: OAuth` header
    /// instead of the query string or form body.
    pub use_authorization_header: bool,
    /// Encode POST parameters as multipart instead of url-encoded.
    pub use_multipart: bool,
}

impl Default for OAuth1RequestOptions {
    fn default() -> Self {
        Self {
            use_authorization_header: true,
            use_multipart: false,
        }
    }
}

/// Assemble a request from signed parameters.
///
/// - With `use_authorization_header`, the `oauth_*` parameters become the
///   `Authorization` header and are removed from the remaining parameters.
/// - GET/DELETE (and any request carrying a `binary` payload) put the
///   remaining text parameters in the query string.
/// - POST/PUT without a payload put them in a url-encoded or multipart body.
///
/// # Errors
///
/// Returns [`AuthError::UrlParse`] if `request_url` is not a valid URL.
pub fn prepare_oauth1_request(
    method: Method,
    request_url: &str,
    mut params: Parameters,
    headers: &[(String, String)],
    binary: Option<(String, Vec<u8>)>,
    options: OAuth1RequestOptions,
) -> Result<PreparedRequest> {
    let mut prepared = PreparedRequest::new(method.clone(), request_url);
    prepared.headers.extend(headers.iter().cloned());

    if options.use_authorization_header {
        prepared
            .headers
            .push(("Authorization".to_string(), signer::authorization_header(&params)));
        params.retain(|key, _| !key.starts_with(OAUTH_PARAMETER_PREFIX));
    }

    let sends_params_in_query =
        binary.is_some() || method == Method::GET || method == Method::DELETE;

    if sends_params_in_query {
        let mut url = Url::parse(request_url)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &params {
                if let Some(text) = value.as_text() {
                    pairs.append_pair(key, text);
                }
            }
        }
        // `query_pairs_mut` leaves a dangling `?` when nothing was appended.
        if url.query() == Some("") {
            url.set_query(None);
        }
        prepared.url = url.to_string();
        if let Some((content_type, data)) = binary {
            prepared.body = RequestBody::Binary { content_type, data };
        }
    } else if options.use_multipart || params.values().any(|v| v.as_text().is_none()) {
        prepared.body = RequestBody::Multipart(params.into_iter().collect());
    } else if !params.is_empty() {
        prepared.body = RequestBody::Form(
            params
                .into_iter()
                .filter_map(|(key, value)| value.as_text().map(|v| (key.clone(), v.to_string())))
                .collect(),
        );
    }

    Ok(prepared)
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

/// Sends prepared requests over a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    client: reqwest::Client,
}

impl Default for HttpExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpExecutor {
    /// Create an executor with the default timeout and user agent.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .unwrap_or_default();
        Self { client }
    }

    /// Create an executor around an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Send a request and return status and body without classifying the
    /// status.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Network`] on transport failure.
    pub async fn send(&self, request: PreparedRequest) -> Result<HttpResponse> {
        let PreparedRequest {
            method,
            url,
            headers,
            body,
        } = request;

        tracing::debug!(method = %method, url = %url, "sending request");

        let mut builder = self.client.request(method, &url);
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match body {
            RequestBody::Empty => builder,
            RequestBody::Form(pairs) => builder.form(&pairs),
            RequestBody::Multipart(fields) => builder.multipart(multipart_form(fields)?),
            RequestBody::Binary { content_type, data } => builder
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(data),
        };

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        tracing::debug!(status, url = %url, "received response");
        Ok(HttpResponse { status, body })
    }

    /// Send a request and return the body of a successful response.
    ///
    /// # Errors
    ///
    /// - [`AuthError::Unauthorized`] for HTTP 401.
    /// - [`AuthError::RequestFailed`] for any other non-success status.
    /// - [`AuthError::Network`] on transport failure.
    pub async fn execute(&self, request: PreparedRequest) -> Result<String> {
        let url = request.url.clone();
        let response = self.send(request).await?;
        classify(&url, response)
    }
}

/// Map a response to its body or the matching error.
pub(crate) fn classify(url: &str, response: HttpResponse) -> Result<String> {
    if response.is_success() {
        Ok(response.body)
    } else {
        Err(status_error(url, response))
    }
}

/// The error for a non-success response.
pub(crate) fn status_error(url: &str, response: HttpResponse) -> AuthError {
    match response.status {
        401 => {
            tracing::warn!(url = %url, "request was rejected as unauthorized");
            AuthError::Unauthorized {
                url: url.to_string(),
            }
        }
        status => AuthError::RequestFailed {
            status,
            body: response.body,
        },
    }
}

fn multipart_form(fields: Vec<(String, ParamValue)>) -> Result<Form> {
    let mut form = Form::new();
    for (name, value) in fields {
        form = match value {
            ParamValue::Text(text) => form.text(name, text),
            ParamValue::File(file) => {
                let part = Part::bytes(file.data)
                    .file_name(file.file_name)
                    .mime_str(&file.content_type)?;
                form.part(name, part)
            }
        };
    }
    Ok(form)
}

/// Parse an `application/x-www-form-urlencoded` body into key/value pairs.
///
/// The first occurrence of a key wins.
pub fn parse_form_body(body: &str) -> std::collections::HashMap<String, String> {
    let mut params = std::collections::HashMap::new();
    for (key, value) in url::form_urlencoded::parse(body.trim().as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
