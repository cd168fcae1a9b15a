//! Loopback HTTP listener that captures an authorization redirect.
//!
//! When authorization completes in the browser, the service redirects to
//! `http://localhost:{port}/authorize/`. This module binds a minimal server
//! on a free loopback port, serves requests until one carries the capture,
//! hands the captured parameters to the waiting flow and shuts down.
//!
//! # Flow Overview
//!
//! 1. [`LoopbackListener::start`] picks a free port, binds and starts the
//!    accept loop. The redirect URI is available immediately.
//! 2. [`LoopbackListener::wait_for_capture`] opens the browser and awaits a
//!    one-shot channel with a timeout.
//! 3. Each connection is handled on its own task:
//!    - `OPTIONS` (CORS preflight) is answered and listening continues.
//!    - [`CaptureMode::QueryString`] releases on the first other request.
//!    - [`CaptureMode::Json`] releases on the first request with a body.
//! 4. The listener is stopped on every exit path, and on drop.
//!
//! Uses raw [`tokio::net::TcpListener`]; redirects are tiny requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};

use crate::browser::BrowserLauncher;
use crate::error::{AuthError, Result};

/// Parameters captured from a redirect query string or JSON body.
pub type CallbackResult = HashMap<String, String>;

/// Path the redirect URI points at.
pub const REDIRECT_PATH: &str = "/authorize/";

/// Placeholder in the landing page replaced by the service display name.
pub const SERVICE_NAME_PLACEHOLDER: &str = "CLOUD_SERVICE_NAME";

/// Upper bound on a request's header section.
const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Upper bound on a JSON body.
const MAX_BODY_BYTES: usize = 256 * 1024;

/// How long a single connection may take to deliver its request.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// CORS preflight cache lifetime, in seconds (20 days).
const CORS_MAX_AGE_SECS: u32 = 1_728_000;

/// Page served after a query-string capture. Closes its own tab.
const LANDING_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="utf-8">
    <title>Snapshare authorization</title>
    <style>
        body {
            font-family: -apple-system, BlinkMacSystemFont, "Segoe UI", Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            background: #f5f5f5;
            color: #333;
        }
        .card {
            text-align: center;
            padding: 3rem;
            background: white;
            border-radius: 12px;
            box-shadow: 0 2px 10px rgba(0,0,0,0.08);
        }
    </style>
    <script>window.setTimeout(function () { window.close(); }, 1500);</script>
</head>
<body>
    <div class="card">
        <h1>CLOUD_SERVICE_NAME</h1>
        <p>Snapshare received the authorization. You can close this tab.</p>
    </div>
</body>
</html>"#;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Which kind of request completes the capture.
#[derive(Debug, Clone)]
pub enum CaptureMode {
    /// Standard OAuth2 redirect: parameters arrive in the query string.
    QueryString {
        /// Substituted into the landing page.
        service_name: String,
    },
    /// A static page POSTs the parameters as a JSON object.
    Json {
        /// Reported back as `{"version": ...}`.
        app_version: String,
    },
}

/// Lifecycle of a [`LoopbackListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Idle,
    Listening,
    CaptureReceived,
    TimedOut,
    Errored,
    Closed,
}

/// Sender shared by connection handlers; taken by the first capture.
type ReleaseSlot = Arc<Mutex<Option<oneshot::Sender<CallbackResult>>>>;

#[derive(Debug, Clone)]
struct SharedState(Arc<Mutex<ListenerState>>);

impl SharedState {
    fn get(&self) -> ListenerState {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, next: ListenerState) {
        let mut state = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        // Nothing leaves Closed.
        if *state == ListenerState::Closed {
            return;
        }
        if *state != next {
            tracing::debug!(from = ?*state, to = ?next, "loopback listener state changed");
            *state = next;
        }
    }
}

// ---------------------------------------------------------------------------
// Listener
// ---------------------------------------------------------------------------

/// A loopback HTTP server that captures one authorization redirect.
pub struct LoopbackListener {
    port: u16,
    redirect_uri: String,
    state: SharedState,
    receiver: Option<oneshot::Receiver<CallbackResult>>,
    task: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for LoopbackListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackListener")
            .field("redirect_uri", &self.redirect_uri)
            .field("state", &self.state.get())
            .finish()
    }
}

impl LoopbackListener {
    /// Bind to a free loopback port and start serving.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Io`] if no port can be bound.
    pub async fn start(mode: CaptureMode) -> Result<Self> {
        let state = SharedState(Arc::new(Mutex::new(ListenerState::Idle)));

        let port = free_loopback_port()?;
        let listener = match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                state.set(ListenerState::Errored);
                return Err(e.into());
            }
        };
        let redirect_uri = format!("http://localhost:{port}{REDIRECT_PATH}");

        let (sender, receiver) = oneshot::channel();
        let slot: ReleaseSlot = Arc::new(Mutex::new(Some(sender)));
        let mode = Arc::new(mode);

        state.set(ListenerState::Listening);
        tracing::info!(redirect_uri = %redirect_uri, "loopback listener started");

        let task = tokio::spawn(accept_loop(listener, mode, slot, state.clone()));

        Ok(Self {
            port,
            redirect_uri,
            state,
            receiver: Some(receiver),
            task: Some(task),
        })
    }

    /// The URI the service must redirect to.
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn state(&self) -> ListenerState {
        self.state.get()
    }

    /// Open `authorize_url` in the browser and wait for the capture.
    ///
    /// Returns `Ok(None)` when `timeout` elapses first. The listener is
    /// stopped before returning, whatever the outcome.
    ///
    /// # Errors
    ///
    /// - Any error from the browser launcher.
    /// - [`AuthError::FlowFailed`] if the wait was already consumed or the
    ///   accept loop died.
    pub async fn wait_for_capture(
        &mut self,
        browser: &dyn BrowserLauncher,
        authorize_url: &str,
        timeout: Duration,
    ) -> Result<Option<CallbackResult>> {
        let result = self.wait_inner(browser, authorize_url, timeout).await;
        self.stop();
        result
    }

    async fn wait_inner(
        &mut self,
        browser: &dyn BrowserLauncher,
        authorize_url: &str,
        timeout: Duration,
    ) -> Result<Option<CallbackResult>> {
        let receiver = self.receiver.take().ok_or_else(|| AuthError::FlowFailed {
            reason: "loopback listener was already waited on".to_string(),
        })?;

        if let Err(e) = browser.open(authorize_url) {
            self.state.set(ListenerState::Errored);
            return Err(e);
        }

        match tokio::time::timeout(timeout, receiver).await {
            Ok(Ok(result)) => Ok(Some(result)),
            Ok(Err(_)) => {
                self.state.set(ListenerState::Errored);
                Err(AuthError::FlowFailed {
                    reason: "loopback listener stopped before a redirect arrived".to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = timeout.as_secs(),
                    "no authorization redirect before timeout"
                );
                self.state.set(ListenerState::TimedOut);
                Ok(None)
            }
        }
    }

    /// Stop serving and release the port. Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            self.state.set(ListenerState::Closed);
            tracing::debug!(port = self.port, "loopback listener stopped");
        }
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Find a free loopback port by binding port 0 and closing the socket.
///
/// # Errors
///
/// Returns [`AuthError::Io`] if the probe socket cannot be bound.
pub fn free_loopback_port() -> Result<u16> {
    let probe = std::net::TcpListener::bind(("127.0.0.1", 0))?;
    Ok(probe.local_addr()?.port())
}

async fn accept_loop(
    listener: TcpListener,
    mode: Arc<CaptureMode>,
    slot: ReleaseSlot,
    state: SharedState,
) {
    // Dropping the set (on abort) cancels in-flight connections too.
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tracing::debug!(peer = %peer, "accepted loopback connection");
                    let mode = Arc::clone(&mode);
                    let slot = Arc::clone(&slot);
                    let state = state.clone();
                    connections.spawn(async move {
                        if let Err(e) = handle_connection(stream, &mode, &slot, &state).await {
                            tracing::warn!(error = %e, "failed to handle loopback request");
                        }
                    });
                }
                Err(e) => {
                    tracing::error!(error = %e, "loopback listener accept failed");
                    state.set(ListenerState::Errored);
                    return;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Request handling
// ---------------------------------------------------------------------------

/// The parts of an HTTP request the listener looks at.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Request {
    method: String,
    target: String,
    body: Vec<u8>,
}

impl Request {
    fn query(&self) -> &str {
        self.target
            .split_once('?')
            .map(|(_, q)| q)
            .unwrap_or_default()
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    mode: &CaptureMode,
    slot: &ReleaseSlot,
    state: &SharedState,
) -> Result<()> {
    let request = tokio::time::timeout(READ_TIMEOUT, read_request(&mut stream))
        .await
        .map_err(|_| AuthError::FlowFailed {
            reason: "timed out reading loopback request".to_string(),
        })??;

    tracing::debug!(method = %request.method, "loopback request received");

    let (response, capture) = respond(&request, mode);
    stream.write_all(&response).await?;
    stream.flush().await?;
    // The response is on the wire before the flow sees the capture.
    drop(stream);

    if let Some(result) = capture {
        release(slot, state, result);
    }
    Ok(())
}

/// Build the response for one request and decide whether it completes the
/// capture.
fn respond(request: &Request, mode: &CaptureMode) -> (Vec<u8>, Option<CallbackResult>) {
    if request.method.eq_ignore_ascii_case("OPTIONS") {
        return (preflight_response(), None);
    }

    match mode {
        CaptureMode::QueryString { service_name } => {
            let page = LANDING_PAGE.replace(SERVICE_NAME_PLACEHOLDER, &html_escape(service_name));
            let capture = parse_query(request.query());
            (
                http_response("200 OK", "text/html; charset=utf-8", &[], page.as_bytes()),
                Some(capture),
            )
        }
        CaptureMode::Json { app_version } => {
            let cors = [("Access-Control-Allow-Origin", "*")];
            if request.body.is_empty() {
                return (http_response("200 OK", "text/plain", &cors, b""), None);
            }
            match parse_json_body(&request.body) {
                Ok(capture) => {
                    let ack = serde_json::json!({ "version": app_version }).to_string();
                    (
                        http_response("200 OK", "application/json", &cors, ack.as_bytes()),
                        Some(capture),
                    )
                }
                Err(e) => {
                    tracing::warn!(error = %e, "ignoring malformed JSON capture");
                    (http_response("400 Bad Request", "text/plain", &cors, b""), None)
                }
            }
        }
    }
}

fn release(slot: &ReleaseSlot, state: &SharedState, result: CallbackResult) {
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    match sender {
        Some(sender) => {
            state.set(ListenerState::CaptureReceived);
            if sender.send(result).is_err() {
                tracing::debug!("capture arrived after the wait ended");
            } else {
                tracing::info!("authorization redirect captured");
            }
        }
        None => tracing::debug!("ignoring capture after release"),
    }
}

/// Read the request line, headers and a `Content-Length` body.
async fn read_request(stream: &mut TcpStream) -> Result<Request> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find_header_end(&buf) {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Err(malformed("header section too large"));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(malformed("connection closed before headers were complete"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).into_owned();
    let (method, target, content_length) = parse_head(&head)?;
    if content_length > MAX_BODY_BYTES {
        return Err(malformed("request body too large"));
    }

    let mut body = buf.split_off(header_end + 4);
    while body.len() < content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(content_length);

    Ok(Request {
        method,
        target,
        body,
    })
}

fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Parse `METHOD TARGET VERSION` plus the `Content-Length` header.
fn parse_head(head: &str) -> Result<(String, String, usize)> {
    let mut lines = head.lines();
    let request_line = lines.next().ok_or_else(|| malformed("empty HTTP request"))?;

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(malformed(&format!("malformed request line: {request_line}")));
    };

    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .map(|(_, value)| {
            value
                .trim()
                .parse::<usize>()
                .map_err(|_| malformed("invalid Content-Length"))
        })
        .transpose()?
        .unwrap_or(0);

    Ok((method.to_string(), target.to_string(), content_length))
}

/// Decode a query string; the first occurrence of a key wins.
fn parse_query(query: &str) -> CallbackResult {
    let mut result = CallbackResult::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        result
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    result
}

/// Flatten a JSON object into string values. Nulls are dropped, other
/// scalars and nested values keep their JSON text.
fn parse_json_body(body: &[u8]) -> Result<CallbackResult> {
    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_slice(body)?;
    Ok(object
        .into_iter()
        .filter_map(|(key, value)| match value {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some((key, s)),
            other => Some((key, other.to_string())),
        })
        .collect())
}

fn preflight_response() -> Vec<u8> {
    let max_age = CORS_MAX_AGE_SECS.to_string();
    http_response(
        "200 OK",
        "text/plain",
        &[
            ("Access-Control-Allow-Origin", "*"),
            ("Access-Control-Allow-Headers", "Content-Type"),
            ("Access-Control-Allow-Methods", "POST"),
            ("Access-Control-Max-Age", &max_age),
        ],
        b"",
    )
}

fn http_response(
    status: &str,
    content_type: &str,
    headers: &[(&str, &str)],
    body: &[u8],
) -> Vec<u8> {
    let mut head = format!(
        "HTTP/1.1 {status}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let mut response = head.into_bytes();
    response.extend_from_slice(body);
    response
}

fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn malformed(reason: &str) -> AuthError {
    AuthError::FlowFailed {
        reason: reason.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingBrowser(Mutex<Vec<String>>);

    impl RecordingBrowser {
        fn new() -> Self {
            Self(Mutex::new(Vec::new()))
        }
    }

    impl BrowserLauncher for RecordingBrowser {
        fn open(&self, url: &str) -> Result<()> {
            self.0.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    async fn send_raw(port: u16, request: String) -> String {
        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.unwrap();
        String::from_utf8_lossy(&response).into_owned()
    }

    fn request(method: &str, target: &str, body: &str) -> Request {
        Request {
            method: method.to_string(),
            target: target.to_string(),
            body: body.as_bytes().to_vec(),
        }
    }

    fn json_mode() -> CaptureMode {
        CaptureMode::Json {
            app_version: "1.2.3".to_string(),
        }
    }

    #[test]
    fn parse_head_standard() {
        let (method, target, len) =
            parse_head("POST /authorize/ HTTP/1.1\r\nHost: x\r\ncontent-length: 12").unwrap();
        assert_eq!(method, "POST");
        assert_eq!(target, "/authorize/");
        assert_eq!(len, 12);
    }

    #[test]
    fn parse_head_without_body() {
        let (method, target, len) =
            parse_head("GET /authorize/?code=abc HTTP/1.1\r\nHost: x").unwrap();
        assert_eq!(method, "GET");
        assert_eq!(target, "/authorize/?code=abc");
        assert_eq!(len, 0);
    }

    #[test]
    fn parse_head_malformed() {
        assert!(parse_head("").is_err());
        assert!(parse_head("NOTHTTP").is_err());
        assert!(parse_head("POST / HTTP/1.1\r\nContent-Length: lots").is_err());
    }

    #[test]
    fn parse_query_first_occurrence_wins() {
        let result = parse_query("code=first&state=s%20t&code=second");
        assert_eq!(result["code"], "first");
        assert_eq!(result["state"], "s t");
    }

    #[test]
    fn parse_query_empty() {
        assert!(parse_query("").is_empty());
    }

    #[test]
    fn parse_json_body_flattens_scalars() {
        let result =
            parse_json_body(br#"{"access_token":"AT","expires_in":3600,"skip":null}"#).unwrap();
        assert_eq!(result["access_token"], "AT");
        assert_eq!(result["expires_in"], "3600");
        assert!(!result.contains_key("skip"));
    }

    #[test]
    fn parse_json_body_rejects_non_objects() {
        assert!(parse_json_body(b"[1,2]").is_err());
        assert!(parse_json_body(b"not json").is_err());
    }

    #[test]
    fn preflight_does_not_capture() {
        let (response, capture) = respond(&request("OPTIONS", "/authorize/", ""), &json_mode());
        let response = String::from_utf8(response).unwrap();
        assert!(capture.is_none());
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("Access-Control-Allow-Methods: POST"));
        assert!(response.contains("Access-Control-Allow-Headers: Content-Type"));
        assert!(response.contains("Access-Control-Max-Age: 1728000"));
    }

    #[test]
    fn json_mode_ignores_empty_body() {
        let (response, capture) = respond(&request("POST", "/authorize/", ""), &json_mode());
        assert!(capture.is_none());
        assert!(
            String::from_utf8(response)
                .unwrap()
                .contains("Access-Control-Allow-Origin: *")
        );
    }

    #[test]
    fn json_mode_acknowledges_with_version() {
        let (response, capture) =
            respond(&request("POST", "/authorize/", r#"{"code":"c1"}"#), &json_mode());
        let response = String::from_utf8(response).unwrap();
        assert_eq!(capture.unwrap()["code"], "c1");
        assert!(response.contains("Access-Control-Allow-Origin: *"));
        assert!(response.ends_with(r#"{"version":"1.2.3"}"#));
    }

    #[test]
    fn query_mode_captures_even_empty_query() {
        let mode = CaptureMode::QueryString {
            service_name: "Box <Cloud>".to_string(),
        };
        let (response, capture) = respond(&request("GET", "/authorize/", ""), &mode);
        let response = String::from_utf8(response).unwrap();
        assert!(capture.unwrap().is_empty());
        assert!(response.contains("Box &lt;Cloud&gt;"));
        assert!(!response.contains(SERVICE_NAME_PLACEHOLDER));
    }

    #[test]
    fn free_port_is_nonzero() {
        assert_ne!(free_loopback_port().unwrap(), 0);
    }

    #[tokio::test]
    async fn query_listener_captures_redirect() {
        let mut listener = LoopbackListener::start(CaptureMode::QueryString {
            service_name: "Imgur".to_string(),
        })
        .await
        .unwrap();
        let port = listener.port();
        assert_eq!(listener.state(), ListenerState::Listening);
        assert_eq!(
            listener.redirect_uri(),
            format!("http://localhost:{port}/authorize/")
        );

        let client = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            send_raw(
                port,
                "GET /authorize/?code=abc123&state=s1 HTTP/1.1\r\nHost: localhost\r\n\r\n"
                    .to_string(),
            )
            .await
        });

        let browser = RecordingBrowser::new();
        let result = listener
            .wait_for_capture(&browser, "https://auth.example.com/o", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        let response = client.await.unwrap();
        assert!(response.contains("200 OK"));
        assert!(response.contains("Imgur"));
        assert_eq!(result["code"], "abc123");
        assert_eq!(result["state"], "s1");
        assert_eq!(
            browser.0.lock().unwrap().as_slice(),
            ["https://auth.example.com/o".to_string()]
        );
        assert_eq!(listener.state(), ListenerState::Closed);
    }

    #[tokio::test]
    async fn json_listener_releases_once_after_preflight() {
        let mut listener = LoopbackListener::start(json_mode()).await.unwrap();
        let port = listener.port();

        let client = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let preflight = send_raw(
                port,
                "OPTIONS /authorize/ HTTP/1.1\r\nHost: localhost\r\n\r\n".to_string(),
            )
            .await;
            let body = r#"{"access_token":"AT","refresh_token":"RT","expires_in":60}"#;
            let post = send_raw(
                port,
                format!(
                    "POST /authorize/ HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
                    body.len()
                ),
            )
            .await;
            (preflight, post)
        });

        let browser = RecordingBrowser::new();
        let result = listener
            .wait_for_capture(&browser, "https://static.example.com/", Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();

        let (preflight, post) = client.await.unwrap();
        assert!(preflight.contains("Access-Control-Max-Age"));
        assert!(post.contains(r#"{"version":"1.2.3"}"#));
        assert_eq!(result["access_token"], "AT");
        assert_eq!(result["refresh_token"], "RT");
        assert_eq!(result["expires_in"], "60");
    }

    #[tokio::test]
    async fn release_happens_once() {
        let (sender, mut receiver) = oneshot::channel();
        let slot: ReleaseSlot = Arc::new(Mutex::new(Some(sender)));
        let state = SharedState(Arc::new(Mutex::new(ListenerState::Listening)));

        let mut first = CallbackResult::new();
        first.insert("code".to_string(), "one".to_string());
        let mut second = CallbackResult::new();
        second.insert("code".to_string(), "two".to_string());

        release(&slot, &state, first);
        release(&slot, &state, second);

        assert_eq!(receiver.try_recv().unwrap()["code"], "one");
        assert_eq!(state.get(), ListenerState::CaptureReceived);
    }

    #[tokio::test]
    async fn wait_times_out_with_none() {
        let mut listener = LoopbackListener::start(json_mode()).await.unwrap();
        let browser = RecordingBrowser::new();
        let result = listener
            .wait_for_capture(&browser, "https://static.example.com/", Duration::from_millis(100))
            .await
            .unwrap();
        assert!(result.is_none());
        assert_eq!(listener.state(), ListenerState::Closed);
    }

    #[tokio::test]
    async fn second_wait_is_rejected() {
        let mut listener = LoopbackListener::start(json_mode()).await.unwrap();
        let browser = RecordingBrowser::new();
        let _ = listener
            .wait_for_capture(&browser, "https://x.example.com/", Duration::from_millis(10))
            .await;
        let second = listener
            .wait_for_capture(&browser, "https://x.example.com/", Duration::from_millis(10))
            .await;
        assert!(matches!(second, Err(AuthError::FlowFailed { .. })));
    }

    #[test]
    fn listener_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LoopbackListener>();
    }
}
