//! Browser-facing HTTP proxy.
//!
//! A small hand-rolled HTTP/1.1 server: one task per connection, one request
//! per connection, `Connection: close` on every response. Request heads are
//! parsed with `httparse` and the body is read by `Content-Length`.
//!
//! ## Routes
//! - `GET  /api/health`
//! - `POST /api/chat/qna`: camelCase browser request, re-sent as the backend's snake_case body
//! - `GET|POST /api/chat/{path..}`: forwarded to `{backend_url}/api/chat/{path..}`
//! - `GET  /api/chats`, `POST /api/chat/new`, `PATCH /api/chat/{id}/title`: in-memory sessions
//! - `OPTIONS *`: CORS preflight

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::config::{join_url, Config};
use crate::error::ChatError;
use crate::protocol::{BackendChatRequest, ChatRequest, ErrorEnvelope};
use crate::sessions::{create_session, list_sessions, new_session_store, rename_session, SessionStore};

pub const SERVICE_NAME: &str = "multichat-proxy";

const MAX_HEAD_BYTES: usize = 16 * 1024;
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
const MAX_HEADERS: usize = 64;

/// Shared by every connection task.
#[derive(Debug, Clone)]
pub struct ProxyState {
    client: reqwest::Client,
    backend_url: String,
    sessions: SessionStore,
}

impl ProxyState {
    pub fn new(config: &Config) -> Result<Self, ChatError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::transport(&config.backend_url, e))?;
        Ok(ProxyState {
            client,
            backend_url: config.backend_url.clone(),
            sessions: new_session_store(),
        })
    }

    pub fn backend_url(&self) -> &str {
        &self.backend_url
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}

/// One parsed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyRequest {
    pub method: String,
    pub path: String,
    /// Raw query string without the `?`; empty when absent.
    pub query: String,
    pub body: Vec<u8>,
}

impl ProxyRequest {
    pub fn new(method: &str, target: &str, body: impl Into<Vec<u8>>) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p, q),
            None => (target, ""),
        };
        ProxyRequest {
            method: method.to_ascii_uppercase(),
            path: path.to_string(),
            query: query.to_string(),
            body: body.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ProxyResponse {
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => ProxyResponse { status, body },
            Err(e) => {
                warn!(error = %e, "failed to encode response body");
                Self::error(500, "Internal server error")
            }
        }
    }

    pub fn error(status: u16, message: impl Into<String>) -> Self {
        let body = serde_json::to_vec(&ErrorEnvelope::new(message)).unwrap_or_default();
        ProxyResponse { status, body }
    }

    pub fn no_content() -> Self {
        ProxyResponse {
            status: 204,
            body: Vec::new(),
        }
    }

    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Serialize as an HTTP/1.1 response with permissive CORS headers.
    pub fn to_http(&self) -> Vec<u8> {
        let reason = reqwest::StatusCode::from_u16(self.status)
            .ok()
            .and_then(|s| s.canonical_reason())
            .unwrap_or("Unknown");
        let mut head = format!(
            "HTTP/1.1 {} {}\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, PATCH, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nConnection: close\r\n",
            self.status, reason
        );
        if self.status != 204 {
            head.push_str(&format!(
                "Content-Type: application/json\r\nContent-Length: {}\r\n",
                self.body.len()
            ));
        }
        head.push_str("\r\n");
        let mut out = head.into_bytes();
        if self.status != 204 {
            out.extend_from_slice(&self.body);
        }
        out
    }
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    service: &'static str,
}

#[derive(Debug, Default, Deserialize)]
struct NewSessionBody {
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RenameBody {
    title: String,
}

// -- Server loop ----------------------------------------------------------------

pub async fn bind(config: &Config) -> Result<TcpListener, ChatError> {
    let addr = format!("{}:{}", config.proxy_bind, config.proxy_port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, backend = %config.backend_url, "proxy listening");
    Ok(listener)
}

/// Bind from `config` and serve until the task is dropped or accept fails.
pub async fn serve(config: &Config) -> Result<(), ChatError> {
    let listener = bind(config).await?;
    serve_on(listener, ProxyState::new(config)?).await
}

/// Bind from `config` and serve on a background task; returns the bound address.
pub async fn spawn_local(config: &Config) -> Result<SocketAddr, ChatError> {
    let listener = bind(config).await?;
    let addr = listener.local_addr()?;
    let state = ProxyState::new(config)?;
    tokio::spawn(async move {
        if let Err(e) = serve_on(listener, state).await {
            warn!(error = %e, "in-process proxy stopped");
        }
    });
    Ok(addr)
}

/// URL a client on this machine uses to reach a listener bound at `addr`.
pub fn local_url(addr: SocketAddr) -> String {
    let ip = if addr.ip().is_unspecified() {
        IpAddr::V4(Ipv4Addr::LOCALHOST)
    } else {
        addr.ip()
    };
    format!("http://{}", SocketAddr::new(ip, addr.port()))
}

pub async fn serve_on(listener: TcpListener, state: ProxyState) -> Result<(), ChatError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, state).await {
                debug!(%peer, error = %e, "connection error");
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, state: ProxyState) -> Result<(), ChatError> {
    let response = match read_request(&mut stream).await {
        Ok(Some(request)) => {
            let response = route(&state, &request).await;
            info!(
                method = %request.method,
                path = %request.path,
                status = response.status,
                "proxied request"
            );
            response
        }
        Ok(None) => return Ok(()),
        Err(ChatError::Io(e)) => return Err(ChatError::Io(e)),
        Err(e) => {
            debug!(error = %e, "rejecting malformed request");
            ProxyResponse::error(400, "Malformed request")
        }
    };
    stream.write_all(&response.to_http()).await?;
    stream.shutdown().await?;
    Ok(())
}

struct Head {
    len: usize,
    method: String,
    target: String,
    content_length: usize,
}

/// Parse a request head out of `buf`; `None` while it is still incomplete.
fn parse_head(buf: &[u8]) -> Result<Option<Head>, ChatError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);
    let len = match req.parse(buf) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(e) => return Err(ChatError::malformed("request", e.to_string())),
    };
    let content_length = match req
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case("content-length"))
    {
        Some(h) => std::str::from_utf8(h.value)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .ok_or_else(|| ChatError::malformed("content-length", "not a number"))?,
        None => 0,
    };
    if content_length > MAX_BODY_BYTES {
        return Err(ChatError::malformed("content-length", "request body too large"));
    }
    Ok(Some(Head {
        len,
        method: req.method.unwrap_or("GET").to_string(),
        target: req.path.unwrap_or("/").to_string(),
        content_length,
    }))
}

async fn read_request(stream: &mut TcpStream) -> Result<Option<ProxyRequest>, ChatError> {
    let mut buf = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let head = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(head) = parse_head(&buf)? {
            break head;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Err(ChatError::malformed("request", "header section too large"));
        }
    };

    let mut body = buf.split_off(head.len);
    while body.len() < head.content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ChatError::malformed("body", "connection closed mid-body"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
    body.truncate(head.content_length);
    Ok(Some(ProxyRequest::new(&head.method, &head.target, body)))
}

// -- Routing ------------------------------------------------------------------

pub async fn route(state: &ProxyState, request: &ProxyRequest) -> ProxyResponse {
    if request.method == "OPTIONS" {
        return ProxyResponse::no_content();
    }
    let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
    match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["api", "health"]) => ProxyResponse::json(
            200,
            &Health {
                status: "healthy",
                service: SERVICE_NAME,
            },
        ),
        ("GET", ["api", "chats"]) => ProxyResponse::json(200, &list_sessions(&state.sessions)),
        ("POST", ["api", "chat", "new"]) => new_session(state, &request.body),
        ("PATCH", ["api", "chat", id, "title"]) => rename(state, id, &request.body),
        ("POST", ["api", "chat", "qna"]) => qna(state, &request.body).await,
        ("GET" | "POST", ["api", "chat", rest @ ..]) if is_forwardable(rest) => {
            forward(state, &request.method, &rest.join("/"), &request.query, &request.body).await
        }
        _ => ProxyResponse::error(404, "Not found"),
    }
}

/// At least one segment, none empty, and no dot segments that could climb out of `/api/chat/`.
fn is_forwardable(rest: &[&str]) -> bool {
    !rest.is_empty()
        && rest.iter().all(|s| {
            !s.is_empty()
                && !matches!(
                    s.to_ascii_lowercase().as_str(),
                    "." | ".." | "%2e" | "%2e%2e" | ".%2e" | "%2e."
                )
        })
}

fn new_session(state: &ProxyState, body: &[u8]) -> ProxyResponse {
    let parsed = if body.iter().all(u8::is_ascii_whitespace) {
        NewSessionBody::default()
    } else {
        match serde_json::from_slice::<NewSessionBody>(body) {
            Ok(b) => b,
            Err(_) => return ProxyResponse::error(400, "Invalid JSON body"),
        }
    };
    let session = create_session(&state.sessions, parsed.title.as_deref());
    ProxyResponse::json(200, &session)
}

fn rename(state: &ProxyState, id: &str, body: &[u8]) -> ProxyResponse {
    let Ok(parsed) = serde_json::from_slice::<RenameBody>(body) else {
        return ProxyResponse::error(400, "Invalid JSON body");
    };
    match rename_session(&state.sessions, id, &parsed.title) {
        Some(session) => ProxyResponse::json(200, &session),
        None => ProxyResponse::error(404, "Chat not found"),
    }
}

async fn qna(state: &ProxyState, body: &[u8]) -> ProxyResponse {
    let request: ChatRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            debug!(error = %e, "invalid qna request body");
            return ProxyResponse::error(400, "Invalid JSON body");
        }
    };
    let url = join_url(&state.backend_url, "/api/chat/qna");
    let backend_body = BackendChatRequest::from(request);
    let resp = state.client.post(&url).json(&backend_body).send().await;
    relay(&url, resp).await
}

async fn forward(
    state: &ProxyState,
    method: &str,
    path: &str,
    query: &str,
    body: &[u8],
) -> ProxyResponse {
    let mut url = join_url(&state.backend_url, &format!("/api/chat/{path}"));
    if !query.is_empty() {
        url.push('?');
        url.push_str(query);
    }
    let builder = if method == "POST" {
        let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) else {
            return ProxyResponse::error(400, "Invalid JSON body");
        };
        debug!(%url, "forwarding POST");
        state.client.post(&url).json(&json)
    } else {
        debug!(%url, "forwarding GET");
        state.client.get(&url)
    };
    relay(&url, builder.send().await).await
}

/// Translate a backend reply into the browser-facing response.
async fn relay(url: &str, resp: Result<reqwest::Response, reqwest::Error>) -> ProxyResponse {
    let resp = match resp {
        Ok(r) => r,
        Err(e) => {
            warn!(%url, error = %e, "backend request failed");
            return ProxyResponse::error(500, "Backend request failed");
        }
    };
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        warn!(%url, status = status.as_u16(), body = %text, "backend returned error status");
        return ProxyResponse::error(status.as_u16(), format!("Backend error: {}", status.as_u16()));
    }
    match resp.json::<serde_json::Value>().await {
        Ok(value) => ProxyResponse::json(200, &value),
        Err(e) => {
            warn!(%url, error = %e, "backend reply was not JSON");
            ProxyResponse::error(500, "Backend request failed")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> ProxyState {
        ProxyState::new(&Config::default()).unwrap()
    }

    // -- Request parsing ----

    #[test]
    fn test_parse_head_partial_then_complete() {
        assert!(parse_head(b"GET /api/hea").unwrap().is_none());
        let raw = b"POST /api/chat/new?x=1 HTTP/1.1\r\nHost: a\r\nContent-Length: 2\r\n\r\n{}";
        let head = parse_head(raw).unwrap().unwrap();
        assert_eq!(head.method, "POST");
        assert_eq!(head.target, "/api/chat/new?x=1");
        assert_eq!(head.content_length, 2);
        assert_eq!(&raw[head.len..], b"{}");
    }

    #[test]
    fn test_parse_head_rejects_garbage() {
        assert!(parse_head(b"\x00\x01 nonsense\r\n\r\n").is_err());
        let bad_len = b"POST / HTTP/1.1\r\nContent-Length: lots\r\n\r\n";
        assert!(parse_head(bad_len).is_err());
    }

    #[test]
    fn test_request_splits_query() {
        let req = ProxyRequest::new("get", "/api/chat/models?provider=ollama", "");
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/api/chat/models");
        assert_eq!(req.query, "provider=ollama");
    }

    // -- Response encoding ----

    #[test]
    fn test_to_http_has_cors_and_length() {
        let text = String::from_utf8(ProxyResponse::error(404, "Not found").to_http()).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(text.contains("Content-Length: 21\r\n"));
        assert!(text.ends_with(r#"{"error":"Not found"}"#));
    }

    #[test]
    fn test_no_content_has_no_body() {
        let text = String::from_utf8(ProxyResponse::no_content().to_http()).unwrap();
        assert!(text.starts_with("HTTP/1.1 204 No Content\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    // -- Local routes ----

    #[tokio::test]
    async fn test_health() {
        let resp = route(&state(), &ProxyRequest::new("GET", "/api/health", "")).await;
        assert_eq!(resp.status, 200);
        assert_eq!(
            resp.body_json().unwrap(),
            serde_json::json!({"status": "healthy", "service": "multichat-proxy"})
        );
    }

    #[tokio::test]
    async fn test_options_preflight() {
        let resp = route(&state(), &ProxyRequest::new("OPTIONS", "/api/chat/qna", "")).await;
        assert_eq!(resp.status, 204);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404_envelope() {
        let st = state();
        for (method, path) in [("GET", "/nope"), ("DELETE", "/api/chats"), ("GET", "/api/chat/")] {
            let resp = route(&st, &ProxyRequest::new(method, path, "")).await;
            assert_eq!(resp.status, 404, "{method} {path}");
            assert!(resp.body_json().unwrap().get("error").is_some());
        }
    }

    #[test]
    fn test_local_url_maps_wildcard_bind() {
        assert_eq!(local_url("0.0.0.0:3000".parse().unwrap()), "http://127.0.0.1:3000");
        assert_eq!(local_url("10.1.2.3:80".parse().unwrap()), "http://10.1.2.3:80");
    }

    #[test]
    fn test_forwardable_paths() {
        assert!(is_forwardable(&["models"]));
        assert!(is_forwardable(&["history", "c1"]));
        assert!(!is_forwardable(&[]));
        assert!(!is_forwardable(&["a", ""]));
        assert!(!is_forwardable(&["..", "x"]));
        assert!(!is_forwardable(&["."]));
        assert!(!is_forwardable(&["%2E%2e", "health"]));
    }

    #[tokio::test]
    async fn test_bare_chat_prefix_and_dot_segments_are_404() {
        let st = state();
        for (method, path) in [
            ("GET", "/api/chat"),
            ("POST", "/api/chat/"),
            ("GET", "/api/chat/../health"),
            ("GET", "/api/chat/./models"),
            ("POST", "/api/chat/x/%2e%2e/%2e%2e/admin"),
        ] {
            let resp = route(&st, &ProxyRequest::new(method, path, "{}")).await;
            assert_eq!(resp.status, 404, "{method} {path}");
        }
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let st = state();
        let created = route(&st, &ProxyRequest::new("POST", "/api/chat/new", r#"{"title":"Plans"}"#)).await;
        assert_eq!(created.status, 200);
        let body = created.body_json().unwrap();
        assert_eq!(body["title"], "Plans");
        let id = body["id"].as_str().unwrap().to_string();

        let untitled = route(&st, &ProxyRequest::new("POST", "/api/chat/new", "")).await;
        assert_eq!(untitled.body_json().unwrap()["title"], "New chat");

        let path = format!("/api/chat/{id}/title");
        let renamed = route(&st, &ProxyRequest::new("PATCH", &path, r#"{"title":"Roadmap"}"#)).await;
        assert_eq!(renamed.status, 200);
        assert_eq!(renamed.body_json().unwrap()["title"], "Roadmap");

        let list = route(&st, &ProxyRequest::new("GET", "/api/chats", "")).await;
        assert_eq!(list.body_json().unwrap().as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rename_unknown_and_bad_body() {
        let st = state();
        let missing = route(&st, &ProxyRequest::new("PATCH", "/api/chat/zzz/title", r#"{"title":"x"}"#)).await;
        assert_eq!(missing.status, 404);
        let bad = route(&st, &ProxyRequest::new("PATCH", "/api/chat/zzz/title", "not json")).await;
        assert_eq!(bad.status, 400);
    }

    #[tokio::test]
    async fn test_invalid_json_is_400_before_forwarding() {
        let st = state();
        let qna = route(&st, &ProxyRequest::new("POST", "/api/chat/qna", "{oops")).await;
        assert_eq!(qna.status, 400);
        let fwd = route(&st, &ProxyRequest::new("POST", "/api/chat/anything", "")).await;
        assert_eq!(fwd.status, 400);
    }

    #[tokio::test]
    async fn test_unreachable_backend_is_500() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let cfg = Config {
            backend_url: format!("http://{addr}"),
            ..Config::default()
        };
        let st = ProxyState::new(&cfg).unwrap();
        let resp = route(&st, &ProxyRequest::new("GET", "/api/chat/models", "")).await;
        assert_eq!(resp.status, 500);
        assert_eq!(resp.body_json().unwrap()["error"], "Backend request failed");
    }
}
