//! Shared fixtures: a scripted in-memory backend and a stub HTTP server.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use multichat::protocol::{
    ChatRequest, ChatResponse, CompareQuery, EmbedResponse, EnhanceQuery, QualityQuery, RagQuery,
};
use multichat::message::ModelInfo;
use multichat::upload::UploadFile;
use multichat::{ChatBackend, ChatError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

// ---------------------------------------------------------------------------
// Scripted backend
// ---------------------------------------------------------------------------

pub enum Step<T> {
    Ready(Result<T, ChatError>),
    /// Resolves when the paired sender fires.
    Gated(oneshot::Receiver<Result<T, ChatError>>),
}

pub type Gate<T> = oneshot::Sender<Result<T, ChatError>>;

#[derive(Debug, Clone)]
pub enum Recorded {
    Qna(ChatRequest),
    Embed(Vec<String>),
    Rag(RagQuery),
    Compare(CompareQuery),
    Quality(QualityQuery),
    Enhance(EnhanceQuery),
}

/// Backend whose replies are queued per endpoint (`compare:<model>` for comparisons).
#[derive(Default)]
pub struct MockBackend {
    chat: Mutex<HashMap<String, VecDeque<Step<ChatResponse>>>>,
    embed: Mutex<VecDeque<Step<EmbedResponse>>>,
    requests: Mutex<Vec<Recorded>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: &str, result: Result<ChatResponse, ChatError>) -> &Self {
        self.chat
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(Step::Ready(result));
        self
    }

    pub fn gate(&self, key: &str) -> Gate<ChatResponse> {
        let (tx, rx) = oneshot::channel();
        self.chat
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push_back(Step::Gated(rx));
        tx
    }

    pub fn push_embed(&self, result: Result<EmbedResponse, ChatError>) {
        self.embed.lock().unwrap().push_back(Step::Ready(result));
    }

    pub fn gate_embed(&self) -> Gate<EmbedResponse> {
        let (tx, rx) = oneshot::channel();
        self.embed.lock().unwrap().push_back(Step::Gated(rx));
        tx
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn record(&self, r: Recorded) {
        self.requests.lock().unwrap().push(r);
    }

    async fn next_chat(&self, key: &str) -> Result<ChatResponse, ChatError> {
        let step = {
            let mut guard = self.chat.lock().unwrap();
            guard.get_mut(key).and_then(VecDeque::pop_front)
        };
        resolve(step, key).await
    }
}

async fn resolve<T>(step: Option<Step<T>>, key: &str) -> Result<T, ChatError> {
    match step {
        Some(Step::Ready(r)) => r,
        Some(Step::Gated(rx)) => rx.await.unwrap_or_else(|_| Err(transport("gate dropped"))),
        None => Err(transport(&format!("nothing scripted for {key}"))),
    }
}

impl ChatBackend for MockBackend {
    async fn qna(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        self.record(Recorded::Qna(request));
        self.next_chat("qna").await
    }

    async fn embed(&self, files: Vec<UploadFile>) -> Result<EmbedResponse, ChatError> {
        self.record(Recorded::Embed(files.into_iter().map(|f| f.file_name).collect()));
        let step = self.embed.lock().unwrap().pop_front();
        resolve(step, "embed").await
    }

    async fn rag(&self, query: RagQuery) -> Result<ChatResponse, ChatError> {
        self.record(Recorded::Rag(query));
        self.next_chat("rag").await
    }

    async fn compare(&self, query: CompareQuery) -> Result<ChatResponse, ChatError> {
        let key = format!("compare:{}", query.selected_model);
        self.record(Recorded::Compare(query));
        self.next_chat(&key).await
    }

    async fn quality(&self, query: QualityQuery) -> Result<ChatResponse, ChatError> {
        self.record(Recorded::Quality(query));
        self.next_chat("quality").await
    }

    async fn enhance(&self, query: EnhanceQuery) -> Result<ChatResponse, ChatError> {
        self.record(Recorded::Enhance(query));
        self.next_chat("enhance").await
    }
}

// ---------------------------------------------------------------------------
// Reply builders
// ---------------------------------------------------------------------------

pub fn transport(detail: &str) -> ChatError {
    ChatError::Transport {
        url: "http://mock".to_string(),
        detail: detail.to_string(),
    }
}

pub fn status(code: u16) -> ChatError {
    ChatError::Status {
        status: code,
        url: "http://mock".to_string(),
        detail: "backend said no".to_string(),
    }
}

pub fn answer(text: &str, conversation_id: Option<&str>) -> Result<ChatResponse, ChatError> {
    Ok(ChatResponse {
        response: Some(text.to_string()),
        conversation_id: conversation_id.map(str::to_string),
        model_info: None,
    })
}

pub fn answer_by(text: &str, provider: &str, model: &str) -> Result<ChatResponse, ChatError> {
    Ok(ChatResponse {
        response: Some(text.to_string()),
        conversation_id: None,
        model_info: Some(ModelInfo {
            provider: provider.to_string(),
            model: model.to_string(),
        }),
    })
}

pub fn pdf(name: &str) -> UploadFile {
    UploadFile::new(name, b"%PDF-1.4 test".to_vec())
}

// ---------------------------------------------------------------------------
// Stub HTTP server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StubRequest {
    pub method: String,
    /// Path including any query string.
    pub target: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl StubRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }
}

pub type Responder = Arc<dyn Fn(&StubRequest) -> (u16, String) + Send + Sync>;

pub struct StubServer {
    pub url: String,
    pub requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl StubServer {
    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }
}

/// Serve every request with `respond` on an ephemeral local port.
pub async fn stub_server<F>(respond: F) -> StubServer
where
    F: Fn(&StubRequest) -> (u16, String) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let requests = Arc::new(Mutex::new(Vec::new()));
    let respond: Responder = Arc::new(respond);
    let log = Arc::clone(&requests);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let respond = Arc::clone(&respond);
            let log = Arc::clone(&log);
            tokio::spawn(async move {
                let Some(req) = read_stub_request(&mut stream).await else {
                    return;
                };
                let (status, body) = respond(&req);
                log.lock().unwrap().push(req);
                let resp = format!(
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    StubServer { url, requests }
}

async fn read_stub_request(stream: &mut tokio::net::TcpStream) -> Option<StubRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let (head_len, method, target, headers) = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        let mut raw = [httparse::EMPTY_HEADER; 64];
        let mut req = httparse::Request::new(&mut raw);
        if let Ok(httparse::Status::Complete(len)) = req.parse(&buf) {
            let headers: Vec<(String, String)> = req
                .headers
                .iter()
                .map(|h| (h.name.to_string(), String::from_utf8_lossy(h.value).into_owned()))
                .collect();
            break (
                len,
                req.method?.to_string(),
                req.path?.to_string(),
                headers,
            );
        }
    };
    let find = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.trim().to_string())
    };
    let mut body = buf.split_off(head_len);
    if find("transfer-encoding").is_some_and(|v| v.eq_ignore_ascii_case("chunked")) {
        while !body.ends_with(b"0\r\n\r\n") {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        body = dechunk(&body);
    } else {
        let len: usize = find("content-length").and_then(|v| v.parse().ok()).unwrap_or(0);
        while body.len() < len {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }
    Some(StubRequest {
        method,
        target,
        headers,
        body,
    })
}

fn dechunk(mut raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    loop {
        let Some(pos) = raw.windows(2).position(|w| w == b"\r\n") else {
            return out;
        };
        let size_line = String::from_utf8_lossy(&raw[..pos]);
        let size = usize::from_str_radix(size_line.split(';').next().unwrap_or("0").trim(), 16).unwrap_or(0);
        if size == 0 {
            return out;
        }
        let start = pos + 2;
        out.extend_from_slice(&raw[start..start + size]);
        raw = &raw[start + size + 2..];
    }
}

/// Address of a port nothing is listening on.
pub fn dead_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}
