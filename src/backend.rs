//! Backend client.
//!
//! [`ChatBackend`] has one method per backend contract. The tab state managers
//! are generic over it, so tests drive them with scripted backends while the
//! binary uses [`HttpBackend`].

use std::future::Future;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::{join_url, Config};
use crate::error::ChatError;
use crate::message::HistoryEntry;
use crate::protocol::{
    fields, ChatRequest, ChatResponse, CompareQuery, EmbedResponse, EnhanceQuery, QualityQuery,
    RagQuery,
};
use crate::upload::UploadFile;

/// Longest backend error body quoted in a [`ChatError::Status`].
const MAX_DETAIL_LEN: usize = 200;

pub trait ChatBackend: Send + Sync + 'static {
    /// General Q&A chat (JSON).
    fn qna(
        &self,
        request: ChatRequest,
    ) -> impl Future<Output = Result<ChatResponse, ChatError>> + Send;

    /// Embed the given files and return the retrieval key.
    fn embed(
        &self,
        files: Vec<UploadFile>,
    ) -> impl Future<Output = Result<EmbedResponse, ChatError>> + Send;

    /// Retrieval-grounded chat.
    fn rag(&self, query: RagQuery) -> impl Future<Output = Result<ChatResponse, ChatError>> + Send;

    /// One model of a comparison.
    fn compare(
        &self,
        query: CompareQuery,
    ) -> impl Future<Output = Result<ChatResponse, ChatError>> + Send;

    /// Quality-tier chat.
    fn quality(
        &self,
        query: QualityQuery,
    ) -> impl Future<Output = Result<ChatResponse, ChatError>> + Send;

    /// Rewrite an earlier answer.
    fn enhance(
        &self,
        query: EnhanceQuery,
    ) -> impl Future<Output = Result<ChatResponse, ChatError>> + Send;
}

/// Absolute URL of every backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub qna: String,
    pub embed: String,
    pub rag: String,
    pub compare: String,
    pub quality: String,
    pub enhance: String,
}

impl Endpoints {
    pub fn from_config(config: &Config) -> Self {
        Endpoints {
            qna: join_url(&config.proxy_url, "/api/chat/qna"),
            embed: join_url(&config.rag_api_url, "/chat/embed"),
            rag: join_url(&config.rag_api_url, "/chat/rag"),
            compare: join_url(&config.backend_url, "/api/chat/compare"),
            quality: join_url(&config.backend_url, "/api/quality/gpt35"),
            enhance: join_url(&config.backend_url, "/api/quality/gpt4o"),
        }
    }
}

/// [`ChatBackend`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    endpoints: Endpoints,
}

impl HttpBackend {
    pub fn new(config: &Config) -> Result<Self, ChatError> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| ChatError::transport(&config.backend_url, e))?;
        Ok(HttpBackend {
            client,
            endpoints: Endpoints::from_config(config),
        })
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    async fn post_json<T, R>(&self, url: &str, body: &T) -> Result<R, ChatError>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        debug!(%url, "POST json");
        let resp = self.client.post(url).json(body).send().await;
        read_json(url, resp).await
    }

    async fn post_form<R>(&self, url: &str, form: Form) -> Result<R, ChatError>
    where
        R: DeserializeOwned,
    {
        debug!(%url, "POST multipart");
        let resp = self.client.post(url).multipart(form).send().await;
        read_json(url, resp).await
    }
}

impl ChatBackend for HttpBackend {
    async fn qna(&self, request: ChatRequest) -> Result<ChatResponse, ChatError> {
        self.post_json(&self.endpoints.qna, &request).await
    }

    async fn embed(&self, files: Vec<UploadFile>) -> Result<EmbedResponse, ChatError> {
        let mut form = Form::new();
        for file in files {
            let part = Part::bytes(file.data)
                .file_name(file.file_name)
                .mime_str(&file.content_type)
                .map_err(|e| ChatError::malformed("content_type", e.to_string()))?;
            form = form.part(fields::FILES, part);
        }
        self.post_form(&self.endpoints.embed, form).await
    }

    async fn rag(&self, query: RagQuery) -> Result<ChatResponse, ChatError> {
        let form = Form::new()
            .text(fields::MESSAGE, query.message)
            .text(fields::USE_OPENAI, query.use_openai.to_string())
            .text(fields::SELECTED_MODEL, query.selected_model)
            .text(fields::CONVERSATION_ID, query.conversation_id)
            .text(
                fields::CONVERSATION_HISTORY,
                history_json(&query.conversation_history)?,
            )
            .text(fields::RAG_KEY, query.rag_key);
        self.post_form(&self.endpoints.rag, form).await
    }

    async fn compare(&self, query: CompareQuery) -> Result<ChatResponse, ChatError> {
        let form = Form::new()
            .text(fields::MESSAGE, query.message)
            .text(fields::CONVERSATION_ID, query.conversation_id)
            .text(
                fields::CONVERSATION_HISTORY,
                history_json(&query.conversation_history)?,
            )
            .text(fields::SELECTED_MODEL, query.selected_model);
        self.post_form(&self.endpoints.compare, form).await
    }

    async fn quality(&self, query: QualityQuery) -> Result<ChatResponse, ChatError> {
        let form = Form::new()
            .text(fields::MESSAGE, query.message)
            .text(fields::CONVERSATION_ID, query.conversation_id)
            .text(
                fields::CONVERSATION_HISTORY,
                history_json(&query.conversation_history)?,
            );
        self.post_form(&self.endpoints.quality, form).await
    }

    async fn enhance(&self, query: EnhanceQuery) -> Result<ChatResponse, ChatError> {
        let form = Form::new()
            .text(fields::ORG_QUESTION, query.question)
            .text(fields::ORG_ANSWER, query.answer);
        self.post_form(&self.endpoints.enhance, form).await
    }
}

fn history_json(history: &[HistoryEntry]) -> Result<String, ChatError> {
    serde_json::to_string(history).map_err(|e| ChatError::malformed("conversationHistory", e.to_string()))
}

/// Turn a reqwest outcome into a decoded body or a classified [`ChatError`].
async fn read_json<R: DeserializeOwned>(
    url: &str,
    resp: Result<reqwest::Response, reqwest::Error>,
) -> Result<R, ChatError> {
    let resp = resp.map_err(|e| {
        warn!(%url, error = %e, "backend unreachable");
        ChatError::transport(url, e)
    })?;

    let status = resp.status();
    let bytes = resp.bytes().await.map_err(|e| ChatError::transport(url, e))?;

    if !status.is_success() {
        let detail = error_detail(&bytes);
        warn!(%url, status = status.as_u16(), %detail, "backend returned error status");
        return Err(ChatError::Status {
            status: status.as_u16(),
            url: url.to_string(),
            detail,
        });
    }

    serde_json::from_slice(&bytes).map_err(|e| ChatError::malformed("body", e.to_string()))
}

/// Pull a readable message out of an error body: FastAPI `detail`, proxy `error`, or raw text.
pub fn error_detail(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        for key in ["detail", "error"] {
            if let Some(s) = value.get(key).and_then(|v| v.as_str()) {
                return truncate(s);
            }
        }
    }
    truncate(String::from_utf8_lossy(body).trim())
}

fn truncate(s: &str) -> String {
    match s.char_indices().nth(MAX_DETAIL_LEN) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}
