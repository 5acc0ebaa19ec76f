use serde::{Deserialize, Serialize};

use crate::message::{HistoryEntry, ModelInfo};

// -- Browser-facing chat contract ---------------------------------------------

/// Provider switch and model name for Q&A and retrieval sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    #[serde(rename = "useOpenAI")]
    pub use_openai: bool,
    pub selected_model: String,
}

/// JSON body the Q&A tab posts to the proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub tab_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<HistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_config: Option<ModelConfig>,
}

/// Response shape shared by every chat-like backend endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
}

impl ChatResponse {
    /// Answer text, or `None` when the field is absent or empty.
    pub fn text(&self) -> Option<&str> {
        self.response.as_deref().filter(|s| !s.is_empty())
    }

    /// Returned conversation id, ignoring empty strings.
    pub fn conversation(&self) -> Option<&str> {
        self.conversation_id.as_deref().filter(|s| !s.is_empty())
    }
}

// -- Backend-facing chat contract ---------------------------------------------

/// Snake-case request body the backend's `/api/chat/qna` endpoint expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendChatRequest {
    pub message: String,
    pub tab_type: String,
    pub conversation_history: Vec<HistoryEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub use_openai: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub select_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
}

impl From<ChatRequest> for BackendChatRequest {
    fn from(req: ChatRequest) -> Self {
        let (use_openai, select_model) = match req.model_config {
            Some(cfg) => (Some(cfg.use_openai), Some(cfg.selected_model)),
            None => (None, None),
        };
        BackendChatRequest {
            message: req.message,
            tab_type: req.tab_type,
            conversation_history: req.conversation_history,
            use_openai,
            select_model,
            conversation_id: req.conversation_id.filter(|id| !id.is_empty()),
        }
    }
}

// -- Retrieval ----------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedResponse {
    #[serde(default)]
    pub rag_key: Option<String>,
}

/// Multipart retrieval query.
#[derive(Debug, Clone, PartialEq)]
pub struct RagQuery {
    pub message: String,
    pub use_openai: bool,
    pub selected_model: String,
    pub conversation_id: String,
    pub conversation_history: Vec<HistoryEntry>,
    pub rag_key: String,
}

// -- Comparison / quality -----------------------------------------------------

/// Multipart comparison query, issued once per model.
#[derive(Debug, Clone, PartialEq)]
pub struct CompareQuery {
    pub message: String,
    pub conversation_id: String,
    pub conversation_history: Vec<HistoryEntry>,
    pub selected_model: String,
}

/// Multipart quality-tier chat query.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityQuery {
    pub message: String,
    pub conversation_id: String,
    pub conversation_history: Vec<HistoryEntry>,
}

/// Multipart answer-enhancement query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnhanceQuery {
    pub question: String,
    pub answer: String,
}

// -- Proxy error envelope -----------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub error: String,
}

impl ErrorEnvelope {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorEnvelope {
            error: error.into(),
        }
    }
}

/// Multipart form field names used by the backend.
pub mod fields {
    pub const MESSAGE: &str = "message";
    pub const USE_OPENAI: &str = "useOpenAI";
    pub const SELECTED_MODEL: &str = "selectedModel";
    pub const CONVERSATION_ID: &str = "conversationId";
    pub const CONVERSATION_HISTORY: &str = "conversationHistory";
    pub const RAG_KEY: &str = "ragKey";
    pub const FILES: &str = "files";
    pub const ORG_QUESTION: &str = "orgQuestion";
    pub const ORG_ANSWER: &str = "orgAnswer";
}
