use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ChatError, FailureKind};

// -- Roles and attribution ---------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Provider/model pair reported by the backend for an assistant answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: String,
    pub model: String,
}

// -- Message -----------------------------------------------------------------

/// One entry of a tab's message log. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Conversation id current when the message was created (empty before the first answer).
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_info: Option<ModelInfo>,
    /// Set on failure indicators synthesized in place of an answer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl Message {
    pub fn user(content: impl Into<String>, conversation_id: &str) -> Self {
        Message {
            id: format!("user_{}", Uuid::new_v4()),
            role: Role::User,
            content: content.into(),
            timestamp: Utc::now(),
            conversation_id: conversation_id.to_string(),
            model_info: None,
            failure: None,
        }
    }

    pub fn assistant(
        content: impl Into<String>,
        conversation_id: &str,
        model_info: Option<ModelInfo>,
    ) -> Self {
        Message {
            id: format!("assistant_{}", Uuid::new_v4()),
            role: Role::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
            conversation_id: conversation_id.to_string(),
            model_info,
            failure: None,
        }
    }

    /// Assistant-role entry standing in for an answer that never arrived.
    pub fn failure(err: &ChatError, conversation_id: &str) -> Self {
        Message {
            id: format!("error_{}", Uuid::new_v4()),
            role: Role::Assistant,
            content: failure_text(err),
            timestamp: Utc::now(),
            conversation_id: conversation_id.to_string(),
            model_info: None,
            failure: Some(err.failure_kind()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    pub fn to_history(&self) -> HistoryEntry {
        HistoryEntry {
            role: self.role,
            content: self.content.clone(),
            timestamp: self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Text shown in place of an answer when a backend call fails.
pub fn failure_text(err: &ChatError) -> String {
    format!("An error occurred: {err}")
}

/// One prior turn as sent to the backend in `conversationHistory`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: String,
}

/// Serialize a message log as conversation history, skipping failure indicators.
pub fn history_of(messages: &[Message]) -> Vec<HistoryEntry> {
    messages
        .iter()
        .filter(|m| !m.is_failure())
        .map(Message::to_history)
        .collect()
}

// -- Comparison --------------------------------------------------------------

/// Fixed grid position of a comparison answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotKey {
    Model1,
    Model2,
    Model3,
}

impl SlotKey {
    pub const ALL: [SlotKey; 3] = [SlotKey::Model1, SlotKey::Model2, SlotKey::Model3];

    pub fn index(self) -> usize {
        match self {
            SlotKey::Model1 => 0,
            SlotKey::Model2 => 1,
            SlotKey::Model3 => 2,
        }
    }
}

impl std::fmt::Display for SlotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SlotKey::Model1 => write!(f, "model1"),
            SlotKey::Model2 => write!(f, "model2"),
            SlotKey::Model3 => write!(f, "model3"),
        }
    }
}

/// The three model names picked for a comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompareModels {
    pub model1: String,
    pub model2: String,
    pub model3: String,
}

impl CompareModels {
    pub fn new(
        model1: impl Into<String>,
        model2: impl Into<String>,
        model3: impl Into<String>,
    ) -> Self {
        CompareModels {
            model1: model1.into(),
            model2: model2.into(),
            model3: model3.into(),
        }
    }

    pub fn get(&self, key: SlotKey) -> &str {
        match key {
            SlotKey::Model1 => &self.model1,
            SlotKey::Model2 => &self.model2,
            SlotKey::Model3 => &self.model3,
        }
    }
}

impl Default for CompareModels {
    fn default() -> Self {
        CompareModels::new("gemma3:270m", "gpt-oss:20b", "llama3.3:latest")
    }
}

/// Provider label a slot shows until the backend reports one.
pub const DEFAULT_SLOT_PROVIDER: &str = "Local";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSlot {
    pub content: String,
    pub model: String,
    pub provider: String,
    pub is_loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ModelSlot {
    fn loading(model: &str) -> Self {
        ModelSlot {
            content: String::new(),
            model: model.to_string(),
            provider: DEFAULT_SLOT_PROVIDER.to_string(),
            is_loading: true,
            failure: None,
        }
    }
}

/// One question fanned out to three models; slots are updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonMessage {
    pub id: String,
    pub user_message: String,
    pub timestamp: DateTime<Utc>,
    slots: [ModelSlot; 3],
}

impl ComparisonMessage {
    pub fn new(user_message: impl Into<String>, models: &CompareModels) -> Self {
        ComparisonMessage {
            id: Uuid::new_v4().to_string(),
            user_message: user_message.into(),
            timestamp: Utc::now(),
            slots: SlotKey::ALL.map(|k| ModelSlot::loading(models.get(k))),
        }
    }

    pub fn slot(&self, key: SlotKey) -> &ModelSlot {
        &self.slots[key.index()]
    }

    pub fn slots(&self) -> impl Iterator<Item = (SlotKey, &ModelSlot)> {
        SlotKey::ALL.into_iter().zip(self.slots.iter())
    }

    pub fn resolve(&mut self, key: SlotKey, content: String, model_info: Option<ModelInfo>) {
        let slot = &mut self.slots[key.index()];
        slot.content = content;
        if let Some(info) = model_info {
            slot.provider = info.provider;
        }
        slot.is_loading = false;
        slot.failure = None;
    }

    pub fn reject(&mut self, key: SlotKey, err: &ChatError) {
        let slot = &mut self.slots[key.index()];
        slot.content = failure_text(err);
        slot.is_loading = false;
        slot.failure = Some(err.failure_kind());
    }

    pub fn is_settled(&self) -> bool {
        self.slots.iter().all(|s| !s.is_loading)
    }
}

// -- Chat sessions (proxy registry) -------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
