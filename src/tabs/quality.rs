use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::backend::ChatBackend;
use crate::conversation::Conversation;
use crate::error::ChatError;
use crate::events::{ChatEvent, EventSink};
use crate::message::{Message, Role};
use crate::protocol::{EnhanceQuery, QualityQuery};
use crate::tabs::TabKind;

/// View-side enhancement of one assistant answer. Never part of the message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Enhancement {
    Pending,
    Ready { text: String },
    /// The enhancement call failed; `fallback` is the original answer.
    Failed { fallback: String, error: String },
}

/// Quality tab: a base-tier chat plus on-demand enhancement of individual answers.
pub struct QualityTab<B> {
    backend: Arc<B>,
    conversation: Conversation,
    enhancements: Arc<Mutex<HashMap<String, Enhancement>>>,
    events: EventSink,
}

impl<B> Clone for QualityTab<B> {
    fn clone(&self) -> Self {
        QualityTab {
            backend: Arc::clone(&self.backend),
            conversation: self.conversation.clone(),
            enhancements: Arc::clone(&self.enhancements),
            events: self.events.clone(),
        }
    }
}

impl<B: ChatBackend> QualityTab<B> {
    pub fn new(backend: Arc<B>, events: EventSink) -> Self {
        QualityTab {
            backend,
            conversation: Conversation::new(TabKind::Quality, events.clone()),
            enhancements: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Enhancement>> {
        self.enhancements.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn messages(&self) -> Vec<Message> {
        self.conversation.messages()
    }

    pub fn is_loading(&self) -> bool {
        self.conversation.is_loading()
    }

    pub fn enhancement(&self, message_id: &str) -> Option<Enhancement> {
        self.lock().get(message_id).cloned()
    }

    pub async fn send(&self, content: &str) -> Result<Message, ChatError> {
        let ticket = self.conversation.begin_send(content)?;
        let query = QualityQuery {
            message: content.to_string(),
            conversation_id: ticket.conversation_id.clone(),
            conversation_history: ticket.history.clone(),
        };
        info!(history = query.conversation_history.len(), "quality request");
        let result = self.backend.quality(query).await;
        self.conversation.settle(&ticket, result)
    }

    /// Ask the higher tier to rewrite `answer` to `question`. Does not touch the log.
    pub async fn enhance(&self, question: &str, answer: &str) -> Result<String, ChatError> {
        let query = EnhanceQuery {
            question: question.to_string(),
            answer: answer.to_string(),
        };
        let resp = self.backend.enhance(query).await?;
        resp.text()
            .map(str::to_string)
            .ok_or_else(|| ChatError::malformed("response", "missing or empty enhanced answer"))
    }

    /// Enhance the assistant message `message_id`, pairing it with the closest
    /// preceding user question, and remember the result for the view.
    pub async fn enhance_message(&self, message_id: &str) -> Result<Enhancement, ChatError> {
        let log = self.conversation.messages();
        let pos = log
            .iter()
            .position(|m| m.id == message_id && m.role == Role::Assistant && !m.is_failure())
            .ok_or_else(|| ChatError::UnknownMessage {
                id: message_id.to_string(),
            })?;
        let answer = log[pos].content.clone();
        let question = log[..pos]
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();

        self.store(message_id, Enhancement::Pending);
        let enhancement = match self.enhance(&question, &answer).await {
            Ok(text) => Enhancement::Ready { text },
            Err(err) => {
                warn!(%message_id, error = %err, "enhancement failed");
                Enhancement::Failed {
                    fallback: answer,
                    error: err.to_string(),
                }
            }
        };
        // Cleared while in flight: the message is gone, so is its enhancement.
        if self.conversation.message(message_id).is_none() {
            self.lock().remove(message_id);
            return Err(ChatError::Cancelled);
        }
        self.store(message_id, enhancement.clone());
        Ok(enhancement)
    }

    fn store(&self, message_id: &str, enhancement: Enhancement) {
        self.lock()
            .insert(message_id.to_string(), enhancement.clone());
        self.events.emit(ChatEvent::EnhancementChanged {
            message_id: message_id.to_string(),
            enhancement,
        });
    }

    pub fn clear(&self) {
        self.lock().clear();
        self.conversation.clear();
    }
}
