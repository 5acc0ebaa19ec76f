use std::sync::Arc;

use tracing::info;

use crate::backend::ChatBackend;
use crate::conversation::Conversation;
use crate::error::ChatError;
use crate::events::EventSink;
use crate::message::Message;
use crate::protocol::{ChatRequest, ModelConfig};
use crate::tabs::TabKind;

/// General Q&A tab.
pub struct QnaTab<B> {
    backend: Arc<B>,
    conversation: Conversation,
}

impl<B> Clone for QnaTab<B> {
    fn clone(&self) -> Self {
        QnaTab {
            backend: Arc::clone(&self.backend),
            conversation: self.conversation.clone(),
        }
    }
}

impl<B: ChatBackend> QnaTab<B> {
    pub fn new(backend: Arc<B>, events: EventSink) -> Self {
        QnaTab {
            backend,
            conversation: Conversation::new(TabKind::Qna, events),
        }
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

    /// Send one question; returns the answer, or the error after a failure indicator was logged.
    pub async fn send(
        &self,
        content: &str,
        model_config: Option<ModelConfig>,
    ) -> Result<Message, ChatError> {
        let ticket = self.conversation.begin_send(content)?;
        let request = ChatRequest {
            message: content.to_string(),
            tab_type: TabKind::Qna.to_string(),
            conversation_id: (!ticket.conversation_id.is_empty())
                .then(|| ticket.conversation_id.clone()),
            conversation_history: ticket.history.clone(),
            model_config,
        };
        info!(history = request.conversation_history.len(), "qna request");
        let result = self.backend.qna(request).await;
        self.conversation.settle(&ticket, result)
    }

    pub fn clear(&self) {
        self.conversation.clear();
    }
}
