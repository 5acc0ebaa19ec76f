//! Retrieval (document-grounded) tab.
//!
//! Files are selected, embedded in one backend call that yields a retrieval
//! key, and only then can questions be sent. Selecting more files after a key
//! exists drops the key, so questions never run against a stale index.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{info, warn};

use crate::backend::ChatBackend;
use crate::conversation::Conversation;
use crate::error::ChatError;
use crate::events::{ChatEvent, EventSink};
use crate::message::Message;
use crate::protocol::RagQuery;
use crate::tabs::TabKind;
use crate::upload::UploadFile;

/// Model choice for a retrieval question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RagOptions {
    pub use_openai: bool,
    pub selected_model: String,
}

#[derive(Debug, Default)]
struct RagState {
    files: Vec<UploadFile>,
    rag_key: String,
    /// Bumped on every change to the file list.
    selection: u64,
    embedding: bool,
}

pub struct RagTab<B> {
    backend: Arc<B>,
    conversation: Conversation,
    state: Arc<Mutex<RagState>>,
    events: EventSink,
}

impl<B> Clone for RagTab<B> {
    fn clone(&self) -> Self {
        RagTab {
            backend: Arc::clone(&self.backend),
            conversation: self.conversation.clone(),
            state: Arc::clone(&self.state),
            events: self.events.clone(),
        }
    }
}

impl<B: ChatBackend> RagTab<B> {
    pub fn new(backend: Arc<B>, events: EventSink) -> Self {
        RagTab {
            backend,
            conversation: Conversation::new(TabKind::Rag, events.clone()),
            state: Arc::new(Mutex::new(RagState::default())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RagState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
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

    pub fn is_embedding(&self) -> bool {
        self.lock().embedding
    }

    pub fn files(&self) -> Vec<UploadFile> {
        self.lock().files.clone()
    }

    /// Current retrieval key; empty until an embedding succeeds.
    pub fn rag_key(&self) -> String {
        self.lock().rag_key.clone()
    }

    /// Add the PDFs among `files` to the selection. Returns how many were accepted.
    ///
    /// Non-PDF files are dropped. If nothing was accepted the selection is left
    /// untouched and [`ChatError::UnsupportedFiles`] is returned.
    pub fn select_files(&self, files: Vec<UploadFile>) -> Result<usize, ChatError> {
        let (accepted, rejected): (Vec<_>, Vec<_>) = files.into_iter().partition(UploadFile::is_pdf);
        let rejected: Vec<String> = rejected.into_iter().map(|f| f.file_name).collect();
        if accepted.is_empty() {
            return Err(ChatError::UnsupportedFiles { rejected });
        }
        if !rejected.is_empty() {
            warn!(?rejected, "skipping non-PDF files");
        }

        let count = accepted.len();
        let (total, key_dropped) = {
            let mut state = self.lock();
            state.files.extend(accepted);
            state.selection += 1;
            let key_dropped = !state.rag_key.is_empty();
            state.rag_key.clear();
            (state.files.len(), key_dropped)
        };
        info!(count, total, "files selected");
        self.events.emit(ChatEvent::FilesChanged { count: total });
        if key_dropped {
            self.events.emit(ChatEvent::RetrievalKeyChanged { key: None });
        }
        Ok(count)
    }

    pub fn remove_file(&self, index: usize) -> Option<UploadFile> {
        let (removed, total) = {
            let mut state = self.lock();
            if index >= state.files.len() {
                return None;
            }
            let removed = state.files.remove(index);
            state.selection += 1;
            (removed, state.files.len())
        };
        self.events.emit(ChatEvent::FilesChanged { count: total });
        Some(removed)
    }

    pub fn clear_files(&self) {
        {
            let mut state = self.lock();
            state.files.clear();
            state.selection += 1;
        }
        self.events.emit(ChatEvent::FilesChanged { count: 0 });
    }

    pub fn set_rag_key(&self, key: impl Into<String>) {
        let key = key.into();
        self.lock().rag_key = key.clone();
        self.events.emit(ChatEvent::RetrievalKeyChanged {
            key: (!key.is_empty()).then_some(key),
        });
    }

    pub fn clear_rag_key(&self) {
        self.set_rag_key(String::new());
    }

    /// Embed every selected file in one request and store the returned key.
    ///
    /// If the selection changes while the request is in flight the key is
    /// not stored and [`ChatError::Cancelled`] is returned.
    pub async fn embed(&self) -> Result<String, ChatError> {
        let (files, selection) = {
            let mut state = self.lock();
            if state.files.is_empty() {
                return Err(ChatError::NoFiles);
            }
            if state.embedding {
                return Err(ChatError::Busy);
            }
            state.embedding = true;
            (state.files.clone(), state.selection)
        };
        info!(files = files.len(), "embedding documents");

        let result = self.backend.embed(files).await.and_then(|resp| {
            resp.rag_key
                .filter(|k| !k.is_empty())
                .ok_or_else(|| ChatError::malformed("rag_key", "missing or empty retrieval key"))
        });

        let stored = {
            let mut state = self.lock();
            state.embedding = false;
            match result {
                Ok(key) if state.selection == selection => {
                    state.rag_key = key.clone();
                    Ok(key)
                }
                Ok(_) => Err(ChatError::Cancelled),
                Err(err) => Err(err),
            }
        };
        match &stored {
            Ok(key) => self.events.emit(ChatEvent::RetrievalKeyChanged {
                key: Some(key.clone()),
            }),
            Err(ChatError::Cancelled) => warn!("file selection changed during embedding; key discarded"),
            Err(err) => warn!(error = %err, "embedding failed"),
        }
        stored
    }

    /// Ask a question against the embedded documents.
    ///
    /// Rejected before any network activity when no retrieval key is set.
    pub async fn send(&self, content: &str, options: RagOptions) -> Result<Message, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let rag_key = self.rag_key();
        if rag_key.is_empty() {
            warn!("retrieval send rejected: no retrieval key");
            return Err(ChatError::MissingRetrievalKey);
        }

        let ticket = self.conversation.begin_send(content)?;
        let query = RagQuery {
            message: content.to_string(),
            use_openai: options.use_openai,
            selected_model: options.selected_model,
            conversation_id: ticket.conversation_id.clone(),
            conversation_history: ticket.history.clone(),
            rag_key,
        };
        info!(model = %query.selected_model, "rag request");
        let result = self.backend.rag(query).await;
        self.conversation.settle(&ticket, result)
    }

    /// Clear the conversation. Files and retrieval key are kept.
    pub fn clear(&self) {
        self.conversation.clear();
    }
}
