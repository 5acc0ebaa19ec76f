//! In-memory chat-session registry served by the proxy's session routes.
//!
//! Sessions live only as long as the proxy process.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use uuid::Uuid;

use crate::message::ChatSession;

pub const DEFAULT_SESSION_TITLE: &str = "New chat";

pub type SessionStore = Arc<Mutex<HashMap<String, ChatSession>>>;

pub fn new_session_store() -> SessionStore {
    Arc::new(Mutex::new(HashMap::new()))
}

/// All sessions, most recently updated first.
pub fn list_sessions(store: &SessionStore) -> Vec<ChatSession> {
    let guard = store.lock().unwrap_or_else(PoisonError::into_inner);
    let mut sessions: Vec<ChatSession> = guard.values().cloned().collect();
    sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
    sessions
}

/// Register a new empty session. A missing or blank title gets [`DEFAULT_SESSION_TITLE`].
pub fn create_session(store: &SessionStore, title: Option<&str>) -> ChatSession {
    let now = Utc::now();
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_SESSION_TITLE);
    let session = ChatSession {
        id: format!("chat_{}", Uuid::new_v4().simple()),
        title: title.to_string(),
        messages: Vec::new(),
        created_at: now,
        updated_at: now,
    };
    store
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(session.id.clone(), session.clone());
    session
}

/// Retitle session `id`; `None` if no such session exists.
pub fn rename_session(store: &SessionStore, id: &str, title: &str) -> Option<ChatSession> {
    let mut guard = store.lock().unwrap_or_else(PoisonError::into_inner);
    let session = guard.get_mut(id)?;
    session.title = title.to_string();
    session.updated_at = Utc::now();
    Some(session.clone())
}
