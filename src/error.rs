//! Crate-wide error type.
//!
//! Every fallible operation in the library returns [`ChatError`]. Failures that
//! reach a conversation are also recorded on the message (or comparison slot)
//! as a [`FailureKind`], so the view can tell a dropped connection apart from a
//! backend that answered with an error status.

use serde::{Deserialize, Serialize};

/// Errors produced by the backend client, the tab state managers and the proxy.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// The request never got an HTTP response (connect, DNS, reset, timeout).
    #[error("connection to {url} failed: {detail}")]
    Transport { url: String, detail: String },

    /// The backend replied with a non-2xx status.
    #[error("HTTP {status} from {url}: {detail}")]
    Status {
        status: u16,
        url: String,
        detail: String,
    },

    /// The backend replied 2xx but the body lacked an expected field.
    #[error("malformed response field '{field}': {detail}")]
    Malformed { field: String, detail: String },

    #[error("message is empty")]
    EmptyMessage,

    /// A send is already in flight on this tab.
    #[error("a request is already in flight on this tab")]
    Busy,

    #[error("no retrieval key: embed documents before asking questions")]
    MissingRetrievalKey,

    #[error("no files selected for embedding")]
    NoFiles,

    #[error("only PDF files are accepted (rejected: {})", rejected.join(", "))]
    UnsupportedFiles { rejected: Vec<String> },

    #[error("no message with id {id}")]
    UnknownMessage { id: String },

    /// The tab was cleared while the request was in flight; the response was discarded.
    #[error("conversation was cleared while the request was in flight")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid config {path}: {detail}")]
    Config { path: String, detail: String },
}

impl ChatError {
    /// Classify a backend-call failure for display on a message or slot.
    ///
    /// Local precondition failures never reach a conversation, so they fold
    /// into `Malformed` here only for completeness.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            ChatError::Transport { .. } | ChatError::Io(_) => FailureKind::Transport,
            ChatError::Status { status, .. } => FailureKind::Status { status: *status },
            _ => FailureKind::Malformed,
        }
    }

    /// True for errors raised locally before any network activity.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            ChatError::EmptyMessage
                | ChatError::Busy
                | ChatError::MissingRetrievalKey
                | ChatError::NoFiles
                | ChatError::UnsupportedFiles { .. }
                | ChatError::UnknownMessage { .. }
        )
    }

    pub(crate) fn transport(url: &str, err: impl std::fmt::Display) -> Self {
        ChatError::Transport {
            url: url.to_string(),
            detail: err.to_string(),
        }
    }

    pub(crate) fn malformed(field: &str, detail: impl Into<String>) -> Self {
        ChatError::Malformed {
            field: field.to_string(),
            detail: detail.into(),
        }
    }
}

/// Failure tag carried by failure-indicator messages and failed comparison slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    Transport,
    Status { status: u16 },
    Malformed,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transport => write!(f, "network error"),
            FailureKind::Status { status } => write!(f, "backend error {status}"),
            FailureKind::Malformed => write!(f, "unexpected response"),
        }
    }
}
