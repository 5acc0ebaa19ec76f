//! Multi-mode chat front-end for a remote LLM backend.
//!
//! Four independent tabs share one backend client:
//!
//! - **Q&A**: plain conversation, sent through the proxy.
//! - **Retrieval**: PDFs are embedded into a retrieval key, then questions run against them.
//! - **Comparison**: one question to three models, slots filled in as each answers.
//! - **Quality**: a base-tier answer that can be rewritten by a higher tier on demand.
//!
//! The [`proxy`] module serves the browser-facing HTTP routes, and the
//! `multichat` binary puts a terminal REPL on top of [`tabs::ChatHub`].

pub mod backend;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod events;
pub mod message;
pub mod protocol;
pub mod proxy;
pub mod render;
pub mod sessions;
pub mod tabs;
pub mod upload;

pub use backend::{ChatBackend, HttpBackend};
pub use config::Config;
pub use error::{ChatError, FailureKind};
pub use events::{ChatEvent, EventSink};
pub use tabs::{ChatHub, Reply, SendOptions, TabKind};
