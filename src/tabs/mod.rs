//! Per-tab state managers and the aggregator that routes to the active one.
//!
//! Each tab is an explicit state object holding its own conversation; none of
//! them share mutable state. [`ChatHub`] owns one of each and exposes a uniform
//! `messages` / `is_loading` / `send` / `clear` surface for the active tab.

pub mod compare;
pub mod qna;
pub mod quality;
pub mod rag;

use std::sync::Arc;

use crate::backend::ChatBackend;
use crate::config::Config;
use crate::error::ChatError;
use crate::events::EventSink;
use crate::message::{CompareModels, ComparisonMessage, Message};
use crate::protocol::ModelConfig;

pub use compare::CompareTab;
pub use qna::QnaTab;
pub use quality::{Enhancement, QualityTab};
pub use rag::{RagOptions, RagTab};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, clap::ValueEnum)]
pub enum TabKind {
    #[default]
    Qna,
    Rag,
    Compare,
    Quality,
}

impl TabKind {
    pub const ALL: [TabKind; 4] = [TabKind::Qna, TabKind::Rag, TabKind::Compare, TabKind::Quality];

    pub fn title(self) -> &'static str {
        match self {
            TabKind::Qna => "Q&A",
            TabKind::Rag => "Document retrieval",
            TabKind::Compare => "Model comparison",
            TabKind::Quality => "Answer quality",
        }
    }

    /// Case-insensitive parse of the tab names shown by `Display`.
    pub fn parse(s: &str) -> Option<Self> {
        <TabKind as clap::ValueEnum>::from_str(s.trim(), true).ok()
    }
}

impl std::fmt::Display for TabKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TabKind::Qna => write!(f, "qna"),
            TabKind::Rag => write!(f, "rag"),
            TabKind::Compare => write!(f, "compare"),
            TabKind::Quality => write!(f, "quality"),
        }
    }
}

/// Mode configuration the view passes along with a send.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SendOptions {
    pub use_openai: bool,
    /// Model for Q&A and retrieval; the provider's configured default when `None`.
    pub model: Option<String>,
    /// Models for a comparison; the configured defaults when `None`.
    pub compare_models: Option<CompareModels>,
}

/// What a send produced, by tab family.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Message(Message),
    Comparison(ComparisonMessage),
}

pub struct ChatHub<B> {
    config: Arc<Config>,
    active: TabKind,
    qna: QnaTab<B>,
    rag: RagTab<B>,
    compare: CompareTab<B>,
    quality: QualityTab<B>,
}

impl<B> Clone for ChatHub<B> {
    fn clone(&self) -> Self {
        ChatHub {
            config: Arc::clone(&self.config),
            active: self.active,
            qna: self.qna.clone(),
            rag: self.rag.clone(),
            compare: self.compare.clone(),
            quality: self.quality.clone(),
        }
    }
}

impl<B: ChatBackend> ChatHub<B> {
    pub fn new(backend: Arc<B>, config: Config, events: EventSink) -> Self {
        ChatHub {
            active: TabKind::default(),
            qna: QnaTab::new(Arc::clone(&backend), events.clone()),
            rag: RagTab::new(Arc::clone(&backend), events.clone()),
            compare: CompareTab::new(
                Arc::clone(&backend),
                config.compare_drain,
                config.compare_defaults.clone(),
                events.clone(),
            ),
            quality: QualityTab::new(backend, events),
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn active(&self) -> TabKind {
        self.active
    }

    pub fn set_active(&mut self, tab: TabKind) {
        self.active = tab;
    }

    pub fn qna(&self) -> &QnaTab<B> {
        &self.qna
    }

    pub fn rag(&self) -> &RagTab<B> {
        &self.rag
    }

    pub fn compare(&self) -> &CompareTab<B> {
        &self.compare
    }

    pub fn quality(&self) -> &QualityTab<B> {
        &self.quality
    }

    pub fn messages(&self) -> Vec<Message> {
        match self.active {
            TabKind::Qna => self.qna.messages(),
            TabKind::Rag => self.rag.messages(),
            TabKind::Compare => self.compare.messages(),
            TabKind::Quality => self.quality.messages(),
        }
    }

    pub fn is_loading(&self) -> bool {
        match self.active {
            TabKind::Qna => self.qna.is_loading(),
            TabKind::Rag => self.rag.is_loading() || self.rag.is_embedding(),
            TabKind::Compare => self.compare.is_loading(),
            TabKind::Quality => self.quality.is_loading(),
        }
    }

    /// Send `content` on the active tab.
    pub async fn send(&self, content: &str, options: &SendOptions) -> Result<Reply, ChatError> {
        let selected_model = || {
            options
                .model
                .clone()
                .unwrap_or_else(|| self.config.model_for(options.use_openai).to_string())
        };
        match self.active {
            TabKind::Qna => {
                let model_config = ModelConfig {
                    use_openai: options.use_openai,
                    selected_model: selected_model(),
                };
                self.qna.send(content, Some(model_config)).await.map(Reply::Message)
            }
            TabKind::Rag => {
                let rag_options = RagOptions {
                    use_openai: options.use_openai,
                    selected_model: selected_model(),
                };
                self.rag.send(content, rag_options).await.map(Reply::Message)
            }
            TabKind::Compare => self
                .compare
                .send(content, options.compare_models.clone())
                .await
                .map(Reply::Comparison),
            TabKind::Quality => self.quality.send(content).await.map(Reply::Message),
        }
    }

    /// Clear the active tab only.
    pub fn clear(&self) {
        match self.active {
            TabKind::Qna => self.qna.clear(),
            TabKind::Rag => self.rag.clear(),
            TabKind::Compare => self.compare.clear(),
            TabKind::Quality => self.quality.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tab_display_roundtrips_through_parse() {
        for tab in TabKind::ALL {
            assert_eq!(TabKind::parse(&tab.to_string()), Some(tab));
        }
    }

    #[test]
    fn test_tab_parse_ignores_case() {
        assert_eq!(TabKind::parse(" Compare "), Some(TabKind::Compare));
        assert_eq!(TabKind::parse("RAG"), Some(TabKind::Rag));
        assert_eq!(TabKind::parse("home"), None);
    }

    #[test]
    fn test_default_tab_is_qna() {
        assert_eq!(TabKind::default(), TabKind::Qna);
        assert_eq!(TabKind::Qna.title(), "Q&A");
    }
}
