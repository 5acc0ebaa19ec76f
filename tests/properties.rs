//! Property tests over tab state: gating, clearing and history filtering.

mod common;

use std::sync::Arc;

use common::*;
use multichat::message::{history_of, Message};
use multichat::tabs::{QnaTab, RagOptions, RagTab};
use multichat::{ChatError, EventSink};
use proptest::prelude::*;

fn options() -> RagOptions {
    RagOptions {
        use_openai: false,
        selected_model: "gpt-oss:20b".to_string(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Without a retrieval key nothing is ever sent, whatever the question.
    #[test]
    fn prop_rag_without_key_never_sends(content in ".{0,80}", use_openai in any::<bool>()) {
        let backend = Arc::new(MockBackend::new());
        let tab = RagTab::new(Arc::clone(&backend), EventSink::default());
        let opts = RagOptions { use_openai, ..options() };

        let result = tokio_test::block_on(tab.send(&content, opts));
        prop_assert!(result.is_err());
        if !content.trim().is_empty() {
            prop_assert!(matches!(result, Err(ChatError::MissingRetrievalKey)));
        }
        prop_assert_eq!(backend.request_count(), 0);
        prop_assert!(tab.messages().is_empty());
    }

    /// Clearing twice leaves the same state as clearing once.
    #[test]
    fn prop_clear_is_idempotent(turns in 0usize..6) {
        let backend = Arc::new(MockBackend::new());
        for i in 0..turns {
            backend.push("qna", answer(&format!("a{i}"), Some("conv")));
        }
        let tab = QnaTab::new(Arc::clone(&backend), EventSink::default());
        tokio_test::block_on(async {
            for i in 0..turns {
                tab.send(&format!("q{i}"), None).await.unwrap();
            }
        });
        prop_assert_eq!(tab.messages().len(), turns * 2);

        tab.clear();
        tab.clear();
        prop_assert!(tab.messages().is_empty());
        prop_assert!(tab.conversation().conversation_id().is_none());
        prop_assert!(!tab.is_loading());
    }

    /// History carries every successful turn in order and no failure indicator.
    #[test]
    fn prop_history_skips_failures(pattern in proptest::collection::vec(any::<bool>(), 0..12)) {
        let log: Vec<Message> = pattern
            .iter()
            .enumerate()
            .map(|(i, ok)| {
                if *ok {
                    Message::user(format!("m{i}"), "c")
                } else {
                    Message::failure(&transport("down"), "c")
                }
            })
            .collect();

        let history = history_of(&log);
        let expected: Vec<String> = pattern
            .iter()
            .enumerate()
            .filter(|(_, ok)| **ok)
            .map(|(i, _)| format!("m{i}"))
            .collect();
        let got: Vec<String> = history.into_iter().map(|h| h.content).collect();
        prop_assert_eq!(got, expected);
    }
}
