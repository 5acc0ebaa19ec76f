//! State-change notifications for the view.
//!
//! Tabs push a [`ChatEvent`] after every mutation. The terminal view drains
//! the receiving end and re-renders, so comparison slots show up the moment
//! they settle instead of when the whole send returns.

use tokio::sync::mpsc;

use crate::message::{ComparisonMessage, Message, ModelSlot, SlotKey};
use crate::tabs::quality::Enhancement;
use crate::tabs::TabKind;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    MessageAppended {
        tab: TabKind,
        message: Message,
    },
    LoadingChanged {
        tab: TabKind,
        loading: bool,
    },
    ComparisonStarted {
        comparison: ComparisonMessage,
    },
    SlotSettled {
        comparison_id: String,
        slot: SlotKey,
        state: ModelSlot,
    },
    FilesChanged {
        count: usize,
    },
    /// `None` when the key was cleared.
    RetrievalKeyChanged {
        key: Option<String>,
    },
    EnhancementChanged {
        message_id: String,
        enhancement: Enhancement,
    },
    Cleared {
        tab: TabKind,
    },
}

/// Optional sender shared by every tab; a sink without a receiver drops events.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<ChatEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<ChatEvent>) -> Self {
        EventSink { tx: Some(tx) }
    }

    /// Sink plus its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(tx), rx)
    }

    pub fn emit(&self, event: ChatEvent) {
        if let Some(tx) = &self.tx {
            // Receiver gone means the view shut down; nothing left to notify.
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_receiver() {
        let (sink, mut rx) = EventSink::channel();
        sink.emit(ChatEvent::Cleared { tab: TabKind::Qna });
        assert_eq!(rx.try_recv().unwrap(), ChatEvent::Cleared { tab: TabKind::Qna });
    }

    #[test]
    fn test_default_sink_drops_silently() {
        EventSink::default().emit(ChatEvent::FilesChanged { count: 1 });
    }

    #[test]
    fn test_emit_after_receiver_dropped() {
        let (sink, rx) = EventSink::channel();
        drop(rx);
        sink.emit(ChatEvent::FilesChanged { count: 0 });
    }
}
