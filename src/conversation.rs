//! Per-tab conversation core.
//!
//! Every tab owns one [`Conversation`]: the message log, the backend-assigned
//! conversation id and the loading flag. A send goes through three steps:
//!
//! 1. [`Conversation::begin_send`] validates, flips the loading flag under the
//!    lock (a second send gets [`ChatError::Busy`]), snapshots the history and
//!    appends the user message.
//! 2. The tab calls the backend with the [`SendTicket`] contents.
//! 3. [`Conversation::settle`] appends the answer or a failure indicator.
//!
//! [`Conversation::clear`] bumps an epoch. Tickets issued before the bump are
//! stale: their results are dropped with [`ChatError::Cancelled`], so a late
//! response cannot resurrect a cleared conversation.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::error::ChatError;
use crate::events::{ChatEvent, EventSink};
use crate::message::{history_of, HistoryEntry, Message};
use crate::protocol::ChatResponse;
use crate::tabs::TabKind;

#[derive(Debug, Default)]
struct ConversationState {
    messages: Vec<Message>,
    conversation_id: String,
    is_loading: bool,
    epoch: u64,
}

/// Handle for one in-flight send.
#[derive(Debug, Clone)]
pub struct SendTicket {
    epoch: u64,
    /// Log as it stood before the user message was appended.
    pub history: Vec<HistoryEntry>,
    /// Conversation id at dispatch time; empty before the first answer.
    pub conversation_id: String,
    pub user_message: Message,
}

#[derive(Debug, Clone)]
pub struct Conversation {
    tab: TabKind,
    state: Arc<Mutex<ConversationState>>,
    events: EventSink,
}

impl Conversation {
    pub fn new(tab: TabKind, events: EventSink) -> Self {
        Conversation {
            tab,
            state: Arc::new(Mutex::new(ConversationState::default())),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConversationState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn tab(&self) -> TabKind {
        self.tab
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn message(&self, id: &str) -> Option<Message> {
        self.lock().messages.iter().find(|m| m.id == id).cloned()
    }

    pub fn conversation_id(&self) -> Option<String> {
        let state = self.lock();
        (!state.conversation_id.is_empty()).then(|| state.conversation_id.clone())
    }

    pub fn is_loading(&self) -> bool {
        self.lock().is_loading
    }

    pub fn is_current(&self, ticket: &SendTicket) -> bool {
        self.lock().epoch == ticket.epoch
    }

    /// Validate and start a send. Appends the user message before returning.
    pub fn begin_send(&self, content: &str) -> Result<SendTicket, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        let ticket = {
            let mut state = self.lock();
            if state.is_loading {
                return Err(ChatError::Busy);
            }
            state.is_loading = true;
            let history = history_of(&state.messages);
            let user_message = Message::user(content, &state.conversation_id);
            state.messages.push(user_message.clone());
            SendTicket {
                epoch: state.epoch,
                history,
                conversation_id: state.conversation_id.clone(),
                user_message,
            }
        };
        debug!(tab = %self.tab, history = ticket.history.len(), "send started");
        self.events.emit(ChatEvent::MessageAppended {
            tab: self.tab,
            message: ticket.user_message.clone(),
        });
        self.events.emit(ChatEvent::LoadingChanged {
            tab: self.tab,
            loading: true,
        });
        Ok(ticket)
    }

    /// Record the outcome of a backend call: an answer, or a failure indicator.
    pub fn settle(
        &self,
        ticket: &SendTicket,
        result: Result<ChatResponse, ChatError>,
    ) -> Result<Message, ChatError> {
        let outcome = result.and_then(|resp| {
            let text = resp
                .text()
                .map(str::to_string)
                .ok_or_else(|| ChatError::malformed("response", "missing or empty answer text"))?;
            let returned_id = resp.conversation().map(str::to_string);
            Ok((text, returned_id, resp.model_info))
        });

        let (message, err) = {
            let mut state = self.lock();
            if state.epoch != ticket.epoch {
                debug!(tab = %self.tab, "discarding response for cleared conversation");
                return Err(ChatError::Cancelled);
            }
            state.is_loading = false;
            match outcome {
                Ok((text, returned_id, model_info)) => {
                    if let Some(id) = returned_id {
                        state.conversation_id = id;
                    }
                    let message = Message::assistant(text, &state.conversation_id, model_info);
                    state.messages.push(message.clone());
                    (message, None)
                }
                Err(err) => {
                    warn!(tab = %self.tab, error = %err, "send failed");
                    let message = Message::failure(&err, &state.conversation_id);
                    state.messages.push(message.clone());
                    (message, Some(err))
                }
            }
        };

        self.events.emit(ChatEvent::MessageAppended {
            tab: self.tab,
            message: message.clone(),
        });
        self.events.emit(ChatEvent::LoadingChanged {
            tab: self.tab,
            loading: false,
        });
        match err {
            Some(err) => Err(err),
            None => Ok(message),
        }
    }

    /// Adopt a backend-assigned id without appending anything. Ignored for stale tickets.
    pub fn adopt_conversation_id(&self, ticket: &SendTicket, id: &str) {
        if id.is_empty() {
            return;
        }
        let mut state = self.lock();
        if state.epoch == ticket.epoch {
            state.conversation_id = id.to_string();
        }
    }

    /// Clear the loading flag for a send that appends no answer to this log.
    pub fn finish(&self, ticket: &SendTicket) -> Result<(), ChatError> {
        {
            let mut state = self.lock();
            if state.epoch != ticket.epoch {
                return Err(ChatError::Cancelled);
            }
            state.is_loading = false;
        }
        self.events.emit(ChatEvent::LoadingChanged {
            tab: self.tab,
            loading: false,
        });
        Ok(())
    }

    /// Reset to an empty conversation and invalidate in-flight tickets.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.messages.clear();
            state.conversation_id.clear();
            state.is_loading = false;
            state.epoch = state.epoch.wrapping_add(1);
        }
        self.events.emit(ChatEvent::Cleared { tab: self.tab });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use crate::message::{ModelInfo, Role};

    fn reply(text: &str, id: Option<&str>) -> Result<ChatResponse, ChatError> {
        Ok(ChatResponse {
            response: Some(text.to_string()),
            conversation_id: id.map(str::to_string),
            model_info: None,
        })
    }

    fn conversation() -> Conversation {
        Conversation::new(TabKind::Qna, EventSink::default())
    }

    #[test]
    fn test_begin_send_appends_user_message_first() {
        let conv = conversation();
        let ticket = conv.begin_send("What is 2+2?").unwrap();
        let log = conv.messages();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].role, Role::User);
        assert_eq!(log[0].content, "What is 2+2?");
        assert!(ticket.history.is_empty());
        assert!(conv.is_loading());
    }

    #[test]
    fn test_empty_content_rejected_without_change() {
        let conv = conversation();
        assert!(matches!(conv.begin_send("   \n"), Err(ChatError::EmptyMessage)));
        assert!(conv.messages().is_empty());
        assert!(!conv.is_loading());
    }

    #[test]
    fn test_second_send_is_busy() {
        let conv = conversation();
        let _ticket = conv.begin_send("one").unwrap();
        assert!(matches!(conv.begin_send("two"), Err(ChatError::Busy)));
        assert_eq!(conv.messages().len(), 1);
    }

    #[test]
    fn test_settle_success_adopts_id_and_attribution() {
        let conv = conversation();
        let ticket = conv.begin_send("hi").unwrap();
        let resp = Ok(ChatResponse {
            response: Some("hello".into()),
            conversation_id: Some("conv_1".into()),
            model_info: Some(ModelInfo {
                provider: "OpenAI".into(),
                model: "gpt-4o".into(),
            }),
        });
        let msg = conv.settle(&ticket, resp).unwrap();
        assert_eq!(msg.content, "hello");
        assert_eq!(msg.conversation_id, "conv_1");
        assert_eq!(msg.model_info.unwrap().model, "gpt-4o");
        assert_eq!(conv.conversation_id().as_deref(), Some("conv_1"));
        assert!(!conv.is_loading());
    }

    #[test]
    fn test_settle_keeps_prior_id_when_absent() {
        let conv = conversation();
        let t1 = conv.begin_send("a").unwrap();
        conv.settle(&t1, reply("x", Some("c1"))).unwrap();
        let t2 = conv.begin_send("b").unwrap();
        assert_eq!(t2.conversation_id, "c1");
        assert_eq!(t2.history.len(), 2);
        conv.settle(&t2, reply("y", None)).unwrap();
        assert_eq!(conv.conversation_id().as_deref(), Some("c1"));
    }

    #[test]
    fn test_settle_failure_appends_indicator() {
        let conv = conversation();
        let ticket = conv.begin_send("hi").unwrap();
        let err = conv
            .settle(&ticket, Err(ChatError::transport("http://x", "refused")))
            .unwrap_err();
        assert!(matches!(err, ChatError::Transport { .. }));
        let log = conv.messages();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].failure, Some(FailureKind::Transport));
        assert!(!conv.is_loading());
    }

    #[test]
    fn test_missing_answer_text_is_malformed_failure() {
        let conv = conversation();
        let ticket = conv.begin_send("hi").unwrap();
        let resp = Ok(ChatResponse {
            response: None,
            conversation_id: Some("c1".into()),
            model_info: None,
        });
        assert!(matches!(conv.settle(&ticket, resp), Err(ChatError::Malformed { .. })));
        assert_eq!(conv.messages()[1].failure, Some(FailureKind::Malformed));
        assert!(conv.conversation_id().is_none());
    }

    #[test]
    fn test_clear_invalidates_in_flight_ticket() {
        let conv = conversation();
        let ticket = conv.begin_send("hi").unwrap();
        conv.clear();
        assert!(!conv.is_current(&ticket));
        let late = conv.settle(&ticket, reply("late", Some("c9")));
        assert!(matches!(late, Err(ChatError::Cancelled)));
        assert!(conv.messages().is_empty());
        assert!(conv.conversation_id().is_none());
        assert!(matches!(conv.finish(&ticket), Err(ChatError::Cancelled)));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let conv = conversation();
        let ticket = conv.begin_send("hi").unwrap();
        conv.settle(&ticket, reply("x", Some("c1"))).unwrap();
        conv.clear();
        conv.clear();
        assert!(conv.messages().is_empty());
        assert!(conv.conversation_id().is_none());
        assert!(!conv.is_loading());
    }

    #[test]
    fn test_adopt_ignores_stale_and_empty() {
        let conv = conversation();
        let ticket = conv.begin_send("hi").unwrap();
        conv.adopt_conversation_id(&ticket, "");
        assert!(conv.conversation_id().is_none());
        conv.adopt_conversation_id(&ticket, "c1");
        assert_eq!(conv.conversation_id().as_deref(), Some("c1"));
        conv.clear();
        conv.adopt_conversation_id(&ticket, "c2");
        assert!(conv.conversation_id().is_none());
    }

    #[test]
    fn test_events_in_order() {
        let (sink, mut rx) = EventSink::channel();
        let conv = Conversation::new(TabKind::Quality, sink);
        let ticket = conv.begin_send("hi").unwrap();
        conv.settle(&ticket, reply("yo", None)).unwrap();
        let kinds: Vec<&'static str> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|e| match e {
                ChatEvent::MessageAppended { .. } => "msg",
                ChatEvent::LoadingChanged { loading: true, .. } => "busy",
                ChatEvent::LoadingChanged { loading: false, .. } => "idle",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, ["msg", "busy", "msg", "idle"]);
    }
}
