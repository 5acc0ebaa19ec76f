//! Three-way model comparison.
//!
//! One question goes to three models at once. The comparison record is
//! appended with all three slots loading before any request is issued, and
//! each slot is updated in place as its own request settles. Slot positions
//! are fixed by [`SlotKey`], never by arrival order.
//!
//! With [`DrainOrder::Completion`] the requests are drained through a
//! `FuturesUnordered`, so a fast model is shown while a slow one is still
//! loading. [`DrainOrder::Launch`] drains through a `FuturesOrdered` instead,
//! matching older clients where `model1` gated the others.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::stream::{FuturesOrdered, FuturesUnordered, StreamExt};
use tracing::{debug, info, warn};

use crate::backend::ChatBackend;
use crate::config::DrainOrder;
use crate::conversation::{Conversation, SendTicket};
use crate::error::ChatError;
use crate::events::{ChatEvent, EventSink};
use crate::message::{CompareModels, ComparisonMessage, Message, SlotKey};
use crate::protocol::{ChatResponse, CompareQuery};
use crate::tabs::TabKind;

pub struct CompareTab<B> {
    backend: Arc<B>,
    /// Linear log of the questions asked; only used as history for later turns.
    conversation: Conversation,
    comparisons: Arc<Mutex<Vec<ComparisonMessage>>>,
    drain: DrainOrder,
    defaults: CompareModels,
    events: EventSink,
}

impl<B> Clone for CompareTab<B> {
    fn clone(&self) -> Self {
        CompareTab {
            backend: Arc::clone(&self.backend),
            conversation: self.conversation.clone(),
            comparisons: Arc::clone(&self.comparisons),
            drain: self.drain,
            defaults: self.defaults.clone(),
            events: self.events.clone(),
        }
    }
}

impl<B: ChatBackend> CompareTab<B> {
    pub fn new(
        backend: Arc<B>,
        drain: DrainOrder,
        defaults: CompareModels,
        events: EventSink,
    ) -> Self {
        CompareTab {
            backend,
            conversation: Conversation::new(TabKind::Compare, events.clone()),
            comparisons: Arc::new(Mutex::new(Vec::new())),
            drain,
            defaults,
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ComparisonMessage>> {
        self.comparisons.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn drain_order(&self) -> DrainOrder {
        self.drain
    }

    pub fn messages(&self) -> Vec<Message> {
        self.conversation.messages()
    }

    pub fn comparisons(&self) -> Vec<ComparisonMessage> {
        self.lock().clone()
    }

    pub fn comparison(&self, id: &str) -> Option<ComparisonMessage> {
        self.lock().iter().find(|c| c.id == id).cloned()
    }

    /// True until all three requests of the current send have settled.
    pub fn is_loading(&self) -> bool {
        self.conversation.is_loading()
    }

    /// Ask `content` of three models. `models` falls back to the configured defaults.
    ///
    /// Returns the settled comparison record. Per-model failures are recorded
    /// in their slots; only local precondition errors and [`ChatError::Cancelled`]
    /// surface as `Err`.
    pub async fn send(
        &self,
        content: &str,
        models: Option<CompareModels>,
    ) -> Result<ComparisonMessage, ChatError> {
        let models = models.unwrap_or_else(|| self.defaults.clone());
        let ticket = self.conversation.begin_send(content)?;

        let record = ComparisonMessage::new(content, &models);
        let id = record.id.clone();
        self.lock().push(record.clone());
        self.events.emit(ChatEvent::ComparisonStarted { comparison: record });

        let requests = SlotKey::ALL.map(|slot| {
            let backend = Arc::clone(&self.backend);
            let query = CompareQuery {
                message: content.to_string(),
                conversation_id: ticket.conversation_id.clone(),
                conversation_history: ticket.history.clone(),
                selected_model: models.get(slot).to_string(),
            };
            async move {
                debug!(%slot, model = %query.selected_model, "compare request");
                (slot, backend.compare(query).await)
            }
        });
        info!(models = ?[&models.model1, &models.model2, &models.model3], drain = ?self.drain, "comparison dispatched");

        let mut adopted = false;
        match self.drain {
            DrainOrder::Completion => {
                let mut pending: FuturesUnordered<_> = requests.into_iter().collect();
                while let Some((slot, result)) = pending.next().await {
                    self.settle_slot(&ticket, &id, slot, result, &mut adopted);
                }
            }
            DrainOrder::Launch => {
                let mut pending: FuturesOrdered<_> = requests.into_iter().collect();
                while let Some((slot, result)) = pending.next().await {
                    self.settle_slot(&ticket, &id, slot, result, &mut adopted);
                }
            }
        }

        self.conversation.finish(&ticket)?;
        self.comparison(&id).ok_or(ChatError::Cancelled)
    }

    fn settle_slot(
        &self,
        ticket: &SendTicket,
        id: &str,
        slot: SlotKey,
        result: Result<ChatResponse, ChatError>,
        adopted: &mut bool,
    ) {
        if !self.conversation.is_current(ticket) {
            debug!(%slot, "discarding comparison response for cleared tab");
            return;
        }

        let result = result.and_then(|resp| match resp.text() {
            Some(_) => Ok(resp),
            None => Err(ChatError::malformed("response", "missing or empty answer text")),
        });

        let adopts = match self.drain {
            DrainOrder::Completion => !*adopted,
            DrainOrder::Launch => slot == SlotKey::Model1,
        };
        if let Ok(resp) = &result {
            if adopts {
                if let Some(conv_id) = resp.conversation() {
                    self.conversation.adopt_conversation_id(ticket, conv_id);
                    *adopted = true;
                }
            }
        }

        let state = {
            let mut list = self.lock();
            let Some(record) = list.iter_mut().find(|c| c.id == id) else {
                return;
            };
            match result {
                Ok(resp) => {
                    let text = resp.response.unwrap_or_default();
                    record.resolve(slot, text, resp.model_info);
                }
                Err(err) => {
                    warn!(%slot, model = %record.slot(slot).model, error = %err, "compare request failed");
                    record.reject(slot, &err);
                }
            }
            record.slot(slot).clone()
        };
        self.events.emit(ChatEvent::SlotSettled {
            comparison_id: id.to_string(),
            slot,
            state,
        });
    }

    /// Drop both the question log and the comparison records.
    pub fn clear(&self) {
        self.lock().clear();
        self.conversation.clear();
    }
}
