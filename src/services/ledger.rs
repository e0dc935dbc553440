use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::ChatError;
use crate::models::{Message, NewMessage, Notice};

/// What the UI shows while a reply is in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseStatus {
    pub is_thinking: bool,
    pub scratchpad: String,
}

impl ResponseStatus {
    pub fn is_active(&self) -> bool {
        self.is_thinking || !self.scratchpad.is_empty()
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    /// Global insertion order, oldest first.
    messages: Vec<Message>,
    notices: Vec<Notice>,
}

/// Owns every committed message plus the transient state of the reply
/// currently being produced.
#[derive(Debug, Clone)]
pub struct MessageLedger {
    state: Arc<Mutex<LedgerState>>,
    should_respond: Arc<watch::Sender<bool>>,
    status: Arc<watch::Sender<ResponseStatus>>,
}

impl Default for MessageLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageLedger {
    pub fn new() -> Self {
        let (should_respond, _) = watch::channel(false);
        let (status, _) = watch::channel(ResponseStatus::default());
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            should_respond: Arc::new(should_respond),
            status: Arc::new(status),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Commit a message. Blank content is rejected without touching the ledger.
    pub fn append_message(&self, new_message: NewMessage) -> Result<Message, ChatError> {
        if new_message.content.trim().is_empty() {
            return Err(ChatError::Validation(
                "cannot append a message with empty content".to_string(),
            ));
        }

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: new_message.conversation_id,
            role: new_message.role,
            content: new_message.content,
            created_at: Utc::now(),
        };

        tracing::debug!(
            message_id = %message.id,
            conversation_id = %message.conversation_id,
            role = message.role.as_str(),
            "Message appended"
        );
        self.lock().messages.push(message.clone());
        Ok(message)
    }

    /// Messages of one conversation in insertion order. `None` or an unknown
    /// id yields an empty list.
    pub fn messages_for_conversation(&self, conversation_id: Option<&str>) -> Vec<Message> {
        let Some(conversation_id) = conversation_id else {
            return Vec::new();
        };
        self.lock()
            .messages
            .iter()
            .filter(|m| m.conversation_id == conversation_id)
            .cloned()
            .collect()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().messages.is_empty()
    }

    pub fn clear_messages(&self) {
        self.lock().messages.clear();
    }

    pub fn remove_conversation_messages(&self, conversation_id: &str) -> usize {
        let mut state = self.lock();
        let before = state.messages.len();
        state.messages.retain(|m| m.conversation_id != conversation_id);
        before - state.messages.len()
    }

    // --- Transient response state ---

    pub fn set_should_respond(&self, value: bool) {
        self.should_respond.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    pub fn should_respond(&self) -> bool {
        *self.should_respond.borrow()
    }

    pub fn subscribe_trigger(&self) -> watch::Receiver<bool> {
        self.should_respond.subscribe()
    }

    pub fn set_is_thinking(&self, value: bool) {
        self.status.send_if_modified(|status| {
            if status.is_thinking == value {
                false
            } else {
                status.is_thinking = value;
                true
            }
        });
    }

    pub fn set_scratchpad(&self, text: &str) {
        self.status.send_if_modified(|status| {
            if status.scratchpad == text {
                false
            } else {
                status.scratchpad.clear();
                status.scratchpad.push_str(text);
                true
            }
        });
    }

    pub fn reset_response_state(&self) {
        self.status.send_if_modified(|status| {
            if status.is_active() {
                *status = ResponseStatus::default();
                true
            } else {
                false
            }
        });
    }

    pub fn response_status(&self) -> ResponseStatus {
        self.status.borrow().clone()
    }

    pub fn is_thinking(&self) -> bool {
        self.status.borrow().is_thinking
    }

    pub fn scratchpad(&self) -> String {
        self.status.borrow().scratchpad.clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ResponseStatus> {
        self.status.subscribe()
    }

    // --- Notices ---

    pub fn push_notice(&self, text: impl Into<String>) -> Notice {
        let notice = Notice {
            id: Uuid::new_v4().to_string(),
            text: text.into(),
            created_at: Utc::now(),
        };
        self.lock().notices.push(notice.clone());
        notice
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.lock().notices.clone()
    }

    pub fn dismiss_notice(&self, id: &str) {
        self.lock().notices.retain(|n| n.id != id);
    }

    pub fn clear_notices(&self) {
        self.lock().notices.clear();
    }
}
