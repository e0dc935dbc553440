use crate::error::ChatError;
use crate::models::{Conversation, Message, NewMessage};
use crate::services::conversation::{truncate_title, ConversationRegistry};
use crate::services::ledger::MessageLedger;

/// The composer-facing surface: every user action that mutates chat state
/// goes through here.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    registry: ConversationRegistry,
    ledger: MessageLedger,
}

impl ChatSession {
    pub fn new(registry: ConversationRegistry, ledger: MessageLedger) -> Self {
        Self { registry, ledger }
    }

    pub fn registry(&self) -> &ConversationRegistry {
        &self.registry
    }

    pub fn ledger(&self) -> &MessageLedger {
        &self.ledger
    }

    /// Record a user message and ask for a reply.
    ///
    /// Starts a new conversation, titled after the message, when none is
    /// current. Blank text is rejected before anything is touched. Returns
    /// the id of the conversation the message landed in.
    pub fn send_message(&self, text: &str) -> Result<String, ChatError> {
        if text.trim().is_empty() {
            tracing::warn!("Refusing to send an empty message");
            return Err(ChatError::Validation(
                "cannot send an empty message".to_string(),
            ));
        }

        let conversation_id = match self.registry.current_id() {
            Some(id) => id,
            None => self
                .registry
                .create_conversation(&truncate_title(text), None),
        };

        self.ledger
            .append_message(NewMessage::user(conversation_id.as_str(), text))?;
        self.ledger.set_should_respond(true);
        Ok(conversation_id)
    }

    /// Leave the current conversation and start composing a fresh one.
    pub fn start_new_chat(&self) {
        self.ledger.clear_messages();
        self.registry.switch_conversation(None);
    }

    pub fn select_conversation(&self, id: &str) {
        self.registry.switch_conversation(Some(id));
    }

    pub fn rename_conversation(&self, id: &str, title: &str) {
        self.registry.update_conversation_title(id, title);
    }

    /// Remove a conversation together with its messages.
    pub fn delete_conversation(&self, id: &str) -> usize {
        self.registry.remove_conversation(id);
        self.ledger.remove_conversation_messages(id)
    }

    pub fn seed_conversations<S: AsRef<str>>(&self, titles: &[S]) -> usize {
        self.registry.seed_defaults(titles)
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.registry.conversations()
    }

    pub fn current_messages(&self) -> Vec<Message> {
        self.ledger
            .messages_for_conversation(self.registry.current_id().as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_send_without_conversation_creates_one() {
        let session = ChatSession::default();
        let id = session.send_message("hi").unwrap();

        assert_eq!(session.registry().len(), 1);
        assert_eq!(session.registry().current_id(), Some(id.clone()));
        assert_eq!(session.registry().get(&id).unwrap().title, "hi");

        let messages = session.ledger().messages_for_conversation(Some(&id));
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hi");
        assert!(session.ledger().should_respond());
    }

    #[test]
    fn test_send_uses_current_conversation() {
        let session = ChatSession::default();
        session.registry().create_conversation("T1", Some("c1"));
        assert_eq!(session.send_message("first").unwrap(), "c1");
        assert_eq!(session.send_message("second").unwrap(), "c1");
        assert_eq!(session.registry().len(), 1);
        assert_eq!(session.current_messages().len(), 2);
    }

    #[test]
    fn test_empty_send_mutates_nothing() {
        let session = ChatSession::default();
        for text in ["", "   ", "\n\t"] {
            let err = session.send_message(text).unwrap_err();
            assert!(matches!(err, ChatError::Validation(_)));
        }
        assert!(session.registry().is_empty());
        assert_eq!(session.registry().current_id(), None);
        assert!(session.ledger().is_empty());
        assert!(!session.ledger().should_respond());
    }

    #[test]
    fn test_start_new_chat_clears_state() {
        let session = ChatSession::default();
        session.send_message("hello").unwrap();
        session.start_new_chat();

        assert!(session.ledger().is_empty());
        assert_eq!(session.registry().current_id(), None);
        assert_eq!(session.registry().len(), 1);
        assert!(session.current_messages().is_empty());
    }

    #[test]
    fn test_delete_conversation_drops_its_messages() {
        let session = ChatSession::default();
        let first = session.send_message("first chat").unwrap();
        session.start_new_chat();
        let second = session.send_message("second chat").unwrap();
        session.select_conversation(&first);

        assert_eq!(session.delete_conversation(&first), 0);
        assert_eq!(session.registry().current_id(), None);
        assert_eq!(session.delete_conversation(&second), 1);
        assert!(session.conversations().is_empty());
    }

    #[test]
    fn test_rename_and_seed() {
        let session = ChatSession::default();
        assert_eq!(session.seed_conversations(&["Welcome", "Tips"]), 2);
        let current = session.registry().current_id().unwrap();
        session.rename_conversation(&current, "Renamed");
        assert_eq!(session.conversations()[0].title, "Renamed");
    }
}
