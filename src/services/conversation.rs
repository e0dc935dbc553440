use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use uuid::Uuid;

use crate::models::Conversation;

#[derive(Debug, Default)]
struct RegistryState {
    /// Newest first.
    conversations: Vec<Conversation>,
    /// Every id ever handed out, including removed conversations.
    issued_ids: HashSet<String>,
}

/// Owns the conversation list and the current-conversation pointer.
///
/// Cloning yields another handle onto the same registry.
#[derive(Debug, Clone)]
pub struct ConversationRegistry {
    state: Arc<Mutex<RegistryState>>,
    current: Arc<watch::Sender<Option<String>>>,
}

impl Default for ConversationRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationRegistry {
    pub fn new() -> Self {
        let (current, _) = watch::channel(None);
        Self {
            state: Arc::new(Mutex::new(RegistryState::default())),
            current: Arc::new(current),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a conversation at the front of the list and make it current.
    ///
    /// An `explicit_id` that this registry has already issued is replaced by a
    /// fresh one, so ids stay unique even across removals. Returns the id
    /// actually used.
    pub fn create_conversation(&self, title: &str, explicit_id: Option<&str>) -> String {
        let id = {
            let mut state = self.lock();
            let id = match explicit_id {
                Some(id) if !state.issued_ids.contains(id) => id.to_string(),
                Some(id) => {
                    tracing::warn!(conversation_id = %id, "Conversation id already issued, generating a new one");
                    Self::fresh_id(&state.issued_ids)
                }
                None => Self::fresh_id(&state.issued_ids),
            };
            state.issued_ids.insert(id.clone());
            state
                .conversations
                .insert(0, Conversation::new(id.clone(), title.to_string()));
            id
        };

        tracing::debug!(conversation_id = %id, "Conversation created");
        self.switch_conversation(Some(&id));
        id
    }

    fn fresh_id(issued: &HashSet<String>) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !issued.contains(&id) {
                return id;
            }
        }
    }

    /// Point at `id` (or nothing). Existence is not checked.
    pub fn switch_conversation(&self, id: Option<&str>) {
        self.current.send_if_modified(|current| {
            if current.as_deref() == id {
                false
            } else {
                *current = id.map(str::to_string);
                true
            }
        });
    }

    pub fn update_conversation_title(&self, id: &str, title: &str) {
        let mut state = self.lock();
        if let Some(conv) = state.conversations.iter_mut().find(|c| c.id == id) {
            conv.title = title.to_string();
        }
    }

    /// Remove a conversation, clearing the current pointer if it pointed here.
    pub fn remove_conversation(&self, id: &str) {
        let removed = {
            let mut state = self.lock();
            let before = state.conversations.len();
            state.conversations.retain(|c| c.id != id);
            state.conversations.len() != before
        };

        if !removed {
            return;
        }

        tracing::debug!(conversation_id = %id, "Conversation removed");
        self.current.send_if_modified(|current| {
            if current.as_deref() == Some(id) {
                *current = None;
                true
            } else {
                false
            }
        });
    }

    /// Create one conversation per title, but only into an empty registry.
    pub fn seed_defaults<S: AsRef<str>>(&self, titles: &[S]) -> usize {
        if !self.is_empty() {
            return 0;
        }
        for title in titles {
            self.create_conversation(title.as_ref(), None);
        }
        titles.len()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.lock().conversations.clone()
    }

    pub fn get(&self, id: &str) -> Option<Conversation> {
        self.lock().conversations.iter().find(|c| c.id == id).cloned()
    }

    pub fn current_id(&self) -> Option<String> {
        self.current.borrow().clone()
    }

    pub fn current(&self) -> Option<Conversation> {
        self.current_id().and_then(|id| self.get(&id))
    }

    pub fn subscribe_current(&self) -> watch::Receiver<Option<String>> {
        self.current.subscribe()
    }

    pub fn len(&self) -> usize {
        self.lock().conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().conversations.is_empty()
    }
}

/// Truncate text to a short title for conversations.
pub fn truncate_title(text: &str) -> String {
    let first_line = text.trim().lines().next().unwrap_or_default();
    if first_line.chars().count() > 50 {
        let boundary = first_line
            .char_indices()
            .nth(47)
            .map(|(i, _)| i)
            .unwrap_or(first_line.len());
        format!("{}...", &first_line[..boundary])
    } else {
        first_line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_is_newest_first_and_current() {
        let registry = ConversationRegistry::new();
        let first = registry.create_conversation("First", None);
        let second = registry.create_conversation("Second", None);

        let ids: Vec<String> = registry.conversations().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![second.clone(), first]);
        assert_eq!(registry.current_id(), Some(second));
    }

    #[test]
    fn test_create_with_explicit_id() {
        let registry = ConversationRegistry::new();
        let id = registry.create_conversation("T1", Some("c1"));
        assert_eq!(id, "c1");
        assert_eq!(registry.get("c1").unwrap().title, "T1");
    }

    #[test]
    fn test_removed_id_is_never_reused() {
        let registry = ConversationRegistry::new();
        registry.create_conversation("T1", Some("c1"));
        registry.remove_conversation("c1");

        let id = registry.create_conversation("T2", Some("c1"));
        assert_ne!(id, "c1");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.current_id(), Some(id));
    }

    #[test]
    fn test_switch_does_not_validate() {
        let registry = ConversationRegistry::new();
        registry.switch_conversation(Some("ghost"));
        assert_eq!(registry.current_id().as_deref(), Some("ghost"));
        assert!(registry.current().is_none());
        registry.switch_conversation(None);
        assert_eq!(registry.current_id(), None);
    }

    #[test]
    fn test_update_title() {
        let registry = ConversationRegistry::new();
        registry.create_conversation("Old", Some("c1"));
        registry.update_conversation_title("c1", "New");
        registry.update_conversation_title("missing", "Nope");
        assert_eq!(registry.get("c1").unwrap().title, "New");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_current_clears_pointer() {
        let registry = ConversationRegistry::new();
        registry.create_conversation("T1", Some("c1"));
        registry.remove_conversation("c1");
        assert!(registry.is_empty());
        assert_eq!(registry.current_id(), None);
    }

    #[test]
    fn test_remove_other_keeps_pointer() {
        let registry = ConversationRegistry::new();
        registry.create_conversation("T1", Some("c1"));
        registry.create_conversation("T2", Some("c2"));
        registry.remove_conversation("c1");
        assert_eq!(registry.current_id().as_deref(), Some("c2"));
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let registry = ConversationRegistry::new();
        registry.create_conversation("T1", Some("c1"));
        let before = registry.conversations();
        registry.remove_conversation("nope");
        assert_eq!(registry.conversations(), before);
        assert_eq!(registry.current_id().as_deref(), Some("c1"));
    }

    #[test]
    fn test_seed_only_into_empty_registry() {
        let registry = ConversationRegistry::new();
        assert_eq!(registry.seed_defaults(&["a", "b", "c"]), 3);
        assert_eq!(registry.seed_defaults(&["d"]), 0);
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.conversations()[0].title, "c");
    }

    #[test]
    fn test_current_is_observable() {
        let registry = ConversationRegistry::new();
        let mut rx = registry.subscribe_current();
        registry.create_conversation("T1", Some("c1"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().as_deref(), Some("c1"));
        registry.switch_conversation(Some("c1"));
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("Hello\nsecond line"), "Hello");
        let long = "a".repeat(60);
        let title = truncate_title(&long);
        assert_eq!(title.chars().count(), 50);
        assert!(title.ends_with("..."));
        let accented = "é".repeat(60);
        assert_eq!(truncate_title(&accented).chars().count(), 50);
    }
}
