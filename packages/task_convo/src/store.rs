//! Per-session conversation state.
//!
//! The store is owned by one event loop and mutated only there. It carries
//! no locks; ordering between a session switch and an in-flight result is
//! decided by the caller, which checks the owner before calling [`ConversationStore::seed`]
//! or [`ConversationStore::append`] and the store re-checks it.

use tracing::debug;

use crate::types::{Message, SessionId};

#[derive(Debug, Default, Clone)]
pub struct ConversationStore {
    session_id: Option<SessionId>,
    messages: Vec<Message>,
    seeded: bool,
    history_len: usize,
    loading: bool,
    typing: bool,
    error: Option<String>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears every field and records the new owner (or none).
    pub fn reset(&mut self, session_id: Option<SessionId>) {
        *self = Self {
            session_id,
            ..Self::default()
        };
    }

    pub fn begin_load(&mut self) {
        self.loading = true;
    }

    /// Applies a history result for `session_id`.
    ///
    /// Discarded (returns `false`) if the store belongs to another session or
    /// has already been seeded since the last reset. History is placed ahead
    /// of anything appended while the load was in flight.
    pub fn seed(&mut self, session_id: &SessionId, history: Vec<Message>) -> bool {
        if self.session_id.as_ref() != Some(session_id) {
            debug!(%session_id, owner = ?self.session_id, "discarding history for inactive session");
            return false;
        }
        if self.seeded {
            debug!(%session_id, "discarding duplicate history seed");
            return false;
        }
        self.history_len = history.len();
        let live = std::mem::replace(&mut self.messages, history);
        self.messages.extend(live);
        self.seeded = true;
        self.loading = false;
        true
    }

    /// Records a failed history load. The list keeps whatever was appended
    /// live and gets no history.
    pub fn fail_load(&mut self, error: impl Into<String>) {
        self.loading = false;
        self.error = Some(error.into());
    }

    /// Adds one message to the end. Rejected when the store has no owner or
    /// the message names a different session.
    pub fn append(&mut self, message: Message) -> bool {
        let Some(owner) = self.session_id.as_ref() else {
            debug!("discarding message with no active session");
            return false;
        };
        if let Some(target) = message.session_id.as_ref()
            && target != owner
        {
            debug!(%target, %owner, "discarding message for another session");
            return false;
        }
        self.messages.push(message);
        true
    }

    pub fn set_typing(&mut self, typing: bool) {
        self.typing = typing;
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub fn clear_error(&mut self) {
        self.error = None;
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    /// Number of leading messages that came from the history seed.
    pub fn history_len(&self) -> usize {
        self.history_len
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn typing(&self) -> bool {
        self.typing
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Role;

    fn sid(id: &str) -> SessionId {
        SessionId::from(id)
    }

    fn user(text: &str, session: &str) -> Message {
        Message::new(text, Role::User, Some(sid(session)))
    }

    fn assistant(text: &str, session: &str) -> Message {
        Message::new(text, Role::Assistant, Some(sid(session)))
    }

    #[test]
    fn reset_clears_everything() {
        let mut store = ConversationStore::new();
        store.reset(Some(sid("s1")));
        store.begin_load();
        store.append(user("hi", "s1"));
        store.set_typing(true);
        store.set_error("boom");

        store.reset(Some(sid("s2")));
        assert_eq!(store.session_id(), Some(&sid("s2")));
        assert!(store.is_empty());
        assert!(!store.loading());
        assert!(!store.typing());
        assert_eq!(store.error(), None);
        assert!(!store.is_seeded());

        store.reset(None);
        assert_eq!(store.session_id(), None);
    }

    #[test]
    fn seed_applies_only_for_owner() {
        let mut store = ConversationStore::new();
        store.reset(Some(sid("s2")));
        store.begin_load();

        assert!(!store.seed(&sid("s1"), vec![user("old", "s1")]));
        assert!(store.is_empty());
        assert!(store.loading());

        assert!(store.seed(&sid("s2"), vec![user("hi", "s2")]));
        assert_eq!(store.messages(), &[user("hi", "s2")]);
        assert!(!store.loading());
    }

    #[test]
    fn seed_only_once_per_activation() {
        let mut store = ConversationStore::new();
        store.reset(Some(sid("s1")));
        assert!(store.seed(&sid("s1"), vec![user("a", "s1")]));
        assert!(!store.seed(&sid("s1"), vec![user("b", "s1"), user("c", "s1")]));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn late_seed_keeps_live_messages_after_history() {
        let mut store = ConversationStore::new();
        store.reset(Some(sid("s1")));
        store.begin_load();
        store.append(assistant("pushed", "s1"));

        assert!(store.seed(&sid("s1"), vec![user("hi", "s1"), assistant("hello", "s1")]));
        let texts: Vec<&str> = store.messages().iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["hi", "hello", "pushed"]);
        assert_eq!(store.history_len(), 2);

        store.reset(Some(sid("s1")));
        assert_eq!(store.history_len(), 0);
    }

    #[test]
    fn fail_load_keeps_list_and_records_error() {
        let mut store = ConversationStore::new();
        store.reset(Some(sid("s1")));
        store.begin_load();
        store.append(user("run it", "s1"));
        store.fail_load("backend unavailable");

        assert!(!store.loading());
        assert_eq!(store.error(), Some("backend unavailable"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn append_rejects_foreign_and_ownerless() {
        let mut store = ConversationStore::new();
        assert!(!store.append(user("hi", "s1")));

        store.reset(Some(sid("s1")));
        assert!(!store.append(user("hi", "s2")));
        assert!(store.append(user("hi", "s1")));
        assert!(store.append(Message::new("untagged", Role::Assistant, None)));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn append_never_merges() {
        let mut store = ConversationStore::new();
        store.reset(Some(sid("s1")));
        store.append(user("run it", "s1"));
        store.append(user("run it", "s1"));
        store.append(assistant("run it", "s1"));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn error_and_typing_flags() {
        let mut store = ConversationStore::new();
        store.reset(Some(sid("s1")));
        store.set_typing(true);
        assert!(store.typing());
        store.set_error("x");
        assert_eq!(store.error(), Some("x"));
        store.clear_error();
        assert_eq!(store.error(), None);
    }
}
