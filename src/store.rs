//! Transcript persistence collaborator.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::events::Event;

/// Append-only transcript storage keyed by conversation id.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn append(&self, conversation_id: &str, event: Event) -> Result<()>;

    /// Events of a conversation in append order. Unknown ids yield an empty list.
    async fn history(&self, conversation_id: &str) -> Result<Vec<Event>>;
}

/// Unbounded store for tests and demos. Nothing is ever evicted, so a
/// long-running server should plug in a real backend instead.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    conversations: RwLock<HashMap<String, Vec<Event>>>,
}

impl InMemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn append(&self, conversation_id: &str, event: Event) -> Result<()> {
        self.conversations
            .write()
            .entry(conversation_id.to_string())
            .or_default()
            .push(event);
        Ok(())
    }

    async fn history(&self, conversation_id: &str) -> Result<Vec<Event>> {
        Ok(self
            .conversations
            .read()
            .get(conversation_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ConversationRole;

    #[tokio::test]
    async fn history_is_ordered_per_conversation() {
        let store = InMemoryConversationStore::new();
        let first = Event::transcript_finished("hello", ConversationRole::User);
        let second = Event::transcript_finished("hi, how can I help?", ConversationRole::Assistant);
        store.append("call-1", first.clone()).await.unwrap();
        store.append("call-2", Event::transcript_finished("other", ConversationRole::User)).await.unwrap();
        store.append("call-1", second.clone()).await.unwrap();

        assert_eq!(store.history("call-1").await.unwrap(), vec![first, second]);
        assert_eq!(store.history("call-2").await.unwrap().len(), 1);
        assert!(store.history("missing").await.unwrap().is_empty());
    }
}
