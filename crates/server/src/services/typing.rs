// Ephemeral "user is typing" presence for direct chats

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::async_trait;
use chrono::Utc;
use serde::Serialize;
use tokio::{sync::RwLock, time::Instant};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TypingStatus {
    pub user_id: String,
    /// Unix milliseconds of the last typing notification.
    pub timestamp: i64,
}

/// Presence store keyed by `chat_id:user_id`. Entries only count as active
/// within the liveness window; an external TTL cache can implement this to
/// share presence across server instances.
#[async_trait]
pub trait TypingStore: Send + Sync {
    async fn set_typing(&self, chat_id: &str, user_id: &str);

    /// Active typists in a chat, excluding `viewer_id`.
    async fn typing_users(&self, chat_id: &str, viewer_id: &str) -> Vec<TypingStatus>;
}

#[derive(Debug, Clone)]
struct TypingEntry {
    status: TypingStatus,
    set_at: Instant,
}

/// Process-local store. Not shared between server processes.
#[derive(Clone)]
pub struct InMemoryTypingStore {
    entries: Arc<RwLock<HashMap<String, TypingEntry>>>,
    ttl: Duration,
}

impl InMemoryTypingStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
        }
    }

    fn key(chat_id: &str, user_id: &str) -> String {
        format!("{chat_id}:{user_id}")
    }
}

#[async_trait]
impl TypingStore for InMemoryTypingStore {
    async fn set_typing(&self, chat_id: &str, user_id: &str) {
        let key = Self::key(chat_id, user_id);
        let set_at = Instant::now();

        self.entries.write().await.insert(
            key.clone(),
            TypingEntry {
                status: TypingStatus {
                    user_id: user_id.to_string(),
                    timestamp: Utc::now().timestamp_millis(),
                },
                set_at,
            },
        );

        // Expire this notification unless it was refreshed in the meantime
        let entries = Arc::clone(&self.entries);
        let ttl = self.ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            let mut entries = entries.write().await;
            if entries.get(&key).is_some_and(|e| e.set_at == set_at) {
                entries.remove(&key);
            }
        });
    }

    async fn typing_users(&self, chat_id: &str, viewer_id: &str) -> Vec<TypingStatus> {
        let prefix = format!("{chat_id}:");
        let entries = self.entries.read().await;

        entries
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, entry)| entry.status.user_id != viewer_id)
            .filter(|(_, entry)| entry.set_at.elapsed() < self.ttl)
            .map(|(_, entry)| entry.status.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn viewer_does_not_see_own_typing() {
        let store = InMemoryTypingStore::new(Duration::from_secs(3));
        store.set_typing("chat-1", "alice").await;
        store.set_typing("chat-1", "bob").await;
        store.set_typing("chat-2", "carol").await;

        let seen_by_alice = store.typing_users("chat-1", "alice").await;
        assert_eq!(seen_by_alice.len(), 1);
        assert_eq!(seen_by_alice[0].user_id, "bob");
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let store = InMemoryTypingStore::new(Duration::from_millis(50));
        store.set_typing("chat-1", "bob").await;
        assert_eq!(store.typing_users("chat-1", "alice").await.len(), 1);

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(store.typing_users("chat-1", "alice").await.is_empty());
        assert!(store.entries.read().await.is_empty());
    }

    #[tokio::test]
    async fn refresh_keeps_entry_alive() {
        let store = InMemoryTypingStore::new(Duration::from_millis(100));
        store.set_typing("chat-1", "bob").await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        store.set_typing("chat-1", "bob").await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        // The first timer fired, but the refreshed entry must survive it
        assert_eq!(store.typing_users("chat-1", "alice").await.len(), 1);
    }
}
