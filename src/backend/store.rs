use std::collections::HashMap;
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::Message;
use crate::error::ChatError;
use crate::realtime::{MessageEvent, RealtimeHub};

/// Durable message log, one append-only sequence per conversation.
///
/// The store is the source of truth: it assigns message ids, timestamps and
/// the insertion sequence, and echoes every commit over the delivery
/// channel. History is unpaginated; full-history loads are acceptable at
/// this scale but are a known scaling gap.
#[derive(Clone)]
pub struct MessageStore {
    inner: Arc<RwLock<StoreInner>>,
    hub: RealtimeHub,
    #[cfg(test)]
    faults: Arc<Faults>,
}

#[derive(Default)]
struct StoreInner {
    logs: HashMap<Uuid, Vec<Message>>,
    next_seq: u64,
}

/// One-shot fault hooks used by tests to exercise rollback paths.
#[cfg(test)]
#[derive(Default)]
struct Faults {
    fail_next_append: AtomicBool,
    fail_next_list: AtomicBool,
}

impl MessageStore {
    pub fn new(hub: RealtimeHub) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StoreInner::default())),
            hub,
            #[cfg(test)]
            faults: Arc::new(Faults::default()),
        }
    }

    /// Append a message. Content must be non-empty after trimming; the
    /// persisted record gets a store-assigned id, timestamp and sequence
    /// and is broadcast to delivery subscribers.
    pub async fn append(
        &self,
        conversation_id: Uuid,
        sender_id: Uuid,
        content: &str,
    ) -> Result<Message, ChatError> {
        if content.trim().is_empty() {
            return Err(ChatError::Validation("message content is empty".into()));
        }
        #[cfg(test)]
        if self.faults.fail_next_append.swap(false, Ordering::SeqCst) {
            return Err(ChatError::Store("append failed".into()));
        }

        let message = {
            let mut inner = self.inner.write().await;
            inner.next_seq += 1;
            let message = Message {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id,
                content: content.to_string(),
                created_at: Utc::now(),
                is_read: false,
                seq: inner.next_seq,
            };
            inner
                .logs
                .entry(conversation_id)
                .or_default()
                .push(message.clone());
            message
        };

        tracing::debug!(message_id = %message.id, %conversation_id, "message appended");
        self.hub.publish(MessageEvent::Inserted(message.clone())).await;
        Ok(message)
    }

    /// Full history for a conversation, oldest first.
    pub async fn list_messages(&self, conversation_id: Uuid) -> Result<Vec<Message>, ChatError> {
        #[cfg(test)]
        if self.faults.fail_next_list.swap(false, Ordering::SeqCst) {
            return Err(ChatError::Store("list failed".into()));
        }

        let inner = self.inner.read().await;
        let mut messages = inner
            .logs
            .get(&conversation_id)
            .cloned()
            .unwrap_or_default();
        messages.sort_by_key(Message::order_key);
        Ok(messages)
    }

    /// Mark every message not sent by `reader_id` as read. Idempotent; only
    /// actual transitions are broadcast as updates.
    pub async fn mark_read(
        &self,
        conversation_id: Uuid,
        reader_id: Uuid,
    ) -> Result<(), ChatError> {
        let transitions: Vec<Message> = {
            let mut inner = self.inner.write().await;
            let Some(log) = inner.logs.get_mut(&conversation_id) else {
                return Ok(());
            };
            log.iter_mut()
                .filter(|message| message.sender_id != reader_id && !message.is_read)
                .map(|message| {
                    message.is_read = true;
                    message.clone()
                })
                .collect()
        };

        for message in transitions {
            self.hub.publish(MessageEvent::Updated(message)).await;
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn fail_next_append(&self) {
        self.faults.fail_next_append.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn fail_next_list(&self) {
        self.faults.fail_next_list.store(true, Ordering::SeqCst);
    }
}
