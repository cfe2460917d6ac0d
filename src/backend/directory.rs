use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Conversation, Message, MessageStore, Profile, ProfileDirectory};
use crate::error::ChatError;

/// A conversation annotated for list rendering: last message for the
/// preview line and the viewer's unread count.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation: Conversation,
    pub last_message: Option<Message>,
    pub unread_count: usize,
}

impl ConversationSummary {
    pub fn preview(&self) -> Option<&str> {
        self.last_message.as_ref().map(|m| m.content.as_str())
    }
}

/// Result of a conversation-list read. A failed read yields an empty list
/// with the error marker set, so the caller can render a retry affordance
/// instead of unwinding.
#[derive(Debug, Clone, Default)]
pub struct ConversationListing {
    pub conversations: Vec<ConversationSummary>,
    pub profiles: HashMap<Uuid, Profile>,
    pub error: Option<ChatError>,
}

/// Resolves the single conversation between two users and lists a user's
/// conversations by recency.
#[derive(Clone)]
pub struct ConversationDirectory {
    inner: Arc<Mutex<DirectoryInner>>,
    store: MessageStore,
    profiles: ProfileDirectory,
}

#[derive(Default)]
struct DirectoryInner {
    by_pair: HashMap<(Uuid, Uuid), Uuid>,
    by_id: HashMap<Uuid, Conversation>,
}

/// Conversations are unique per unordered pair, so both orderings map to
/// one key.
fn pair_key(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

impl ConversationDirectory {
    pub fn new(store: MessageStore, profiles: ProfileDirectory) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DirectoryInner::default())),
            store,
            profiles,
        }
    }

    /// Look up the conversation for a pair of users, creating it lazily on
    /// first contact. The normalized pair key is resolved under one lock,
    /// so simultaneous calls from both participants cannot create two rows.
    pub async fn find_or_create(
        &self,
        user_a: Uuid,
        user_b: Uuid,
    ) -> Result<Conversation, ChatError> {
        if user_a == user_b {
            return Err(ChatError::Validation(
                "a conversation needs two distinct participants".into(),
            ));
        }

        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.by_pair.get(&pair_key(user_a, user_b)) {
            if let Some(existing) = inner.by_id.get(id) {
                return Ok(existing.clone());
            }
        }

        let conversation = Conversation {
            id: Uuid::new_v4(),
            participant_a: user_a,
            participant_b: user_b,
            created_at: Utc::now(),
        };
        inner
            .by_pair
            .insert(pair_key(user_a, user_b), conversation.id);
        inner.by_id.insert(conversation.id, conversation.clone());
        tracing::info!(conversation_id = %conversation.id, "conversation created");
        Ok(conversation)
    }

    /// All conversations involving `user_id`, newest activity first, with
    /// previews, unread counts and a single batched profile read for every
    /// distinct counterpart. Profile failures degrade to placeholders; a
    /// message-store failure empties the list and sets the error marker.
    pub async fn list_for_user(&self, user_id: Uuid) -> ConversationListing {
        let conversations: Vec<Conversation> = {
            let inner = self.inner.lock().await;
            inner
                .by_id
                .values()
                .filter(|c| c.involves(user_id))
                .cloned()
                .collect()
        };

        let mut summaries = Vec::with_capacity(conversations.len());
        for conversation in conversations {
            let messages = match self.store.list_messages(conversation.id).await {
                Ok(messages) => messages,
                Err(err) => {
                    tracing::warn!(error = %err, "conversation list read failed");
                    return ConversationListing {
                        error: Some(err),
                        ..Default::default()
                    };
                }
            };
            let unread_count = messages
                .iter()
                .filter(|m| m.sender_id != user_id && !m.is_read)
                .count();
            summaries.push(ConversationSummary {
                last_message: messages.last().cloned(),
                unread_count,
                conversation,
            });
        }

        // Most recent message first; conversations with no messages last.
        summaries.sort_by(|x, y| {
            let xk = x.last_message.as_ref().map(Message::order_key);
            let yk = y.last_message.as_ref().map(Message::order_key);
            yk.cmp(&xk)
                .then_with(|| y.conversation.created_at.cmp(&x.conversation.created_at))
        });

        let counterparts: Vec<Uuid> = summaries
            .iter()
            .map(|s| s.conversation.other_participant(user_id))
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();

        let profiles = match self.profiles.batch_get(&counterparts).await {
            Ok(profiles) => profiles,
            Err(err) => {
                // Entries render with placeholder names rather than
                // blocking the whole list.
                tracing::warn!(error = %err, "profile batch lookup failed");
                HashMap::new()
            }
        };

        ConversationListing {
            conversations: summaries,
            profiles,
            error: None,
        }
    }
}
