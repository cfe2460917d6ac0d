use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, Mutex};
use uuid::Uuid;

use super::{RealtimeUpdate, SubscriptionHandle};

const SYNC_CAPACITY: usize = 64;

/// One participant's typing state in one conversation. Ephemeral: held only
/// in the presence channel's shared state, never persisted, and excluded
/// from the typing view once stale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub user_id: Uuid,
    pub display_name: String,
    pub typing: bool,
    pub last_typed_at: DateTime<Utc>,
}

/// A peer currently counted as typing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingUser {
    pub user_id: Uuid,
    pub display_name: String,
}

/// Ephemeral per-conversation "who is typing" broadcast.
///
/// This is a best-effort heuristic: a crashed client never sends an explicit
/// stop, so records simply age out of the typing view after the expiry
/// window. Nothing here survives a restart and nothing needs to.
#[derive(Clone)]
pub struct PresenceChannel {
    state: Arc<Mutex<HashMap<Uuid, HashMap<Uuid, PresenceRecord>>>>,
    sync: Arc<Mutex<HashMap<Uuid, broadcast::Sender<()>>>>,
    expiry: Duration,
}

impl PresenceChannel {
    pub fn new(expiry: StdDuration) -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
            sync: Arc::new(Mutex::new(HashMap::new())),
            expiry: Duration::from_std(expiry).unwrap_or_else(|_| Duration::seconds(5)),
        }
    }

    /// Publish the caller's typing state with a fresh timestamp. Passing
    /// `typing = false` is the explicit stop signal.
    pub async fn track(
        &self,
        conversation_id: Uuid,
        user_id: Uuid,
        display_name: &str,
        typing: bool,
    ) {
        let now = Utc::now();
        {
            let mut state = self.state.lock().await;
            let records = state.entry(conversation_id).or_default();
            records.insert(
                user_id,
                PresenceRecord {
                    user_id,
                    display_name: display_name.to_string(),
                    typing,
                    last_typed_at: now,
                },
            );
            // Long-dead records are garbage-collected on the next track.
            let cutoff = now - self.expiry * 10;
            records.retain(|_, record| record.last_typed_at > cutoff);
        }
        self.notify(conversation_id).await;
    }

    /// Remove the caller's record entirely, as on channel teardown.
    pub async fn untrack(&self, conversation_id: Uuid, user_id: Uuid) {
        let removed = {
            let mut state = self.state.lock().await;
            state
                .get_mut(&conversation_id)
                .map_or(false, |records| records.remove(&user_id).is_some())
        };
        if removed {
            self.notify(conversation_id).await;
        }
    }

    /// The set of peers typing right now, excluding `viewer_id`. A record
    /// counts only while `typing` is set and it is younger than the expiry
    /// window.
    pub async fn typists(&self, conversation_id: Uuid, viewer_id: Uuid) -> Vec<TypingUser> {
        let now = Utc::now();
        let state = self.state.lock().await;
        let mut users: Vec<TypingUser> = state
            .get(&conversation_id)
            .map(|records| {
                records
                    .values()
                    .filter(|record| {
                        record.user_id != viewer_id
                            && record.typing
                            && now - record.last_typed_at < self.expiry
                    })
                    .map(|record| TypingUser {
                        user_id: record.user_id,
                        display_name: record.display_name.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        users.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        users
    }

    /// Subscribe to typing-set changes for a conversation. Each sync
    /// recomputes the set (excluding `viewer_id`) and forwards it tagged
    /// with `generation`.
    pub async fn subscribe_typists(
        &self,
        conversation_id: Uuid,
        viewer_id: Uuid,
        generation: u64,
        updates: mpsc::UnboundedSender<RealtimeUpdate>,
    ) -> SubscriptionHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let channel = self.clone();

        let mut rx = self.sync_topic(conversation_id).await.subscribe();
        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        if flag.load(Ordering::SeqCst) {
                            break;
                        }
                        let users = channel.typists(conversation_id, viewer_id).await;
                        let update = RealtimeUpdate::Typing {
                            generation,
                            conversation_id,
                            users,
                        };
                        if updates.send(update).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        if flag.load(Ordering::SeqCst) {
                            break;
                        }
                        tracing::warn!(%conversation_id, "presence topic dropped, re-subscribing");
                        rx = channel.sync_topic(conversation_id).await.subscribe();
                    }
                }
            }
        });

        SubscriptionHandle::new(cancelled, task)
    }

    async fn sync_topic(&self, conversation_id: Uuid) -> broadcast::Sender<()> {
        let mut sync = self.sync.lock().await;
        sync.entry(conversation_id)
            .or_insert_with(|| broadcast::channel(SYNC_CAPACITY).0)
            .clone()
    }

    async fn notify(&self, conversation_id: Uuid) {
        let topic = self.sync_topic(conversation_id).await;
        let _ = topic.send(());
    }
}
