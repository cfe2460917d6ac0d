use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::backend::Message;

pub use delivery::MessageEvent;
pub use presence::{PresenceChannel, PresenceRecord, TypingUser};

mod delivery;
mod presence;

const TOPIC_CAPACITY: usize = 256;

/// An update forwarded from a realtime subscription into a session's event
/// queue. Each update carries the subscription generation it was produced
/// under; the session drops anything from a superseded generation.
#[derive(Debug, Clone)]
pub enum RealtimeUpdate {
    Inserted { generation: u64, message: Message },
    Updated { generation: u64, message: Message },
    /// The subscription fell behind or reconnected; committed messages may
    /// have been missed and the session must reload the full history.
    Gap { generation: u64, conversation_id: Uuid },
    /// The computed "typing now" set for the conversation changed.
    Typing {
        generation: u64,
        conversation_id: Uuid,
        users: Vec<TypingUser>,
    },
}

/// In-process pub/sub fan-out, keyed by conversation id. Many sessions may
/// subscribe to the same conversation without coordination.
#[derive(Clone)]
pub struct RealtimeHub {
    topics: Arc<Mutex<HashMap<Uuid, broadcast::Sender<MessageEvent>>>>,
    presence: PresenceChannel,
}

impl RealtimeHub {
    pub fn new(typing_expiry: Duration) -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            presence: PresenceChannel::new(typing_expiry),
        }
    }

    pub fn presence(&self) -> &PresenceChannel {
        &self.presence
    }

    /// Create-or-get the broadcast topic for a conversation. Senders are
    /// kept alive for the lifetime of the hub so a topic never closes under
    /// an active subscriber.
    pub(crate) async fn topic(&self, conversation_id: Uuid) -> broadcast::Sender<MessageEvent> {
        let mut topics = self.topics.lock().await;
        topics
            .entry(conversation_id)
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Broadcast a message lifecycle event to every subscriber of its
    /// conversation. A send error only means nobody is listening.
    pub async fn publish(&self, event: MessageEvent) {
        let topic = self.topic(event.conversation_id()).await;
        let _ = topic.send(event);
    }

    /// Subscribe to message events for one conversation. Events are
    /// forwarded to `updates` tagged with `generation`; delivery is
    /// at-least-once and consumers de-duplicate by message id.
    pub async fn subscribe_delivery(
        &self,
        conversation_id: Uuid,
        generation: u64,
        updates: mpsc::UnboundedSender<RealtimeUpdate>,
        backoff: Duration,
        max_backoff: Duration,
    ) -> SubscriptionHandle {
        delivery::spawn(
            self.clone(),
            conversation_id,
            generation,
            updates,
            backoff,
            max_backoff,
        )
        .await
    }
}

/// Handle to a spawned subscription task. Unsubscribing is idempotent and
/// safe while the underlying task is still mid-teardown; after it returns,
/// the session-side generation check keeps any straggler update from being
/// applied.
pub struct SubscriptionHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub(crate) fn new(cancelled: Arc<AtomicBool>, task: JoinHandle<()>) -> Self {
        Self {
            cancelled,
            task: Some(task),
        }
    }

    pub fn unsubscribe(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
