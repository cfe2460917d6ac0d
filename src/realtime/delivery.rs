use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

use super::{RealtimeHub, RealtimeUpdate, SubscriptionHandle};
use crate::backend::Message;

/// A message lifecycle event scoped to one conversation. `Inserted` fires
/// for newly appended messages, `Updated` for read-state transitions.
#[derive(Debug, Clone)]
pub enum MessageEvent {
    Inserted(Message),
    Updated(Message),
}

impl MessageEvent {
    pub fn conversation_id(&self) -> Uuid {
        self.message().conversation_id
    }

    pub fn message(&self) -> &Message {
        match self {
            MessageEvent::Inserted(message) | MessageEvent::Updated(message) => message,
        }
    }
}

/// Spawn the forwarding task for a delivery subscription.
///
/// Events for one conversation arrive in commit order. If the receiver lags
/// or the topic drops, a `Gap` update is emitted and the task re-subscribes
/// with exponential backoff; missed messages are not backfilled here, the
/// session reloads instead.
pub(super) async fn spawn(
    hub: RealtimeHub,
    conversation_id: Uuid,
    generation: u64,
    updates: mpsc::UnboundedSender<RealtimeUpdate>,
    backoff: Duration,
    max_backoff: Duration,
) -> SubscriptionHandle {
    let cancelled = Arc::new(AtomicBool::new(false));
    let flag = cancelled.clone();

    let mut rx = hub.topic(conversation_id).await.subscribe();
    let task = tokio::spawn(async move {
        let mut delay = backoff;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    delay = backoff;
                    let update = match event {
                        MessageEvent::Inserted(message) => RealtimeUpdate::Inserted {
                            generation,
                            message,
                        },
                        MessageEvent::Updated(message) => RealtimeUpdate::Updated {
                            generation,
                            message,
                        },
                    };
                    if updates.send(update).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        %conversation_id,
                        skipped,
                        "delivery subscription lagged, requesting reload"
                    );
                    let _ = updates.send(RealtimeUpdate::Gap {
                        generation,
                        conversation_id,
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    if flag.load(Ordering::SeqCst) {
                        break;
                    }
                    tracing::warn!(%conversation_id, "delivery topic dropped, re-subscribing");
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_backoff);
                    rx = hub.topic(conversation_id).await.subscribe();
                    // Anything committed during the outage was missed.
                    let _ = updates.send(RealtimeUpdate::Gap {
                        generation,
                        conversation_id,
                    });
                }
            }
        }
    });

    SubscriptionHandle::new(cancelled, task)
}
