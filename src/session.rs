use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::{Backend, ConversationSummary, Message, Profile};
use crate::config::Config;
use crate::error::ChatError;
use crate::identity::AuthHandle;
use crate::realtime::{RealtimeUpdate, SubscriptionHandle, TypingUser};

/// View state for the conversation list.
#[derive(Debug, Clone, Default)]
pub struct ConversationListState {
    pub conversations: Vec<ConversationSummary>,
    pub profiles: HashMap<Uuid, Profile>,
    pub loading: bool,
    pub error: Option<ChatError>,
}

/// A message as the open conversation renders it. `pending` marks an
/// optimistic entry that has not been confirmed by the store yet.
#[derive(Debug, Clone)]
pub struct CachedMessage {
    pub message: Message,
    pub pending: bool,
}

struct ActiveConversation {
    conversation_id: Uuid,
    generation: u64,
    messages: Vec<CachedMessage>,
    loading: bool,
    error: Option<ChatError>,
    compose: String,
    /// Store-assigned id -> optimistic temp id, for sends awaiting their
    /// delivery-channel echo.
    in_flight: HashMap<Uuid, Uuid>,
    typing_users: Vec<TypingUser>,
    needs_reload: bool,
    delivery: SubscriptionHandle,
    presence: SubscriptionHandle,
    typing_active: bool,
    last_typing_broadcast: Option<Instant>,
}

/// Per-user messaging view model: local conversation list, local message
/// cache for the open conversation, the optimistic send pipeline and the
/// typing indicator.
///
/// The session owns its caches exclusively and reconciles them against
/// authoritative broadcasts in `on_tick`. Every realtime update carries a
/// subscription generation; updates from a superseded subscription are
/// dropped, which is what makes unsubscribing synchronous from the
/// caller's perspective.
pub struct ClientSession {
    backend: Backend,
    auth: AuthHandle,
    typing_throttle: Duration,
    reconnect_backoff: Duration,
    max_reconnect_backoff: Duration,
    updates_tx: mpsc::UnboundedSender<RealtimeUpdate>,
    updates_rx: mpsc::UnboundedReceiver<RealtimeUpdate>,
    list: ConversationListState,
    active: Option<ActiveConversation>,
    generation: u64,
    last_error: Option<ChatError>,
}

impl ClientSession {
    pub fn new(backend: Backend, auth: AuthHandle, config: &Config) -> Self {
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        Self {
            backend,
            auth,
            typing_throttle: config.typing_throttle(),
            reconnect_backoff: config.reconnect_backoff(),
            max_reconnect_backoff: config.max_reconnect_backoff(),
            updates_tx,
            updates_rx,
            list: ConversationListState::default(),
            active: None,
            generation: 0,
            last_error: None,
        }
    }

    /// Reload the conversation list (with previews, unread counts and
    /// counterpart profiles). Errors land in the list state, never unwind.
    pub async fn refresh_conversations(&mut self) {
        let Some(user) = self.auth.current_user() else {
            self.list = ConversationListState {
                error: Some(ChatError::NotAuthenticated),
                ..Default::default()
            };
            return;
        };

        self.list.loading = true;
        let listing = self.backend.directory().list_for_user(user.user_id).await;
        self.list = ConversationListState {
            conversations: listing.conversations,
            profiles: listing.profiles,
            loading: false,
            error: listing.error,
        };
    }

    /// Switch to a conversation: tear down the previous subscriptions,
    /// clear the cache, subscribe fresh and load history. Opening also
    /// marks the counterpart's messages as read.
    pub async fn open_conversation(&mut self, conversation_id: Uuid) -> Result<(), ChatError> {
        let user = self.auth.current_user().ok_or(ChatError::NotAuthenticated)?;

        self.close_conversation().await;
        self.generation += 1;
        let generation = self.generation;

        let delivery = self
            .backend
            .realtime()
            .subscribe_delivery(
                conversation_id,
                generation,
                self.updates_tx.clone(),
                self.reconnect_backoff,
                self.max_reconnect_backoff,
            )
            .await;
        let presence = self
            .backend
            .presence()
            .subscribe_typists(conversation_id, user.user_id, generation, self.updates_tx.clone())
            .await;

        self.active = Some(ActiveConversation {
            conversation_id,
            generation,
            messages: Vec::new(),
            loading: true,
            error: None,
            compose: String::new(),
            in_flight: HashMap::new(),
            typing_users: Vec::new(),
            needs_reload: false,
            delivery,
            presence,
            typing_active: false,
            last_typing_broadcast: None,
        });

        let result = self.backend.store().list_messages(conversation_id).await;
        self.finish_load(conversation_id, generation, result);

        if let Err(err) = self
            .backend
            .store()
            .mark_read(conversation_id, user.user_id)
            .await
        {
            tracing::warn!(error = %err, "mark-read on open failed");
            self.last_error = Some(err);
        }
        Ok(())
    }

    /// Tear down the open conversation, if any. Safe to call repeatedly.
    pub async fn close_conversation(&mut self) {
        if let Some(mut active) = self.active.take() {
            active.delivery.unsubscribe();
            active.presence.unsubscribe();
            if let Some(user) = self.auth.current_user() {
                self.backend
                    .presence()
                    .untrack(active.conversation_id, user.user_id)
                    .await;
            }
        }
    }

    /// Send the composed text. The optimistic entry appears immediately
    /// and is removed either by its delivery-channel echo or by the send
    /// failing, in which case the composed text is restored so nothing the
    /// user typed is lost.
    pub async fn send_current(&mut self) -> Result<(), ChatError> {
        let user = self.auth.current_user().ok_or(ChatError::NotAuthenticated)?;
        let (conversation_id, content, temp_id) = {
            let active = self
                .active
                .as_mut()
                .ok_or_else(|| ChatError::Validation("no open conversation".into()))?;
            if active.compose.trim().is_empty() {
                return Err(ChatError::Validation("message content is empty".into()));
            }

            let content = std::mem::take(&mut active.compose);
            let temp_id = Uuid::new_v4();
            let optimistic = Message {
                id: temp_id,
                conversation_id: active.conversation_id,
                sender_id: user.user_id,
                content: content.clone(),
                created_at: Utc::now(),
                is_read: false,
                // Sorts after everything the store has assigned so far.
                seq: u64::MAX,
            };
            insert_or_replace(
                &mut active.messages,
                CachedMessage {
                    message: optimistic,
                    pending: true,
                },
            );
            (active.conversation_id, content, temp_id)
        };

        self.stop_typing().await;

        match self
            .backend
            .store()
            .append(conversation_id, user.user_id, &content)
            .await
        {
            Ok(message) => {
                if let Some(active) = self.active.as_mut() {
                    if active.conversation_id == conversation_id {
                        // The optimistic entry stays visible until the
                        // authoritative copy echoes back.
                        active.in_flight.insert(message.id, temp_id);
                    }
                }
                Ok(())
            }
            Err(err) => {
                if let Some(active) = self.active.as_mut() {
                    if active.conversation_id == conversation_id {
                        active.messages.retain(|m| m.message.id != temp_id);
                        active.compose = content;
                    }
                }
                self.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Broadcast a typing heartbeat, throttled while composing.
    pub async fn notify_typing(&mut self) -> Result<(), ChatError> {
        let user = self.auth.current_user().ok_or(ChatError::NotAuthenticated)?;
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        let now = Instant::now();
        if active.typing_active
            && active
                .last_typing_broadcast
                .map_or(false, |at| now.duration_since(at) < self.typing_throttle)
        {
            return Ok(());
        }
        active.typing_active = true;
        active.last_typing_broadcast = Some(now);
        let conversation_id = active.conversation_id;

        self.backend
            .presence()
            .track(conversation_id, user.user_id, &user.display_name, true)
            .await;
        Ok(())
    }

    /// Explicitly signal that composing stopped.
    pub async fn stop_typing(&mut self) {
        let Some(user) = self.auth.current_user() else {
            return;
        };
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if !active.typing_active {
            return;
        }
        active.typing_active = false;
        let conversation_id = active.conversation_id;

        self.backend
            .presence()
            .track(conversation_id, user.user_id, &user.display_name, false)
            .await;
    }

    /// Drain queued realtime updates and reconcile them into local state.
    /// Runs on the UI tick; nothing here blocks.
    pub async fn on_tick(&mut self) {
        while let Ok(update) = self.updates_rx.try_recv() {
            self.apply_update(update);
        }

        let reload = self.active.as_mut().and_then(|active| {
            if active.needs_reload {
                active.needs_reload = false;
                Some((active.conversation_id, active.generation))
            } else {
                None
            }
        });
        if let Some((conversation_id, generation)) = reload {
            tracing::info!(%conversation_id, "reloading history after delivery gap");
            let result = self.backend.store().list_messages(conversation_id).await;
            self.finish_load(conversation_id, generation, result);
        }

        // Re-derive the typing set every tick so stale records age out
        // even when no further presence broadcast arrives.
        if let (Some(user), Some(conversation_id)) = (
            self.auth.current_user(),
            self.active.as_ref().map(|a| a.conversation_id),
        ) {
            let users = self
                .backend
                .presence()
                .typists(conversation_id, user.user_id)
                .await;
            if let Some(active) = self.active.as_mut() {
                active.typing_users = users;
            }
        }
    }

    fn apply_update(&mut self, update: RealtimeUpdate) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        match update {
            RealtimeUpdate::Inserted {
                generation,
                message,
            } => {
                if generation != active.generation
                    || message.conversation_id != active.conversation_id
                {
                    return;
                }
                if let Some(temp_id) = active.in_flight.remove(&message.id) {
                    active.messages.retain(|m| m.message.id != temp_id);
                }
                insert_or_replace(
                    &mut active.messages,
                    CachedMessage {
                        message,
                        pending: false,
                    },
                );
            }
            RealtimeUpdate::Updated {
                generation,
                message,
            } => {
                if generation != active.generation
                    || message.conversation_id != active.conversation_id
                {
                    return;
                }
                if let Some(existing) = active
                    .messages
                    .iter_mut()
                    .find(|m| m.message.id == message.id)
                {
                    existing.message = message;
                    existing.pending = false;
                }
            }
            RealtimeUpdate::Gap {
                generation,
                conversation_id,
            } => {
                if generation == active.generation && conversation_id == active.conversation_id {
                    active.needs_reload = true;
                }
            }
            RealtimeUpdate::Typing {
                generation,
                conversation_id,
                users,
            } => {
                if generation == active.generation && conversation_id == active.conversation_id {
                    active.typing_users = users;
                }
            }
        }
    }

    fn finish_load(
        &mut self,
        conversation_id: Uuid,
        generation: u64,
        result: Result<Vec<Message>, ChatError>,
    ) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        if active.conversation_id != conversation_id || active.generation != generation {
            // A load that resolved after the user already switched away.
            tracing::debug!(%conversation_id, "discarding stale message load");
            return;
        }

        match result {
            Ok(messages) => {
                active.messages = messages
                    .into_iter()
                    .map(|message| CachedMessage {
                        message,
                        pending: false,
                    })
                    .collect();
                active.in_flight.clear();
                active.loading = false;
                active.error = None;
            }
            Err(err) => {
                active.loading = false;
                active.error = Some(err);
            }
        }
    }

    pub fn conversation_list(&self) -> &ConversationListState {
        &self.list
    }

    pub fn current_conversation(&self) -> Option<Uuid> {
        self.active.as_ref().map(|a| a.conversation_id)
    }

    pub fn messages(&self) -> &[CachedMessage] {
        self.active.as_ref().map_or(&[], |a| a.messages.as_slice())
    }

    pub fn is_loading(&self) -> bool {
        self.active.as_ref().map_or(false, |a| a.loading)
    }

    pub fn message_error(&self) -> Option<&ChatError> {
        self.active.as_ref().and_then(|a| a.error.as_ref())
    }

    pub fn typing_users(&self) -> &[TypingUser] {
        self.active
            .as_ref()
            .map_or(&[], |a| a.typing_users.as_slice())
    }

    pub fn compose(&self) -> &str {
        self.active.as_ref().map_or("", |a| a.compose.as_str())
    }

    pub fn set_compose(&mut self, text: impl Into<String>) {
        if let Some(active) = self.active.as_mut() {
            active.compose = text.into();
        }
    }

    pub fn last_error(&self) -> Option<&ChatError> {
        self.last_error.as_ref()
    }

    pub fn dismiss_error(&mut self) {
        self.last_error = None;
    }
}

/// Insert a message into the ordered cache, replacing any entry with the
/// same id (replayed deliveries must not duplicate).
fn insert_or_replace(messages: &mut Vec<CachedMessage>, incoming: CachedMessage) {
    if let Some(existing) = messages
        .iter_mut()
        .find(|m| m.message.id == incoming.message.id)
    {
        *existing = incoming;
        return;
    }

    let key = incoming.message.order_key();
    if messages
        .last()
        .map_or(true, |last| last.message.order_key() <= key)
    {
        // Fast path: arrivals are almost always already in order.
        messages.push(incoming);
    } else {
        let pos = messages
            .binary_search_by(|existing| existing.message.order_key().cmp(&key))
            .unwrap_or_else(|pos| pos);
        messages.insert(pos, incoming);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{auth_channel, Identity};

    const SETTLE: Duration = Duration::from_millis(50);

    fn test_config() -> Config {
        Config {
            typing_expiry_ms: 120,
            typing_throttle_ms: 10,
            reconnect_backoff_ms: 10,
            max_reconnect_backoff_ms: 50,
            ..Default::default()
        }
    }

    async fn session_for(backend: &Backend, identity: &Identity) -> ClientSession {
        backend
            .profiles()
            .upsert(Profile {
                user_id: identity.user_id,
                first_name: Some(identity.display_name.clone()),
                last_name: None,
                avatar_url: None,
            })
            .await;
        let (_controller, auth) = auth_channel(Some(identity.clone()));
        ClientSession::new(backend.clone(), auth, &test_config())
    }

    async fn setup() -> (Backend, ClientSession, ClientSession, Identity, Identity) {
        let backend = Backend::new(&test_config());
        let alice = Identity::named(Uuid::new_v4(), "Alice");
        let bob = Identity::named(Uuid::new_v4(), "Bob");
        let alice_session = session_for(&backend, &alice).await;
        let bob_session = session_for(&backend, &bob).await;
        (backend, alice_session, bob_session, alice, bob)
    }

    #[tokio::test]
    async fn test_first_message_creates_unread_preview_for_peer() {
        let (backend, mut alice_session, mut bob_session, alice, bob) = setup().await;

        let conversation = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        alice_session
            .open_conversation(conversation.id)
            .await
            .unwrap();
        alice_session.set_compose("hello");
        alice_session.send_current().await.unwrap();

        // Same pair, either ordering: still the one conversation.
        let again = backend
            .directory()
            .find_or_create(bob.user_id, alice.user_id)
            .await
            .unwrap();
        assert_eq!(again.id, conversation.id);

        bob_session.refresh_conversations().await;
        let list = bob_session.conversation_list();
        assert!(list.error.is_none());
        assert_eq!(list.conversations.len(), 1);
        assert_eq!(list.conversations[0].preview(), Some("hello"));
        assert_eq!(list.conversations[0].unread_count, 1);
        assert_eq!(
            list.conversations[0].last_message.as_ref().map(|m| m.sender_id),
            Some(alice.user_id)
        );
        assert!(list.profiles.contains_key(&alice.user_id));
    }

    #[tokio::test]
    async fn test_optimistic_send_confirmed_by_echo() {
        let (backend, mut alice_session, _bob_session, alice, bob) = setup().await;
        let conversation = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        alice_session
            .open_conversation(conversation.id)
            .await
            .unwrap();

        alice_session.set_compose("hi there");
        alice_session.send_current().await.unwrap();

        // Optimistic entry is visible right away and the compose box is
        // cleared.
        assert_eq!(alice_session.messages().len(), 1);
        assert!(alice_session.messages()[0].pending);
        assert_eq!(alice_session.compose(), "");

        tokio::time::sleep(SETTLE).await;
        alice_session.on_tick().await;

        let messages = alice_session.messages();
        assert_eq!(messages.len(), 1);
        assert!(!messages[0].pending);
        assert_eq!(messages[0].message.content, "hi there");
    }

    #[tokio::test]
    async fn test_duplicate_delivery_keeps_single_cache_entry() {
        let (backend, mut alice_session, _bob, alice, bob) = setup().await;
        let conversation = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        alice_session
            .open_conversation(conversation.id)
            .await
            .unwrap();

        let message = backend
            .store()
            .append(conversation.id, bob.user_id, "only once")
            .await
            .unwrap();
        // Replay the insert, as a reconnect would.
        backend
            .realtime()
            .publish(crate::realtime::MessageEvent::Inserted(message))
            .await;

        tokio::time::sleep(SETTLE).await;
        alice_session.on_tick().await;
        assert_eq!(alice_session.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_send_restores_cache_and_compose() {
        let (backend, mut alice_session, _bob, alice, bob) = setup().await;
        let conversation = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        backend
            .store()
            .append(conversation.id, bob.user_id, "earlier")
            .await
            .unwrap();
        alice_session
            .open_conversation(conversation.id)
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;
        alice_session.on_tick().await;

        let before: Vec<Uuid> = alice_session.messages().iter().map(|m| m.message.id).collect();

        alice_session.set_compose("doomed");
        backend.store().fail_next_append();
        let err = alice_session.send_current().await.unwrap_err();
        assert!(matches!(err, ChatError::Store(_)));

        let after: Vec<Uuid> = alice_session.messages().iter().map(|m| m.message.id).collect();
        assert_eq!(before, after);
        assert_eq!(alice_session.compose(), "doomed");
        assert!(alice_session.last_error().is_some());
        alice_session.dismiss_error();
        assert!(alice_session.last_error().is_none());
    }

    #[tokio::test]
    async fn test_empty_content_rejected_before_any_store_call() {
        let (backend, mut alice_session, _bob, alice, bob) = setup().await;
        let conversation = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        alice_session
            .open_conversation(conversation.id)
            .await
            .unwrap();

        alice_session.set_compose("   \n");
        let err = alice_session.send_current().await.unwrap_err();
        assert!(matches!(err, ChatError::Validation(_)));
        assert!(alice_session.messages().is_empty());
        assert_eq!(alice_session.compose(), "   \n");
    }

    #[tokio::test]
    async fn test_signed_out_user_cannot_send_or_open() {
        let backend = Backend::new(&test_config());
        let (_controller, auth) = auth_channel(None);
        let mut session = ClientSession::new(backend, auth, &test_config());

        assert_eq!(
            session.open_conversation(Uuid::new_v4()).await,
            Err(ChatError::NotAuthenticated)
        );
        assert_eq!(session.send_current().await, Err(ChatError::NotAuthenticated));
    }

    #[tokio::test]
    async fn test_stale_load_resolution_is_discarded() {
        let (backend, mut alice_session, _bob, alice, bob) = setup().await;
        let carol = Uuid::new_v4();
        let first = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        let second = backend
            .directory()
            .find_or_create(alice.user_id, carol)
            .await
            .unwrap();

        alice_session.open_conversation(first.id).await.unwrap();
        let stale_generation = alice_session.generation;

        alice_session.open_conversation(second.id).await.unwrap();

        // A load for the first conversation resolving late must not clobber
        // the cache of the now-open one.
        let straggler = Message {
            id: Uuid::new_v4(),
            conversation_id: first.id,
            sender_id: bob.user_id,
            content: "late".into(),
            created_at: Utc::now(),
            is_read: false,
            seq: 1,
        };
        alice_session.finish_load(first.id, stale_generation, Ok(vec![straggler]));

        assert_eq!(alice_session.current_conversation(), Some(second.id));
        assert!(alice_session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_switch_unsubscribes_previous_conversation() {
        let (backend, mut alice_session, _bob, alice, bob) = setup().await;
        let carol = Uuid::new_v4();
        let first = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        let second = backend
            .directory()
            .find_or_create(alice.user_id, carol)
            .await
            .unwrap();

        alice_session.open_conversation(first.id).await.unwrap();
        alice_session.open_conversation(second.id).await.unwrap();

        backend
            .store()
            .append(first.id, bob.user_id, "to the old room")
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;
        alice_session.on_tick().await;

        assert!(alice_session.messages().is_empty());
    }

    #[tokio::test]
    async fn test_typing_indicator_appears_and_expires() {
        let (backend, mut alice_session, mut bob_session, alice, bob) = setup().await;
        let conversation = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        alice_session
            .open_conversation(conversation.id)
            .await
            .unwrap();
        bob_session
            .open_conversation(conversation.id)
            .await
            .unwrap();

        alice_session.notify_typing().await.unwrap();
        tokio::time::sleep(SETTLE).await;
        bob_session.on_tick().await;

        let typing = bob_session.typing_users();
        assert_eq!(typing.len(), 1);
        assert_eq!(typing[0].display_name, "Alice");
        // The typist never sees themselves.
        alice_session.on_tick().await;
        assert!(alice_session.typing_users().is_empty());

        // No rebroadcast and no explicit stop: the record ages out.
        tokio::time::sleep(Duration::from_millis(150)).await;
        bob_session.on_tick().await;
        assert!(bob_session.typing_users().is_empty());
    }

    #[tokio::test]
    async fn test_send_stops_typing_indicator() {
        let (backend, mut alice_session, mut bob_session, alice, bob) = setup().await;
        let conversation = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        alice_session
            .open_conversation(conversation.id)
            .await
            .unwrap();
        bob_session
            .open_conversation(conversation.id)
            .await
            .unwrap();

        alice_session.notify_typing().await.unwrap();
        alice_session.set_compose("done typing");
        alice_session.send_current().await.unwrap();

        tokio::time::sleep(SETTLE).await;
        bob_session.on_tick().await;
        assert!(bob_session.typing_users().is_empty());
    }

    #[tokio::test]
    async fn test_read_state_propagates_to_sender() {
        let (backend, mut alice_session, mut bob_session, alice, bob) = setup().await;
        let conversation = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        alice_session
            .open_conversation(conversation.id)
            .await
            .unwrap();
        alice_session.set_compose("read me");
        alice_session.send_current().await.unwrap();
        tokio::time::sleep(SETTLE).await;
        alice_session.on_tick().await;
        assert!(!alice_session.messages()[0].message.is_read);

        // Bob opening the conversation marks it read.
        bob_session
            .open_conversation(conversation.id)
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;
        alice_session.on_tick().await;

        assert!(alice_session.messages()[0].message.is_read);
    }

    #[tokio::test]
    async fn test_gap_triggers_full_history_reload() {
        let (backend, mut alice_session, _bob, alice, bob) = setup().await;
        let conversation = backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();
        alice_session
            .open_conversation(conversation.id)
            .await
            .unwrap();

        backend
            .store()
            .append(conversation.id, bob.user_id, "missed during outage")
            .await
            .unwrap();
        tokio::time::sleep(SETTLE).await;
        alice_session.on_tick().await;

        // Simulate the state a dropped subscription leaves behind.
        alice_session.active.as_mut().unwrap().messages.clear();
        alice_session
            .updates_tx
            .send(RealtimeUpdate::Gap {
                generation: alice_session.generation,
                conversation_id: conversation.id,
            })
            .unwrap();

        alice_session.on_tick().await;
        assert_eq!(alice_session.messages().len(), 1);
        assert_eq!(
            alice_session.messages()[0].message.content,
            "missed during outage"
        );
    }

    #[tokio::test]
    async fn test_list_read_failure_sets_error_marker() {
        let (backend, mut alice_session, _bob, alice, bob) = setup().await;
        backend
            .directory()
            .find_or_create(alice.user_id, bob.user_id)
            .await
            .unwrap();

        backend.store().fail_next_list();
        alice_session.refresh_conversations().await;

        let list = alice_session.conversation_list();
        assert!(list.conversations.is_empty());
        assert!(matches!(list.error, Some(ChatError::Store(_))));
        assert!(!list.loading);
    }

    #[test]
    fn test_insert_or_replace_out_of_order_arrival() {
        let conversation_id = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let base = Utc::now();
        let make = |seq: u64, offset_ms: i64| CachedMessage {
            message: Message {
                id: Uuid::new_v4(),
                conversation_id,
                sender_id: sender,
                content: format!("m{}", seq),
                created_at: base + chrono::Duration::milliseconds(offset_ms),
                is_read: false,
                seq,
            },
            pending: false,
        };

        let mut cache = Vec::new();
        insert_or_replace(&mut cache, make(1, 0));
        insert_or_replace(&mut cache, make(3, 20));
        insert_or_replace(&mut cache, make(2, 10));

        let seqs: Vec<u64> = cache.iter().map(|m| m.message.seq).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
    }
}
