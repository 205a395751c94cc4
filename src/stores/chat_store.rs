//! Chat state: provisioning, conversations, message history, presence and
//! unread counters.
//!
//! Both HTTP fetches and pushed socket events funnel through this store's
//! mutation methods, so "fetched" and "pushed" data share one update path.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::dedup::{request_key, RequestDeduper};
use crate::error::StoreError;
use crate::models::{ChatMessage, ChatUser, Conversation};
use crate::notify::Notifier;
use crate::realtime::RealtimeEvent;
use crate::services::chat::ChatService;
use crate::services::chat_api::ChatClient;

#[derive(Clone, Debug, Default)]
pub struct ChatState {
    /// Our chat-service identity, present after provisioning.
    pub me: Option<ChatUser>,
    /// Whether the current identity may use the messaging subsystem.
    pub eligible: bool,
    /// Realtime connection status.
    pub connected: bool,
    pub conversations: Vec<Conversation>,
    /// Counterpart id of the open conversation, if any.
    pub active_conversation: Option<String>,
    /// Messages of the active conversation only, in server order.
    pub messages: Vec<ChatMessage>,
    pub online_users: Vec<String>,
    /// Unread counts keyed by counterpart id; absence means zero.
    pub unread: HashMap<String, u64>,
    pub last_error: Option<String>,
}

pub struct ChatStore {
    service: ChatService,
    client: Arc<ChatClient>,
    dedup: Arc<RequestDeduper>,
    notifier: Arc<Notifier>,
    state: RwLock<ChatState>,
}

impl ChatStore {
    pub fn new(
        service: ChatService,
        client: Arc<ChatClient>,
        dedup: Arc<RequestDeduper>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            service,
            client,
            dedup,
            notifier,
            state: RwLock::new(ChatState::default()),
        }
    }

    pub fn state(&self) -> ChatState {
        self.read().clone()
    }

    pub fn is_eligible(&self) -> bool {
        self.read().eligible
    }

    pub fn unread_count(&self, counterpart_id: &str) -> u64 {
        self.read().unread.get(counterpart_id).copied().unwrap_or(0)
    }

    /// The (user id, chat token) pair the realtime connection needs, present
    /// only when the identity is chat-eligible and provisioned.
    pub fn realtime_session(&self) -> Option<(String, String)> {
        let state = self.read();
        if !state.eligible {
            return None;
        }
        let user_id = state.me.as_ref()?.id.clone();
        let token = self.client.token()?;
        Some((user_id, token))
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ChatState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ChatState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Exchange the primary session for chat access. Deduplicated so rapid
    /// navigation into chat views provisions exactly once.
    pub async fn provision(&self) -> Result<(), StoreError> {
        let service = self.service.clone();
        let result = self
            .dedup
            .run(request_key("chat/sync", &()), move || async move {
                service.sync_user().await
            })
            .await;

        match result {
            Ok(provision) => {
                self.client.set_token(&provision.chat_token);
                let mut state = self.write();
                state.me = provision.user_data;
                state.eligible = provision.is_student;
                state.last_error = None;
                log::info!("Chat provisioned (eligible: {})", provision.is_student);
                Ok(())
            }
            Err(e) => {
                let mut state = self.write();
                state.eligible = false;
                state.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Load the conversation sidebar: users plus server-side unseen counts.
    pub async fn load_conversations(&self) -> Result<(), StoreError> {
        if self.client.token().is_none() {
            return Err(StoreError::precondition("chat is not provisioned"));
        }
        match self.service.users().await {
            Ok(response) => {
                let mut state = self.write();
                state.conversations = response
                    .users
                    .into_iter()
                    .map(|user| Conversation {
                        counterpart: user,
                        last_activity: None,
                    })
                    .collect();
                state.unread = response.unseen_messages;
                // The open conversation is read by definition.
                if let Some(active) = state.active_conversation.clone() {
                    state.unread.remove(&active);
                }
                Ok(())
            }
            Err(e) => {
                self.write().last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Select (or deselect) the active conversation. Clears the visible
    /// message list and zeroes the selected conversation's unread counter.
    pub fn set_active_conversation(&self, counterpart_id: Option<&str>) {
        let mut state = self.write();
        state.messages.clear();
        state.active_conversation = counterpart_id.map(str::to_string);
        if let Some(id) = counterpart_id {
            state.unread.remove(id);
        }
    }

    /// Activate a conversation and fetch its history. The fetch is
    /// deduplicated by counterpart id; marking messages seen on the server is
    /// best-effort and never fails the open.
    pub async fn open_conversation(&self, counterpart_id: &str) -> Result<(), StoreError> {
        self.set_active_conversation(Some(counterpart_id));

        let service = self.service.clone();
        let id = counterpart_id.to_string();
        let result = self
            .dedup
            .run(request_key("chat/messages", &counterpart_id), move || {
                async move { service.messages(&id).await }
            })
            .await;

        match result {
            Ok(response) => {
                {
                    let mut state = self.write();
                    // Discard if the user already navigated elsewhere.
                    if state.active_conversation.as_deref() != Some(counterpart_id) {
                        log::debug!("Dropping history for {}: no longer active", counterpart_id);
                        return Ok(());
                    }
                    state.messages = response.messages;
                }
                if let Err(e) = self.service.mark_seen(counterpart_id).await {
                    log::warn!("Failed to mark {} as seen: {}", counterpart_id, e);
                }
                Ok(())
            }
            Err(e) => {
                self.write().last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Find an existing conversation by counterpart, or materialize one on
    /// the chat service. Deduplicated by counterpart id so rapid navigation
    /// cannot create duplicates.
    pub async fn resolve_or_create_conversation(
        &self,
        counterpart_id: &str,
        full_name: Option<&str>,
        profile_pic: Option<&str>,
    ) -> Result<Conversation, StoreError> {
        if let Some(existing) = self
            .read()
            .conversations
            .iter()
            .find(|c| c.id() == counterpart_id)
        {
            return Ok(existing.clone());
        }

        let service = self.service.clone();
        let id = counterpart_id.to_string();
        let name = full_name.map(str::to_string);
        let pic = profile_pic.map(str::to_string);
        let user = self
            .dedup
            .run(request_key("chat/sync_target", &counterpart_id), move || {
                async move { service.sync_target_user(&id, name.as_deref(), pic.as_deref()).await }
            })
            .await
            .map_err(StoreError::from)?;

        let conversation = Conversation {
            counterpart: user,
            last_activity: None,
        };
        let mut state = self.write();
        if !state.conversations.iter().any(|c| c.id() == counterpart_id) {
            state.conversations.push(conversation.clone());
        }
        Ok(conversation)
    }

    /// Send a message to a counterpart. Either text or an image reference
    /// must be present; the acknowledged message is appended when the
    /// conversation is still active.
    pub async fn send_message(
        &self,
        counterpart_id: &str,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<ChatMessage, StoreError> {
        let text = text.map(str::trim).filter(|t| !t.is_empty());
        if text.is_none() && image.is_none() {
            return Err(StoreError::validation("message is empty"));
        }

        match self.service.send_message(counterpart_id, text, image).await {
            Ok(response) => {
                let message = response.new_message;
                let mut state = self.write();
                if state.active_conversation.as_deref() == Some(counterpart_id) {
                    state.messages.push(message.clone());
                }
                if let Some(conversation) = state
                    .conversations
                    .iter_mut()
                    .find(|c| c.id() == counterpart_id)
                {
                    conversation.last_activity = message.created_at;
                }
                Ok(message)
            }
            Err(e) => {
                self.notifier.error("Failed to send message");
                Err(e.into())
            }
        }
    }

    /// Single ingestion point for pushed realtime events.
    pub fn ingest_event(&self, event: RealtimeEvent) {
        match event {
            RealtimeEvent::Connected => {
                log::info!("Connected to chat server");
                self.write().connected = true;
            }
            RealtimeEvent::Disconnected => {
                log::info!("Disconnected from chat server");
                self.write().connected = false;
            }
            RealtimeEvent::OnlineUsers(users) => {
                self.write().online_users = users;
            }
            RealtimeEvent::NewMessage(message) => {
                self.ingest_incoming_message(*message);
            }
        }
    }

    /// Route one incoming message: append when it belongs to the active
    /// conversation, otherwise bump that conversation's unread counter by
    /// exactly one. Our own echoes never count as unread.
    pub fn ingest_incoming_message(&self, message: ChatMessage) {
        let mut state = self.write();
        let me = state
            .me
            .as_ref()
            .map(|user| user.id.clone())
            .unwrap_or_default();
        let conversation_id = message.counterpart(&me).to_string();
        let own_echo = message.sender_id == me;

        if let Some(conversation) = state
            .conversations
            .iter_mut()
            .find(|c| c.id() == conversation_id)
        {
            conversation.last_activity = message.created_at;
        }

        if state.active_conversation.as_deref() == Some(conversation_id.as_str()) {
            // Server timestamps arrive in order; append, never re-sort.
            state.messages.push(message);
        } else if !own_echo {
            *state.unread.entry(conversation_id).or_insert(0) += 1;
        }
    }

    /// Tear down all chat state and the chat token (logout or eligibility
    /// loss). The realtime connection is closed by its owner alongside this.
    pub fn reset(&self) {
        self.client.clear_token();
        *self.write() = ChatState::default();
        log::info!("Chat state reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::api::ApiClient;
    use crate::transport::testing::MockTransport;
    use serde_json::json;
    use url::Url;

    fn build(transport: Arc<MockTransport>) -> ChatStore {
        let api = Arc::new(ApiClient::with_transport(
            Url::parse("https://api.test").unwrap(),
            transport.clone(),
        ));
        let client = Arc::new(ChatClient::with_transport(
            Url::parse("http://chat.test").unwrap(),
            transport,
        ));
        ChatStore::new(
            ChatService::new(api, client.clone()),
            client,
            RequestDeduper::new(),
            Arc::new(Notifier::new()),
        )
    }

    fn message(id: &str, from: &str, to: &str, text: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            sender_id: from.into(),
            receiver_id: to.into(),
            text: Some(text.into()),
            image: None,
            seen: false,
            created_at: None,
        }
    }

    fn provisioned(store: &ChatStore, me: &str) {
        let mut state = store.state.write().unwrap();
        state.me = Some(ChatUser {
            id: me.into(),
            full_name: None,
            email: None,
            profile_pic: None,
        });
        state.eligible = true;
    }

    #[tokio::test]
    async fn provision_stores_token_and_eligibility() {
        let transport = MockTransport::new();
        transport.push_json(
            200,
            json!({
                "chatToken": "jwt",
                "userData": { "_id": "u1", "fullName": "Sam" },
                "isStudent": true
            }),
        );
        let store = build(transport);

        store.provision().await.unwrap();
        assert!(store.is_eligible());
        assert!(store.realtime_session().is_some());
    }

    #[tokio::test]
    async fn provision_failure_leaves_ineligible() {
        let transport = MockTransport::new();
        transport.push_json(403, json!({"detail": "not a student"}));
        let store = build(transport);

        assert!(store.provision().await.is_err());
        assert!(!store.is_eligible());
        assert!(store.realtime_session().is_none());
    }

    #[test]
    fn incoming_message_for_active_conversation_appends() {
        let transport = MockTransport::new();
        let store = build(transport);
        provisioned(&store, "me");
        store.set_active_conversation(Some("u2"));

        store.ingest_event(RealtimeEvent::NewMessage(Box::new(message(
            "m1", "u2", "me", "hi",
        ))));

        let state = store.state();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(store.unread_count("u2"), 0);
    }

    #[test]
    fn incoming_message_for_other_conversation_counts_unread() {
        let transport = MockTransport::new();
        let store = build(transport);
        provisioned(&store, "me");
        store.set_active_conversation(Some("u2"));

        store.ingest_incoming_message(message("m1", "u3", "me", "psst"));
        store.ingest_incoming_message(message("m2", "u3", "me", "hello?"));

        let state = store.state();
        assert!(state.messages.is_empty());
        assert_eq!(store.unread_count("u3"), 2);
    }

    #[test]
    fn own_echo_never_increments_unread() {
        let transport = MockTransport::new();
        let store = build(transport);
        provisioned(&store, "me");
        store.set_active_conversation(None);

        store.ingest_incoming_message(message("m1", "me", "u3", "sent elsewhere"));
        assert_eq!(store.unread_count("u3"), 0);
    }

    #[test]
    fn activating_a_conversation_resets_unread_and_clears_messages() {
        let transport = MockTransport::new();
        let store = build(transport);
        provisioned(&store, "me");

        store.set_active_conversation(Some("u2"));
        store.ingest_incoming_message(message("m1", "u2", "me", "one"));
        store.ingest_incoming_message(message("m2", "u3", "me", "two"));
        assert_eq!(store.unread_count("u3"), 1);

        store.set_active_conversation(Some("u3"));
        let state = store.state();
        assert!(state.messages.is_empty());
        assert_eq!(store.unread_count("u3"), 0);
    }

    #[tokio::test]
    async fn open_conversation_survives_failed_mark_seen() {
        let transport = MockTransport::new();
        transport.push_json(
            200,
            json!({"messages": [
                { "_id": "m1", "senderId": "u2", "receiverId": "me", "text": "hey" }
            ]}),
        );
        transport.push_json(500, json!({"detail": "mark failed"}));
        let store = build(transport);
        provisioned(&store, "me");
        store.client.set_token("jwt");

        store.open_conversation("u2").await.unwrap();
        let state = store.state();
        assert_eq!(state.messages.len(), 1);
        assert_eq!(state.active_conversation.as_deref(), Some("u2"));
    }

    #[tokio::test]
    async fn resolve_or_create_deduplicates_concurrent_creation() {
        let (transport, gate) = MockTransport::gated();
        transport.push_json(200, json!({ "_id": "u9", "fullName": "New" }));
        let store = Arc::new(build(transport.clone()));
        provisioned(&store, "me");

        let a = store.resolve_or_create_conversation("u9", Some("New"), None);
        let b = store.resolve_or_create_conversation("u9", Some("New"), None);
        gate.add_permits(2);
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a.unwrap().id(), "u9");
        assert_eq!(b.unwrap().id(), "u9");
        assert_eq!(transport.call_count(), 1);
        assert_eq!(store.state().conversations.len(), 1);
    }

    #[tokio::test]
    async fn empty_message_rejected_before_network() {
        let transport = MockTransport::new();
        let store = build(transport.clone());
        provisioned(&store, "me");

        let err = store.send_message("u2", Some("   "), None).await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn reset_drops_token_and_state() {
        let transport = MockTransport::new();
        let store = build(transport);
        provisioned(&store, "me");
        store.client.set_token("jwt");
        store.ingest_event(RealtimeEvent::Connected);

        store.reset();
        let state = store.state();
        assert!(!state.connected);
        assert!(state.me.is_none());
        assert!(store.client.token().is_none());
        assert!(store.realtime_session().is_none());
    }
}
