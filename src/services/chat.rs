//! Chat microservice endpoints.
//!
//! Provisioning (`sync_user`) goes through the primary API, which vouches for
//! the session and returns a chat-scoped bearer token; everything else talks
//! to the chat service directly with that token.

use std::sync::Arc;

use serde_json::json;

use crate::error::ApiError;
use crate::models::{
    ChatProvision, ChatUser, ChatUsersResponse, MessagesResponse, SendMessageResponse,
};
use crate::services::api::ApiClient;
use crate::services::chat_api::ChatClient;

#[derive(Clone)]
pub struct ChatService {
    api: Arc<ApiClient>,
    chat: Arc<ChatClient>,
}

impl ChatService {
    pub fn new(api: Arc<ApiClient>, chat: Arc<ChatClient>) -> Self {
        Self { api, chat }
    }

    /// Exchange the primary session for chat access. Only chat-eligible
    /// identities (students) get a token.
    pub async fn sync_user(&self) -> Result<ChatProvision, ApiError> {
        self.api.post_empty("/api/chat/sync").await
    }

    /// Materialize the counterpart on the chat service so a conversation can
    /// exist before they have ever logged into chat themselves.
    pub async fn sync_target_user(
        &self,
        user_id: &str,
        full_name: Option<&str>,
        profile_pic: Option<&str>,
    ) -> Result<ChatUser, ApiError> {
        self.chat
            .post(
                "/api/auth/sync",
                &json!({
                    "userId": user_id,
                    "fullName": full_name,
                    "profilePic": profile_pic,
                }),
            )
            .await
    }

    /// Sidebar users plus unseen counts.
    pub async fn users(&self) -> Result<ChatUsersResponse, ApiError> {
        self.chat.get("/api/messages/users").await
    }

    /// Full message history with one counterpart.
    pub async fn messages(&self, user_id: &str) -> Result<MessagesResponse, ApiError> {
        self.chat.get(&format!("/api/messages/{}", user_id)).await
    }

    pub async fn send_message(
        &self,
        user_id: &str,
        text: Option<&str>,
        image: Option<&str>,
    ) -> Result<SendMessageResponse, ApiError> {
        self.chat
            .post(
                &format!("/api/messages/send/{}", user_id),
                &json!({ "text": text, "image": image }),
            )
            .await
    }

    pub async fn mark_seen(&self, user_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .chat
            .put(&format!("/api/messages/mark/{}", user_id), &json!({}))
            .await?;
        Ok(())
    }
}
