//! Wire models for the two backends.
//!
//! The primary REST backend speaks snake_case JSON; the chat microservice is
//! a Node service speaking camelCase with Mongo-style `_id` keys, so the chat
//! models carry explicit serde renames.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A document as it appears in feeds and the detail view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub owner: Option<UserSummary>,
    #[serde(default)]
    pub like_count: u64,
    #[serde(default)]
    pub is_liked: bool,
    #[serde(default)]
    pub is_bookmarked: bool,
    #[serde(default)]
    pub comment_count: u64,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Compact user representation used in lists (followers, following, owners).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub is_following: bool,
}

/// Full profile, returned by `/profile/me` and `/users/{id}/profile`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub profile_url: Option<String>,
    #[serde(default)]
    pub follower_count: u64,
    #[serde(default)]
    pub following_count: u64,
    #[serde(default)]
    pub is_following: bool,
}

/// Partial profile update sent to `/profile/update`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_url: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub document_id: String,
    #[serde(default)]
    pub user: Option<UserSummary>,
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Acknowledgement body for like/bookmark toggles.
/// `like_count` is the authoritative server count when present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngagementAck {
    #[serde(default)]
    pub is_liked: Option<bool>,
    #[serde(default)]
    pub is_bookmarked: Option<bool>,
    #[serde(default)]
    pub like_count: Option<u64>,
}

/// Presigned upload target returned by `/documents/upload-url`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UploadTicket {
    pub upload_url: String,
    pub object_key: String,
}

/// Whether the viewer currently follows a single user.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FollowStatus {
    pub is_following: bool,
}

// ---------------------------------------------------------------------------
// Chat microservice models (camelCase, Mongo `_id`)
// ---------------------------------------------------------------------------

/// Result of exchanging the primary session for chat access.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatProvision {
    pub chat_token: String,
    #[serde(default)]
    pub user_data: Option<ChatUser>,
    #[serde(default)]
    pub is_student: bool,
}

/// A user record as the chat service stores it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUser {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub profile_pic: Option<String>,
}

/// A single chat message. Either `text` or `image` is set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// The conversation a message belongs to is identified by the counterpart:
    /// whichever side of the exchange is not `me`.
    pub fn counterpart(&self, me: &str) -> &str {
        if self.sender_id == me {
            &self.receiver_id
        } else {
            &self.sender_id
        }
    }
}

/// Response of the chat user-list endpoint: sidebar users plus the unseen
/// message counts keyed by counterpart id.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatUsersResponse {
    #[serde(default)]
    pub users: Vec<ChatUser>,
    #[serde(default)]
    pub unseen_messages: HashMap<String, u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub new_message: ChatMessage,
}

/// A conversation entry in the sidebar: the counterpart plus last activity.
#[derive(Clone, Debug, PartialEq)]
pub struct Conversation {
    pub counterpart: ChatUser,
    pub last_activity: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn id(&self) -> &str {
        &self.counterpart.id
    }
}
