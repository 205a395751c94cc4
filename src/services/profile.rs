//! Profile and follow endpoints of the primary backend.

use std::sync::Arc;

use serde_json::json;

use crate::error::ApiError;
use crate::models::{FollowStatus, ProfileUpdate, UploadTicket, UserProfile, UserSummary};
use crate::services::api::ApiClient;

#[derive(Clone)]
pub struct ProfileService {
    api: Arc<ApiClient>,
}

impl ProfileService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub async fn my_profile(&self) -> Result<UserProfile, ApiError> {
        self.api.get("/profile/me").await
    }

    pub async fn user_profile(&self, user_id: &str) -> Result<UserProfile, ApiError> {
        self.api.get(&format!("/users/{}/profile", user_id)).await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), ApiError> {
        let _: serde_json::Value = self.api.patch("/profile/update", update).await?;
        Ok(())
    }

    pub async fn follow(&self, user_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .api
            .post_empty(&format!("/users/{}/follow", user_id))
            .await?;
        Ok(())
    }

    pub async fn unfollow(&self, user_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .api
            .delete(&format!("/users/{}/follow", user_id))
            .await?;
        Ok(())
    }

    pub async fn follow_status(&self, user_id: &str) -> Result<FollowStatus, ApiError> {
        self.api
            .get(&format!("/users/{}/follow-status", user_id))
            .await
    }

    pub async fn followers(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UserSummary>, ApiError> {
        self.api
            .get(&format!(
                "/users/{}/followers?limit={}&offset={}",
                user_id, limit, offset
            ))
            .await
    }

    pub async fn following(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UserSummary>, ApiError> {
        self.api
            .get(&format!(
                "/users/{}/following?limit={}&offset={}",
                user_id, limit, offset
            ))
            .await
    }

    /// Presigned avatar upload target.
    pub async fn avatar_upload_url(&self, content_type: &str) -> Result<UploadTicket, ApiError> {
        self.api
            .post("/profile/upload-url", &json!({ "content_type": content_type }))
            .await
    }

    /// Point the profile at a finished avatar upload.
    pub async fn commit_avatar(&self, object_key: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .api
            .patch("/profile/commit", &json!({ "object_key": object_key }))
            .await?;
        Ok(())
    }
}
