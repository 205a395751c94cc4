//! Session endpoints of the primary backend.

use std::sync::Arc;

use serde_json::json;

use crate::error::ApiError;
use crate::models::UserProfile;
use crate::services::api::ApiClient;

#[derive(Clone)]
pub struct AuthService {
    api: Arc<ApiClient>,
}

impl AuthService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    /// Ask the backend to email a one-time code.
    pub async fn request_otp(&self, email: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .api
            .post("/auth/request-otp", &json!({ "email": email }))
            .await?;
        Ok(())
    }

    /// Exchange the emailed code for a session (set via cookies).
    pub async fn verify_otp(&self, email: &str, otp: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .api
            .post("/auth/verify-otp", &json!({ "email": email, "otp": otp }))
            .await?;
        Ok(())
    }

    /// OAuth login with a Google identity credential.
    pub async fn google_login(&self, credential: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self
            .api
            .post("/auth/google", &json!({ "credential": credential }))
            .await?;
        Ok(())
    }

    pub async fn logout(&self) -> Result<(), ApiError> {
        let _: serde_json::Value = self.api.post_empty("/auth/logout").await?;
        Ok(())
    }

    /// The session check: who is the cookie session for?
    pub async fn current_user(&self) -> Result<UserProfile, ApiError> {
        self.api.get("/profile/me").await
    }
}
