//! HTTP client for the chat microservice.
//!
//! Authenticates with a chat-scoped bearer token, distinct from the primary
//! session. There is no refresh protocol here: a 401 means the chat token is
//! gone and chat access must be re-provisioned.

use std::sync::{Arc, RwLock};

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use url::Url;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::transport::{HttpRequest, HttpTransport, ReqwestTransport};

pub struct ChatClient {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    token: RwLock<Option<String>>,
}

impl ChatClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::with_transport(config.chat_base_url.clone(), transport))
    }

    pub fn with_transport(base_url: Url, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            base_url,
            token: RwLock::new(None),
        }
    }

    /// Install the chat-scoped token obtained from provisioning.
    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(|p| p.into_inner()) = Some(token.into());
    }

    /// Drop the token (logout or eligibility loss).
    pub fn clear_token(&self) {
        *self.token.write().unwrap_or_else(|p| p.into_inner()) = None;
    }

    pub fn token(&self) -> Option<String> {
        self.token.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::Internal(format!("invalid chat path {}: {}", path, e)))?;
        let mut request = HttpRequest::new(method, url);
        request.body = body;
        if let Some(token) = self.token() {
            request = request.with_bearer(token);
        }

        let response = self.transport.execute(request).await?;
        if response.is_success() {
            Ok(response.body)
        } else {
            Err(ApiError::status(response.status, response.detail()))
        }
    }

    fn decode<T: DeserializeOwned>(value: Value) -> Result<T, ApiError> {
        serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string()))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        Self::decode(self.send(Method::GET, path, None).await?)
    }

    pub async fn post<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Internal(e.to_string()))?;
        Self::decode(self.send(Method::POST, path, Some(body)).await?)
    }

    pub async fn put<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Internal(e.to_string()))?;
        Self::decode(self.send(Method::PUT, path, Some(body)).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;
    use serde_json::json;

    #[tokio::test]
    async fn bearer_token_is_attached_once_set() {
        let transport = MockTransport::new();
        transport.push_json(200, json!({"users": [], "unseenMessages": {}}));
        let chat = ChatClient::with_transport(
            Url::parse("http://chat.test").unwrap(),
            transport.clone(),
        );
        chat.set_token("chat-jwt");

        let _: Value = chat.get("/api/messages/users").await.unwrap();
        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls[0].bearer.as_deref(), Some("chat-jwt"));
    }

    #[tokio::test]
    async fn chat_401_surfaces_without_refresh() {
        let transport = MockTransport::new();
        transport.push_json(401, json!({"detail": "bad token"}));
        let chat = ChatClient::with_transport(
            Url::parse("http://chat.test").unwrap(),
            transport.clone(),
        );

        let err = chat.send(Method::GET, "/api/messages/users", None).await;
        assert!(err.unwrap_err().is_unauthorized());
        assert_eq!(transport.call_count(), 1);
    }
}
