//! Primary backend HTTP client with the silent refresh-and-retry protocol.
//!
//! Every call carries the session implicitly through the transport's cookie
//! store. On a 401 the client performs exactly one refresh attempt and one
//! retry of the original request; a 401 on the retried request is terminal.
//! When the refresh itself fails, a global [`AuthSignal::Unauthorized`] is
//! broadcast so the session store can force the app back to anonymous.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use url::Url;

use crate::config::ClientConfig;
use crate::error::ApiError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};

const REFRESH_PATH: &str = "/auth/refresh";

/// Global authentication signals raised by the client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthSignal {
    /// The session could not be refreshed; the app must drop to anonymous.
    Unauthorized,
}

pub struct ApiClient {
    transport: Arc<dyn HttpTransport>,
    base_url: Url,
    auth_events: broadcast::Sender<AuthSignal>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let transport = Arc::new(ReqwestTransport::new()?);
        Ok(Self::with_transport(config.api_base_url.clone(), transport))
    }

    pub fn with_transport(base_url: Url, transport: Arc<dyn HttpTransport>) -> Self {
        let (auth_events, _) = broadcast::channel(8);
        Self {
            transport,
            base_url,
            auth_events,
        }
    }

    /// Subscribe to global auth signals (the "unauthorized" event).
    pub fn subscribe_auth_events(&self) -> broadcast::Receiver<AuthSignal> {
        self.auth_events.subscribe()
    }

    fn request(&self, method: Method, path: &str, body: Option<Value>) -> Result<HttpRequest, ApiError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| ApiError::Internal(format!("invalid request path {}: {}", path, e)))?;
        let mut request = HttpRequest::new(method, url);
        request.body = body;
        Ok(request)
    }

    /// Issue a request, running the refresh-and-retry protocol on a 401.
    pub async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, ApiError> {
        let request = self.request(method, path, body)?;
        let response = self.transport.execute(request.clone()).await?;

        if response.status != 401 || path == REFRESH_PATH {
            return Self::into_result(response);
        }

        // First 401 for this request: one silent refresh, then one retry.
        let original_error = ApiError::status(401, response.detail());
        log::info!("Got 401 for {}, attempting token refresh", path);

        let refresh = self.request(Method::POST, REFRESH_PATH, None)?;
        match self.transport.execute(refresh).await {
            Ok(refreshed) if refreshed.is_success() => {
                log::info!("Token refresh succeeded, retrying {}", path);
                // A second 401 here is surfaced as-is: no further refresh.
                let retried = self.transport.execute(request).await?;
                Self::into_result(retried)
            }
            Ok(_) | Err(_) => {
                log::warn!("Token refresh failed, raising unauthorized signal");
                let _ = self.auth_events.send(AuthSignal::Unauthorized);
                Err(original_error)
            }
        }
    }

    fn into_result(response: HttpResponse) -> Result<Value, ApiError> {
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

    /// POST with an empty body (toggle-style endpoints).
    pub async fn post_empty<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        Self::decode(self.send(Method::POST, path, None).await?)
    }

    pub async fn patch<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &impl Serialize,
    ) -> Result<T, ApiError> {
        let body = serde_json::to_value(body).map_err(|e| ApiError::Internal(e.to_string()))?;
        Self::decode(self.send(Method::PATCH, path, Some(body)).await?)
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        Self::decode(self.send(Method::DELETE, path, None).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;
    use serde_json::json;

    fn client(transport: Arc<MockTransport>) -> ApiClient {
        ApiClient::with_transport(Url::parse("https://api.test").unwrap(), transport)
    }

    #[tokio::test]
    async fn successful_request_passes_through() {
        let transport = MockTransport::new();
        transport.push_json(200, json!({"id": "d1", "title": "Notes"}));
        let api = client(transport.clone());

        let value = api.send(Method::GET, "/feed/d1", None).await.unwrap();
        assert_eq!(value["title"], "Notes");
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn refresh_then_retry_on_401() {
        let transport = MockTransport::new();
        transport.push_json(401, json!({"detail": "expired"}));
        transport.push_json(200, json!({})); // refresh
        transport.push_json(200, json!({"user_id": "u1"})); // retried original
        let api = client(transport.clone());

        let value = api.send(Method::GET, "/profile/me", None).await.unwrap();
        assert_eq!(value["user_id"], "u1");
        assert_eq!(
            transport.paths(),
            vec!["/profile/me", "/auth/refresh", "/profile/me"]
        );
    }

    #[tokio::test]
    async fn second_401_after_retry_is_terminal() {
        let transport = MockTransport::new();
        transport.push_json(401, json!({"detail": "expired"}));
        transport.push_json(200, json!({})); // refresh succeeds
        transport.push_json(401, json!({"detail": "still expired"}));
        let api = client(transport.clone());

        let err = api.send(Method::GET, "/profile/me", None).await.unwrap_err();
        assert!(err.is_unauthorized());
        // No second refresh attempt.
        assert_eq!(
            transport.paths(),
            vec!["/profile/me", "/auth/refresh", "/profile/me"]
        );
    }

    #[tokio::test]
    async fn failed_refresh_broadcasts_unauthorized_once() {
        let transport = MockTransport::new();
        transport.push_json(401, json!({"detail": "expired"}));
        transport.push_json(401, json!({"detail": "no refresh token"}));
        let api = client(transport.clone());
        let mut events = api.subscribe_auth_events();

        let err = api.send(Method::GET, "/profile/me", None).await.unwrap_err();
        assert_eq!(err, ApiError::status(401, "expired"));

        assert_eq!(events.try_recv().unwrap(), AuthSignal::Unauthorized);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_auth_errors_surface_detail() {
        let transport = MockTransport::new();
        transport.push_json(422, json!({"detail": "title too long"}));
        let api = client(transport.clone());

        let err = api.send(Method::POST, "/documents/commit", Some(json!({}))).await;
        assert_eq!(err.unwrap_err(), ApiError::status(422, "title too long"));
        assert_eq!(transport.call_count(), 1);
    }
}
