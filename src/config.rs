use url::Url;

/// Default primary API base, matching the hosted deployment.
const DEFAULT_API_URL: &str = "https://edustore-api-1.onrender.com";

/// Default chat microservice base for local development.
const DEFAULT_CHAT_URL: &str = "http://localhost:3000";

/// Environment-provided configuration for the two backend services
/// and the OAuth client identifier.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the primary REST backend.
    pub api_base_url: Url,
    /// Base URL of the chat microservice (REST + WebSocket).
    pub chat_base_url: Url,
    /// Google OAuth client id, if OAuth login is enabled for this deployment.
    pub google_client_id: Option<String>,
}

impl ClientConfig {
    pub fn new(api_base_url: Url, chat_base_url: Url) -> Self {
        Self {
            api_base_url,
            chat_base_url,
            google_client_id: None,
        }
    }

    /// Read configuration from `EDUSTORE_API_URL`, `EDUSTORE_CHAT_URL` and
    /// `EDUSTORE_GOOGLE_CLIENT_ID`, falling back to the defaults above.
    pub fn from_env() -> Self {
        let api = std::env::var("EDUSTORE_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());
        let chat =
            std::env::var("EDUSTORE_CHAT_URL").unwrap_or_else(|_| DEFAULT_CHAT_URL.to_string());

        let api_base_url = Url::parse(&api).unwrap_or_else(|e| {
            log::warn!("Invalid EDUSTORE_API_URL ({}), using default", e);
            Url::parse(DEFAULT_API_URL).unwrap()
        });
        let chat_base_url = Url::parse(&chat).unwrap_or_else(|e| {
            log::warn!("Invalid EDUSTORE_CHAT_URL ({}), using default", e);
            Url::parse(DEFAULT_CHAT_URL).unwrap()
        });

        Self {
            api_base_url,
            chat_base_url,
            google_client_id: std::env::var("EDUSTORE_GOOGLE_CLIENT_ID").ok(),
        }
    }

    pub fn with_google_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.google_client_id = Some(client_id.into());
        self
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
