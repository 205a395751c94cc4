//! Composition root: builds the HTTP clients, wires the stores together and
//! drives the cross-store lifecycle (session restore, the unauthorized
//! broadcast, the realtime connection).

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::dedup::RequestDeduper;
use crate::error::{ApiError, StoreError};
use crate::notify::Notifier;
use crate::realtime::RealtimeConnection;
use crate::services::api::ApiClient;
use crate::services::auth::AuthService;
use crate::services::chat::ChatService;
use crate::services::chat_api::ChatClient;
use crate::services::documents::DocumentService;
use crate::services::profile::ProfileService;
use crate::services::search::SearchService;
use crate::stores::auth_store::AuthStore;
use crate::stores::chat_store::ChatStore;
use crate::stores::documents::DocumentsStore;
use crate::stores::profile_store::ProfileStore;

/// One fully wired client. Everything hangs off this; embedders hold it in
/// an `Arc` and hand the stores to whatever drives their UI.
pub struct EdustoreClient {
    pub config: ClientConfig,
    pub api: Arc<ApiClient>,
    pub chat_client: Arc<ChatClient>,
    pub notifier: Arc<Notifier>,
    pub auth: Arc<AuthStore>,
    pub documents: Arc<DocumentsStore>,
    pub profiles: Arc<ProfileStore>,
    pub chat: Arc<ChatStore>,
    pub realtime: Arc<RealtimeConnection>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EdustoreClient {
    pub fn new(config: ClientConfig) -> Result<Self, ApiError> {
        let api = Arc::new(ApiClient::new(&config)?);
        let chat_client = Arc::new(ChatClient::new(&config)?);
        let dedup = RequestDeduper::new();
        let notifier = Arc::new(Notifier::new());

        let chat = Arc::new(ChatStore::new(
            ChatService::new(api.clone(), chat_client.clone()),
            chat_client.clone(),
            dedup.clone(),
            notifier.clone(),
        ));
        let auth = Arc::new(
            AuthStore::new(AuthService::new(api.clone()), notifier.clone())
                .with_chat(chat.clone()),
        );
        let documents = Arc::new(DocumentsStore::new(
            DocumentService::new(api.clone()),
            SearchService::new(api.clone()),
            dedup.clone(),
            notifier.clone(),
        ));
        let profiles = Arc::new(
            ProfileStore::new(
                ProfileService::new(api.clone()),
                SearchService::new(api.clone()),
                dedup,
                notifier.clone(),
            )
            .with_session(auth.clone()),
        );
        let realtime = Arc::new(RealtimeConnection::new(
            config.chat_base_url.clone(),
            chat.clone(),
        ));

        Ok(Self {
            config,
            api,
            chat_client,
            notifier,
            auth,
            documents,
            profiles,
            chat,
            realtime,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Restore the session and bring the background machinery up. Safe to
    /// call once at startup from within a tokio runtime.
    pub async fn start(&self) {
        let mut tasks = vec![self.auth.spawn_unauthorized_listener(&self.api)];

        // A dropped session also tears down the realtime connection.
        let mut events = self.api.subscribe_auth_events();
        let realtime = self.realtime.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(_) => realtime.disconnect(),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        // The connection follows the session: an in-app login that provisions
        // chat brings the socket up, a logout or forced drop takes it down.
        let mut session_events = self.auth.subscribe_session_events();
        let realtime = self.realtime.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match session_events.recv().await {
                    Ok(_) => realtime.sync_with_session(),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
        self.tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .extend(tasks);

        self.auth.initialize().await;

        // Chat access is a best-effort side effect of having a session.
        if self.auth.state().is_authenticated {
            if let Err(e) = self.chat.provision().await {
                log::info!("Chat not available for this session: {}", e);
            }
        }
        self.realtime.sync_with_session();
    }

    /// End the session everywhere: realtime first so nothing is pushed into
    /// stores that are about to be cleared.
    pub async fn logout(&self) -> Result<(), StoreError> {
        self.realtime.disconnect();
        let result = self.auth.logout().await;
        self.documents.reset();
        self.profiles.reset();
        result
    }

    /// Stop background tasks and close the realtime connection.
    pub fn shutdown(&self) {
        self.realtime.disconnect();
        for task in self
            .tasks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .drain(..)
        {
            task.abort();
        }
    }
}

impl Drop for EdustoreClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
