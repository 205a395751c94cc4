//! Session lifecycle: initialization, OTP login, OAuth login, logout and the
//! forced transition to anonymous when the refresh protocol gives up.

use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::models::{ProfileUpdate, UserProfile};
use crate::notify::Notifier;
use crate::services::api::ApiClient;
use crate::services::auth::AuthService;
use crate::stores::chat_store::ChatStore;

/// Derived lifecycle phase of the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Uninitialized,
    Checking,
    Authenticated,
    Anonymous,
}

/// Broadcast to components that follow the session, such as the realtime
/// chat connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The identity changed: login, logout, or a forced drop to anonymous.
    /// Emitted only after any chat provisioning side effect has settled, so
    /// listeners observe the final shape of the new session.
    Changed,
}

#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    /// True once the first session check has resolved, success or failure.
    pub is_initialized: bool,
    pub loading: bool,
    pub error: Option<String>,
    /// Email an OTP was requested for, pending verification.
    pub pending_otp_email: Option<String>,
}

pub struct AuthStore {
    service: AuthService,
    notifier: Arc<Notifier>,
    /// Chat provisioning is a best-effort side effect of login.
    chat: Option<Arc<ChatStore>>,
    session_events: broadcast::Sender<SessionEvent>,
    state: RwLock<SessionState>,
}

fn is_valid_email(email: &str) -> bool {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.')
        }
        None => false,
    }
}

fn is_valid_otp(code: &str) -> bool {
    code.len() == 6 && code.chars().all(|c| c.is_ascii_digit())
}

impl AuthStore {
    pub fn new(service: AuthService, notifier: Arc<Notifier>) -> Self {
        let (session_events, _) = broadcast::channel(8);
        Self {
            service,
            notifier,
            chat: None,
            session_events,
            state: RwLock::new(SessionState::default()),
        }
    }

    /// Wire the chat store so successful logins can provision chat access.
    pub fn with_chat(mut self, chat: Arc<ChatStore>) -> Self {
        self.chat = Some(chat);
        self
    }

    pub fn state(&self) -> SessionState {
        self.read().clone()
    }

    /// Subscribe to session lifecycle changes.
    pub fn subscribe_session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_events.subscribe()
    }

    fn notify_session_changed(&self) {
        let _ = self.session_events.send(SessionEvent::Changed);
    }

    pub fn phase(&self) -> SessionPhase {
        let state = self.read();
        if !state.is_initialized {
            if state.loading {
                SessionPhase::Checking
            } else {
                SessionPhase::Uninitialized
            }
        } else if state.is_authenticated {
            SessionPhase::Authenticated
        } else {
            SessionPhase::Anonymous
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    /// Startup session check. Issued exactly once: later calls are no-ops.
    /// Resolves to initialized whether the check succeeds or fails, so the
    /// app can never hang in a perpetual loading state.
    pub async fn initialize(&self) {
        {
            let mut state = self.write();
            if state.is_initialized || state.loading {
                return;
            }
            state.loading = true;
        }

        match self.service.current_user().await {
            Ok(user) => {
                log::info!("Session restored for {}", user.user_id);
                {
                    let mut state = self.write();
                    state.user = Some(user);
                    state.is_authenticated = true;
                    state.is_initialized = true;
                    state.loading = false;
                }
                self.notify_session_changed();
            }
            Err(e) => {
                log::info!("No active session: {}", e);
                let mut state = self.write();
                state.user = None;
                state.is_authenticated = false;
                state.is_initialized = true;
                state.loading = false;
            }
        }
    }

    /// Ask for a one-time code. The email is validated before any network
    /// call; on success the store remembers which email is pending.
    pub async fn request_otp(&self, email: &str) -> Result<(), StoreError> {
        let email = email.trim();
        if !is_valid_email(email) {
            return Err(StoreError::validation("enter a valid email address"));
        }

        {
            let mut state = self.write();
            state.loading = true;
            state.error = None;
        }

        match self.service.request_otp(email).await {
            Ok(()) => {
                let mut state = self.write();
                state.loading = false;
                state.pending_otp_email = Some(email.to_string());
                Ok(())
            }
            Err(e) => {
                let mut state = self.write();
                state.loading = false;
                state.error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Verify the emailed code and establish the session. The code format is
    /// validated before any network call.
    pub async fn verify_otp(&self, email: &str, code: &str) -> Result<(), StoreError> {
        if !is_valid_otp(code) {
            return Err(StoreError::validation("the code must be 6 digits"));
        }

        {
            let mut state = self.write();
            state.loading = true;
            state.error = None;
        }

        let result = async {
            self.service.verify_otp(email, code).await?;
            self.service.current_user().await
        }
        .await;

        match result {
            Ok(user) => {
                {
                    let mut state = self.write();
                    state.user = Some(user);
                    state.is_authenticated = true;
                    state.is_initialized = true;
                    state.loading = false;
                    state.pending_otp_email = None;
                }
                self.provision_chat_best_effort().await;
                self.notify_session_changed();
                Ok(())
            }
            Err(e) => {
                let mut state = self.write();
                state.loading = false;
                state.error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// OAuth login with a Google identity credential.
    pub async fn login_with_google(&self, credential: &str) -> Result<(), StoreError> {
        {
            let mut state = self.write();
            state.loading = true;
            state.error = None;
        }

        let result = async {
            self.service.google_login(credential).await?;
            self.service.current_user().await
        }
        .await;

        match result {
            Ok(user) => {
                {
                    let mut state = self.write();
                    state.user = Some(user);
                    state.is_authenticated = true;
                    state.is_initialized = true;
                    state.loading = false;
                    state.pending_otp_email = None;
                }
                self.provision_chat_best_effort().await;
                self.notify_session_changed();
                Ok(())
            }
            Err(e) => {
                let mut state = self.write();
                state.loading = false;
                state.error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Best-effort chat provisioning after login; its failure never fails
    /// the login itself.
    async fn provision_chat_best_effort(&self) {
        if let Some(chat) = &self.chat {
            if let Err(e) = chat.provision().await {
                log::warn!("Chat provisioning failed after login: {}", e);
            }
        }
    }

    /// Explicit logout: ends the server session and tears down local state,
    /// including chat.
    pub async fn logout(&self) -> Result<(), StoreError> {
        let result = self.service.logout().await;
        if let Err(e) = &result {
            log::warn!("Logout request failed: {}", e);
            self.notifier.error("Logout failed");
        }
        // Local identity is dropped regardless: the user asked to leave.
        {
            let mut state = self.write();
            state.user = None;
            state.is_authenticated = false;
            state.loading = false;
            state.error = None;
            state.pending_otp_email = None;
        }
        if let Some(chat) = &self.chat {
            chat.reset();
        }
        self.notify_session_changed();
        result.map_err(StoreError::from)
    }

    /// Forced transition to anonymous (terminal refresh failure). Clears the
    /// identity but never the initialization flag.
    pub fn handle_unauthorized(&self) {
        log::warn!("Session is no longer valid, dropping to anonymous");
        {
            let mut state = self.write();
            state.user = None;
            state.is_authenticated = false;
            state.loading = false;
        }
        if let Some(chat) = &self.chat {
            chat.reset();
        }
        self.notify_session_changed();
    }

    /// Merge a confirmed profile update into the session identity without
    /// re-fetching `/profile/me`.
    pub fn update_user(&self, update: &ProfileUpdate) {
        let mut state = self.write();
        if let Some(user) = state.user.as_mut() {
            if let Some(username) = &update.username {
                user.username = Some(username.clone());
            }
            if let Some(full_name) = &update.full_name {
                user.full_name = Some(full_name.clone());
            }
            if let Some(bio) = &update.bio {
                user.bio = Some(bio.clone());
            }
            if let Some(profile_url) = &update.profile_url {
                user.profile_url = Some(profile_url.clone());
            }
        }
    }

    /// Bridge the API client's unauthorized broadcast into this store.
    pub fn spawn_unauthorized_listener(self: &Arc<Self>, api: &ApiClient) -> JoinHandle<()> {
        let mut events = api.subscribe_auth_events();
        let store = Arc::clone(self);
        tokio::spawn(async move {
            while events.recv().await.is_ok() {
                store.handle_unauthorized();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::RequestDeduper;
    use crate::services::chat::ChatService;
    use crate::services::chat_api::ChatClient;
    use crate::transport::testing::MockTransport;
    use serde_json::json;
    use url::Url;

    fn profile_json(user_id: &str) -> serde_json::Value {
        json!({ "user_id": user_id, "email": "student@example.com" })
    }

    fn build(transport: Arc<MockTransport>) -> AuthStore {
        let api = Arc::new(ApiClient::with_transport(
            Url::parse("https://api.test").unwrap(),
            transport,
        ));
        AuthStore::new(AuthService::new(api), Arc::new(Notifier::new()))
    }

    fn build_with_chat(transport: Arc<MockTransport>) -> (AuthStore, Arc<ChatStore>) {
        let api = Arc::new(ApiClient::with_transport(
            Url::parse("https://api.test").unwrap(),
            transport.clone(),
        ));
        let chat_client = Arc::new(ChatClient::with_transport(
            Url::parse("http://chat.test").unwrap(),
            transport,
        ));
        let chat = Arc::new(ChatStore::new(
            ChatService::new(api.clone(), chat_client.clone()),
            chat_client,
            RequestDeduper::new(),
            Arc::new(Notifier::new()),
        ));
        let auth =
            AuthStore::new(AuthService::new(api), Arc::new(Notifier::new())).with_chat(chat.clone());
        (auth, chat)
    }

    #[tokio::test]
    async fn initialize_succeeds_and_sets_initialized() {
        let transport = MockTransport::new();
        transport.push_json(200, profile_json("u1"));
        let auth = build(transport);

        assert_eq!(auth.phase(), SessionPhase::Uninitialized);
        auth.initialize().await;

        let state = auth.state();
        assert!(state.is_initialized);
        assert!(state.is_authenticated);
        assert_eq!(auth.phase(), SessionPhase::Authenticated);
    }

    #[tokio::test]
    async fn initialize_failure_still_sets_initialized() {
        let transport = MockTransport::new();
        // Session check 401, refresh fails: terminal.
        transport.push_json(401, json!({"detail": "no session"}));
        transport.push_json(401, json!({"detail": "no refresh token"}));
        let auth = build(transport);

        auth.initialize().await;

        let state = auth.state();
        assert!(state.is_initialized);
        assert!(!state.is_authenticated);
        assert_eq!(auth.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test]
    async fn initialize_runs_only_once() {
        let transport = MockTransport::new();
        transport.push_json(200, profile_json("u1"));
        let auth = build(transport.clone());

        auth.initialize().await;
        auth.initialize().await;
        assert_eq!(transport.call_count(), 1);
    }

    #[tokio::test]
    async fn otp_flow_tracks_pending_email() {
        let transport = MockTransport::new();
        transport.push_json(200, json!({"message": "sent"}));
        transport.push_json(200, json!({"message": "ok"})); // verify
        transport.push_json(200, profile_json("u1")); // current user
        let auth = build(transport);

        auth.request_otp("student@example.com").await.unwrap();
        {
            let state = auth.state();
            assert_eq!(state.pending_otp_email.as_deref(), Some("student@example.com"));
            assert!(!state.is_authenticated);
        }

        auth.verify_otp("student@example.com", "123456").await.unwrap();
        let state = auth.state();
        assert!(state.is_authenticated);
        assert!(state.pending_otp_email.is_none());
        assert_eq!(state.user.as_ref().unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn malformed_email_rejected_before_network() {
        let transport = MockTransport::new();
        let auth = build(transport.clone());

        let err = auth.request_otp("not-an-email").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_otp_rejected_before_network() {
        let transport = MockTransport::new();
        let auth = build(transport.clone());

        for bad in ["12345", "1234567", "12345a", ""] {
            let err = auth.verify_otp("student@example.com", bad).await.unwrap_err();
            assert!(matches!(err, StoreError::Validation(_)));
        }
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn chat_provisioning_failure_does_not_fail_login() {
        let transport = MockTransport::new();
        transport.push_json(200, json!({"message": "ok"})); // verify
        transport.push_json(200, profile_json("u1")); // current user
        transport.push_json(403, json!({"detail": "not a student"})); // chat sync
        let (auth, chat) = build_with_chat(transport);

        auth.verify_otp("student@example.com", "123456").await.unwrap();
        assert!(auth.state().is_authenticated);
        assert!(!chat.is_eligible());
    }

    #[tokio::test]
    async fn successful_login_provisions_chat() {
        let transport = MockTransport::new();
        transport.push_json(200, json!({"message": "ok"}));
        transport.push_json(200, profile_json("u1"));
        transport.push_json(
            200,
            json!({"chatToken": "jwt", "userData": {"_id": "u1"}, "isStudent": true}),
        );
        let (auth, chat) = build_with_chat(transport);

        auth.verify_otp("student@example.com", "123456").await.unwrap();
        assert!(chat.is_eligible());
        assert!(chat.realtime_session().is_some());
    }

    #[tokio::test]
    async fn login_emits_session_change_with_chat_already_provisioned() {
        let transport = MockTransport::new();
        transport.push_json(200, json!({"message": "ok"})); // verify
        transport.push_json(200, profile_json("u1"));
        transport.push_json(
            200,
            json!({"chatToken": "jwt", "userData": {"_id": "u1"}, "isStudent": true}),
        );
        let (auth, chat) = build_with_chat(transport);
        let mut events = auth.subscribe_session_events();

        auth.verify_otp("student@example.com", "123456").await.unwrap();

        // The signal fires only after provisioning settled, so a listener
        // reconciling the realtime connection already sees the session.
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Changed);
        assert!(chat.realtime_session().is_some());
    }

    #[tokio::test]
    async fn logout_and_forced_drop_emit_session_changes() {
        let transport = MockTransport::new();
        transport.push_json(200, profile_json("u1")); // initialize
        transport.push_json(200, json!({"message": "bye"})); // logout
        let auth = build(transport);
        let mut events = auth.subscribe_session_events();

        auth.initialize().await;
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Changed);

        auth.logout().await.unwrap();
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Changed);

        auth.handle_unauthorized();
        assert_eq!(events.try_recv().unwrap(), SessionEvent::Changed);
    }

    #[tokio::test]
    async fn unauthorized_signal_forces_anonymous_but_keeps_initialized() {
        let transport = MockTransport::new();
        transport.push_json(200, profile_json("u1"));
        let auth = build(transport);

        auth.initialize().await;
        assert_eq!(auth.phase(), SessionPhase::Authenticated);

        auth.handle_unauthorized();
        let state = auth.state();
        assert!(state.is_initialized);
        assert!(!state.is_authenticated);
        assert!(state.user.is_none());
        assert_eq!(auth.phase(), SessionPhase::Anonymous);
    }

    #[tokio::test]
    async fn logout_clears_identity_and_chat() {
        let transport = MockTransport::new();
        transport.push_json(200, json!({"message": "ok"})); // verify
        transport.push_json(200, profile_json("u1"));
        transport.push_json(
            200,
            json!({"chatToken": "jwt", "userData": {"_id": "u1"}, "isStudent": true}),
        );
        transport.push_json(200, json!({"message": "bye"})); // logout
        let (auth, chat) = build_with_chat(transport);

        auth.verify_otp("student@example.com", "123456").await.unwrap();
        auth.logout().await.unwrap();

        assert!(!auth.state().is_authenticated);
        assert!(!chat.is_eligible());
        assert!(chat.realtime_session().is_none());
    }
}
