//! Realtime chat connection.
//!
//! The chat service pushes JSON frames of the shape
//! `{"event": "...", "data": ...}` over a websocket authenticated by query
//! parameters. This module owns the connection lifecycle (connect, read loop,
//! reconnect with backoff) and feeds every decoded frame into the chat store
//! through its single ingestion point.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use crate::error::ApiError;
use crate::models::ChatMessage;
use crate::stores::chat_store::ChatStore;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Events pushed to the chat store. `Connected` and `Disconnected` are
/// synthesized locally from the socket lifecycle; the rest decode from wire
/// frames.
#[derive(Clone, Debug, PartialEq)]
pub enum RealtimeEvent {
    Connected,
    Disconnected,
    OnlineUsers(Vec<String>),
    NewMessage(Box<ChatMessage>),
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
enum WireFrame {
    NewMessage(ChatMessage),
    GetOnlineUsers(Vec<String>),
}

/// Decode one text frame. Unknown or malformed frames are dropped.
pub fn parse_frame(text: &str) -> Option<RealtimeEvent> {
    match serde_json::from_str::<WireFrame>(text) {
        Ok(WireFrame::NewMessage(message)) => {
            Some(RealtimeEvent::NewMessage(Box::new(message)))
        }
        Ok(WireFrame::GetOnlineUsers(users)) => Some(RealtimeEvent::OnlineUsers(users)),
        Err(e) => {
            log::debug!("Ignoring unrecognized chat frame: {}", e);
            None
        }
    }
}

fn websocket_url(base: &Url, user_id: &str, token: &str) -> Result<Url, ApiError> {
    let mut url = base.clone();
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        _ => "ws",
    };
    url.set_scheme(scheme)
        .map_err(|_| ApiError::internal("chat base URL cannot carry a websocket scheme"))?;
    url.set_path("/ws");
    url.query_pairs_mut()
        .clear()
        .append_pair("userId", user_id)
        .append_pair("token", token);
    Ok(url)
}

struct ConnectionHandle {
    /// The (user id, token) pair this connection was opened for.
    session: (String, String),
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns at most one live websocket, keyed by the chat session it serves.
///
/// Callers never connect directly; they call [`sync_with_session`] after any
/// auth or provisioning change and the connection follows the store: opened
/// when a session appears, replaced when it changes, closed when it goes away.
///
/// [`sync_with_session`]: RealtimeConnection::sync_with_session
pub struct RealtimeConnection {
    base_url: Url,
    chat: Arc<ChatStore>,
    worker: Mutex<Option<ConnectionHandle>>,
}

impl RealtimeConnection {
    pub fn new(base_url: Url, chat: Arc<ChatStore>) -> Self {
        Self {
            base_url,
            chat,
            worker: Mutex::new(None),
        }
    }

    fn lock_worker(&self) -> std::sync::MutexGuard<'_, Option<ConnectionHandle>> {
        self.worker.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Reconcile the connection with the chat store's current session.
    /// Must be called from within a tokio runtime.
    pub fn sync_with_session(&self) {
        let desired = self.chat.realtime_session();
        let mut worker = self.lock_worker();

        if let (Some(session), Some(handle)) = (&desired, worker.as_ref()) {
            if handle.session == *session {
                return;
            }
        }
        if let Some(handle) = worker.take() {
            self.stop(handle);
        }

        if let Some((user_id, token)) = desired {
            match websocket_url(&self.base_url, &user_id, &token) {
                Ok(url) => {
                    *worker = Some(self.spawn(url, (user_id, token)));
                }
                Err(e) => {
                    log::error!("Cannot open chat socket: {}", e);
                }
            }
        }
    }

    /// Tear down the connection if one is live.
    pub fn disconnect(&self) {
        if let Some(handle) = self.lock_worker().take() {
            self.stop(handle);
        }
    }

    fn stop(&self, handle: ConnectionHandle) {
        let _ = handle.shutdown.send(true);
        handle.task.abort();
        self.chat.ingest_event(RealtimeEvent::Disconnected);
    }

    fn spawn(&self, url: Url, session: (String, String)) -> ConnectionHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let chat = Arc::clone(&self.chat);

        let task = tokio::spawn(async move {
            let mut backoff = INITIAL_BACKOFF;
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                match connect_async(url.as_str()).await {
                    Ok((stream, _)) => {
                        backoff = INITIAL_BACKOFF;
                        chat.ingest_event(RealtimeEvent::Connected);
                        let (_, mut read) = stream.split();
                        loop {
                            tokio::select! {
                                _ = shutdown_rx.changed() => break,
                                frame = read.next() => match frame {
                                    Some(Ok(Message::Text(text))) => {
                                        if let Some(event) = parse_frame(&text) {
                                            chat.ingest_event(event);
                                        }
                                    }
                                    Some(Ok(_)) => {}
                                    Some(Err(e)) => {
                                        log::warn!("Chat socket error: {}", e);
                                        break;
                                    }
                                    None => break,
                                },
                            }
                        }
                        chat.ingest_event(RealtimeEvent::Disconnected);
                    }
                    Err(e) => {
                        log::warn!("Chat socket connect failed: {}", e);
                    }
                }
                if *shutdown_rx.borrow() {
                    break;
                }
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        });

        ConnectionHandle {
            session,
            shutdown,
            task,
        }
    }
}

impl Drop for RealtimeConnection {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_worker().take() {
            let _ = handle.shutdown.send(true);
            handle.task.abort();
        }
    }
}
