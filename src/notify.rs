//! Transient user-facing notices.
//!
//! Headless stand-in for a toast UI: stores publish mutation failures here
//! and the rendering layer subscribes. Publishing never fails; with no
//! subscriber the notice is simply dropped.

use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(32);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("{}", message);
        let _ = self.tx.send(Notice {
            level: NoticeLevel::Error,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        let _ = self.tx.send(Notice {
            level: NoticeLevel::Info,
            message: message.into(),
        });
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
