//! Headless client library for the EduStore platform.
//!
//! Wraps the two backends (the primary REST API and the chat microservice)
//! behind typed services and a set of injectable state stores: session,
//! document feeds, profiles and messaging, plus the realtime chat connection.
//! Nothing here renders; embedders observe store state and call operations.

pub mod app;
pub mod config;
pub mod dedup;
pub mod engagement;
pub mod error;
pub mod models;
pub mod notify;
pub mod pagination;
pub mod realtime;
pub mod services;
pub mod stores;
pub mod transport;

pub use app::EdustoreClient;
pub use config::ClientConfig;
pub use error::{ApiError, StoreError};
pub use notify::{Notice, NoticeLevel};
