// Network-facing service layer
// Thin typed wrappers over the two HTTP clients

pub mod api;
pub mod auth;
pub mod chat;
pub mod chat_api;
pub mod documents;
pub mod profile;
pub mod search;
