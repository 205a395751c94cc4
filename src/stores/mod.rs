// Injectable state stores
// Each store owns one slice of client state behind interior mutability

pub mod auth_store;
pub mod chat_store;
pub mod documents;
pub mod profile_store;
