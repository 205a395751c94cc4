//! Search endpoints.

use std::sync::Arc;

use crate::error::ApiError;
use crate::models::{Document, UserSummary};
use crate::services::api::ApiClient;

fn encode(query: &str) -> String {
    url::form_urlencoded::byte_serialize(query.as_bytes()).collect()
}

#[derive(Clone)]
pub struct SearchService {
    api: Arc<ApiClient>,
}

impl SearchService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub async fn documents(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>, ApiError> {
        self.api
            .get(&format!(
                "/search/documents?query={}&limit={}&offset={}",
                encode(query),
                limit,
                offset
            ))
            .await
    }

    pub async fn users(
        &self,
        query: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UserSummary>, ApiError> {
        self.api
            .get(&format!(
                "/search/users?q={}&limit={}&offset={}",
                encode(query),
                limit,
                offset
            ))
            .await
    }
}
