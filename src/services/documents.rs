//! Document and feed endpoints of the primary backend.

use std::sync::Arc;

use serde_json::json;

use crate::error::{ApiError, StoreError};
use crate::models::{Comment, Document, EngagementAck, UploadTicket};
use crate::services::api::ApiClient;

/// Upload size cap enforced client-side before any network call.
pub const MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "image/png",
    "image/jpeg",
];

#[derive(Clone)]
pub struct DocumentService {
    api: Arc<ApiClient>,
}

impl DocumentService {
    pub fn new(api: Arc<ApiClient>) -> Self {
        Self { api }
    }

    pub async fn public_feed(&self, limit: usize, offset: usize) -> Result<Vec<Document>, ApiError> {
        self.api
            .get(&format!("/feed/public?limit={}&offset={}", limit, offset))
            .await
    }

    pub async fn following_feed(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>, ApiError> {
        self.api
            .get(&format!(
                "/feed/private/following?limit={}&offset={}",
                limit, offset
            ))
            .await
    }

    pub async fn user_documents(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>, ApiError> {
        self.api
            .get(&format!(
                "/users/{}/documents?limit={}&offset={}",
                user_id, limit, offset
            ))
            .await
    }

    pub async fn bookmarks(&self, limit: usize, offset: usize) -> Result<Vec<Document>, ApiError> {
        self.api
            .get(&format!(
                "/documents/bookmarks/me?limit={}&offset={}",
                limit, offset
            ))
            .await
    }

    pub async fn document_details(&self, document_id: &str) -> Result<Document, ApiError> {
        self.api.get(&format!("/feed/{}", document_id)).await
    }

    pub async fn like(&self, document_id: &str) -> Result<EngagementAck, ApiError> {
        self.api
            .post_empty(&format!("/documents/{}/like", document_id))
            .await
    }

    pub async fn unlike(&self, document_id: &str) -> Result<EngagementAck, ApiError> {
        self.api
            .delete(&format!("/documents/{}/like", document_id))
            .await
    }

    pub async fn bookmark(&self, document_id: &str) -> Result<EngagementAck, ApiError> {
        self.api
            .post_empty(&format!("/documents/{}/bookmark", document_id))
            .await
    }

    pub async fn remove_bookmark(&self, document_id: &str) -> Result<EngagementAck, ApiError> {
        self.api
            .delete(&format!("/documents/{}/bookmark", document_id))
            .await
    }

    pub async fn comments(&self, document_id: &str) -> Result<Vec<Comment>, ApiError> {
        self.api
            .get(&format!("/documents/{}/comments", document_id))
            .await
    }

    pub async fn add_comment(
        &self,
        document_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<Comment, ApiError> {
        self.api
            .post(
                &format!("/documents/{}/comments", document_id),
                &json!({ "content": content, "parent_id": parent_id }),
            )
            .await
    }

    pub async fn delete_comment(&self, comment_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self.api.delete(&format!("/comments/{}", comment_id)).await?;
        Ok(())
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<(), ApiError> {
        let _: serde_json::Value = self.api.delete(&format!("/documents/{}", document_id)).await?;
        Ok(())
    }

    /// Validate an upload locally, then request a presigned target.
    /// Oversized or unsupported files are rejected before any network call.
    pub async fn request_upload(
        &self,
        content_type: &str,
        size_bytes: u64,
    ) -> Result<UploadTicket, StoreError> {
        if size_bytes > MAX_UPLOAD_BYTES {
            return Err(StoreError::validation(format!(
                "file is too large ({} bytes, max {})",
                size_bytes, MAX_UPLOAD_BYTES
            )));
        }
        if !ALLOWED_CONTENT_TYPES.contains(&content_type) {
            return Err(StoreError::validation(format!(
                "unsupported content type {}",
                content_type
            )));
        }
        let ticket = self
            .api
            .post("/documents/upload-url", &json!({ "content_type": content_type }))
            .await?;
        Ok(ticket)
    }

    /// Commit a finished upload so the document becomes visible.
    pub async fn commit_upload(
        &self,
        object_key: &str,
        title: &str,
        doc_type: &str,
        visibility: &str,
    ) -> Result<Document, ApiError> {
        self.api
            .post(
                "/documents/commit",
                &json!({
                    "object_key": object_key,
                    "title": title,
                    "doc_type": doc_type,
                    "visibility": visibility,
                }),
            )
            .await
    }

    pub async fn download_url(&self, document_id: &str) -> Result<String, ApiError> {
        let value: serde_json::Value = self
            .api
            .get(&format!("/documents/{}/download", document_id))
            .await?;
        value
            .get("download_url")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::Decode("missing download_url".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;
    use url::Url;

    fn service(transport: Arc<MockTransport>) -> DocumentService {
        let api = Arc::new(ApiClient::with_transport(
            Url::parse("https://api.test").unwrap(),
            transport,
        ));
        DocumentService::new(api)
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_network() {
        let transport = MockTransport::new();
        let docs = service(transport.clone());

        let err = docs
            .request_upload("application/pdf", MAX_UPLOAD_BYTES + 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(transport.call_count(), 0);
    }

    #[tokio::test]
    async fn unsupported_type_is_rejected_before_network() {
        let transport = MockTransport::new();
        let docs = service(transport.clone());

        let err = docs
            .request_upload("application/x-msdownload", 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(transport.call_count(), 0);
    }
}
