//! Document feed state: paginated collections, the detail cache, comments,
//! and the optimistic like/bookmark protocol.
//!
//! Engagement flags for a document are patched in every collection that
//! currently holds a copy of it, so no holder is ever left stale after a
//! confirmed mutation.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::dedup::{request_key, RequestDeduper};
use crate::engagement::{ActionKind, EngagementPatch, EngagementTracker, MutationPhase};
use crate::error::StoreError;
use crate::models::{Comment, Document};
use crate::notify::Notifier;
use crate::pagination::FeedCollection;
use crate::services::documents::DocumentService;
use crate::services::search::SearchService;

/// The feed collections this store maintains.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum DocumentFeed {
    Public,
    Following,
    Bookmarks,
    /// Documents uploaded by one user (profile page).
    User(String),
}

impl DocumentFeed {
    fn key(&self) -> String {
        match self {
            DocumentFeed::Public => "public".to_string(),
            DocumentFeed::Following => "following".to_string(),
            DocumentFeed::Bookmarks => "bookmarks".to_string(),
            DocumentFeed::User(id) => format!("user:{}", id),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct DocumentsState {
    pub public_feed: FeedCollection<Document>,
    pub following_feed: FeedCollection<Document>,
    pub bookmarks: FeedCollection<Document>,
    pub user_documents: HashMap<String, FeedCollection<Document>>,
    /// Detail view cache for the currently open document.
    pub current_document: Option<Document>,
    /// Comments of the currently open document.
    pub comments: Vec<Comment>,
    pub search_results: Vec<Document>,
    /// Last read failure, surfaced in place instead of a notification.
    pub last_error: Option<String>,
}

impl DocumentsState {
    fn collection_mut(&mut self, feed: &DocumentFeed) -> &mut FeedCollection<Document> {
        match feed {
            DocumentFeed::Public => &mut self.public_feed,
            DocumentFeed::Following => &mut self.following_feed,
            DocumentFeed::Bookmarks => &mut self.bookmarks,
            DocumentFeed::User(id) => self
                .user_documents
                .entry(id.clone())
                .or_default(),
        }
    }

    pub fn collection(&self, feed: &DocumentFeed) -> Option<&FeedCollection<Document>> {
        match feed {
            DocumentFeed::Public => Some(&self.public_feed),
            DocumentFeed::Following => Some(&self.following_feed),
            DocumentFeed::Bookmarks => Some(&self.bookmarks),
            DocumentFeed::User(id) => self.user_documents.get(id),
        }
    }

    /// Apply the same patch to every copy of the document, everywhere.
    fn apply_patch(&mut self, document_id: &str, patch: &EngagementPatch) {
        let mut touch = |collection: &mut FeedCollection<Document>| {
            for doc in collection.items_mut() {
                if doc.id == document_id {
                    patch.apply(doc);
                }
            }
        };
        touch(&mut self.public_feed);
        touch(&mut self.following_feed);
        touch(&mut self.bookmarks);
        for collection in self.user_documents.values_mut() {
            touch(collection);
        }
        for doc in self.search_results.iter_mut() {
            if doc.id == document_id {
                patch.apply(doc);
            }
        }
        if let Some(doc) = self.current_document.as_mut() {
            if doc.id == document_id {
                patch.apply(doc);
            }
        }
    }

    /// Current engagement flags of a document, from whichever holder has it.
    fn find(&self, document_id: &str) -> Option<&Document> {
        if let Some(doc) = self.current_document.as_ref() {
            if doc.id == document_id {
                return Some(doc);
            }
        }
        self.public_feed
            .items()
            .iter()
            .chain(self.following_feed.items())
            .chain(self.bookmarks.items())
            .chain(self.user_documents.values().flat_map(|c| c.items()))
            .chain(self.search_results.iter())
            .find(|doc| doc.id == document_id)
    }
}

pub struct DocumentsStore {
    service: DocumentService,
    search: SearchService,
    dedup: Arc<RequestDeduper>,
    notifier: Arc<Notifier>,
    tracker: EngagementTracker,
    state: RwLock<DocumentsState>,
}

impl DocumentsStore {
    pub fn new(
        service: DocumentService,
        search: SearchService,
        dedup: Arc<RequestDeduper>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            service,
            search,
            dedup,
            notifier,
            tracker: EngagementTracker::new(),
            state: RwLock::new(DocumentsState::default()),
        }
    }

    pub fn state(&self) -> DocumentsState {
        self.read().clone()
    }

    pub fn engagement_phase(&self, document_id: &str, action: ActionKind) -> MutationPhase {
        self.tracker.phase(document_id, action)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, DocumentsState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, DocumentsState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    async fn fetch_page(
        &self,
        feed: &DocumentFeed,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<Document>, crate::error::ApiError> {
        match feed {
            DocumentFeed::Public => self.service.public_feed(limit, offset).await,
            DocumentFeed::Following => self.service.following_feed(limit, offset).await,
            DocumentFeed::Bookmarks => self.service.bookmarks(limit, offset).await,
            DocumentFeed::User(id) => self.service.user_documents(id, limit, offset).await,
        }
    }

    /// Replace a collection with its first page. Deduplicated by
    /// (feed, limit, offset=0) so rapid identical refreshes share one fetch.
    pub async fn load_first_page(&self, feed: DocumentFeed, limit: usize) -> Result<(), StoreError> {
        let ticket = self.write().collection_mut(&feed).begin_refresh(limit);

        let key = request_key("documents/first_page", &(feed.key(), limit, 0usize));
        let service = self.service.clone();
        let feed_for_fetch = feed.clone();
        let result = self
            .dedup
            .run(key, move || async move {
                match &feed_for_fetch {
                    DocumentFeed::Public => service.public_feed(limit, 0).await,
                    DocumentFeed::Following => service.following_feed(limit, 0).await,
                    DocumentFeed::Bookmarks => service.bookmarks(limit, 0).await,
                    DocumentFeed::User(id) => service.user_documents(id, limit, 0).await,
                }
            })
            .await;

        match result {
            Ok(items) => {
                let mut state = self.write();
                state.last_error = None;
                state.collection_mut(&feed).apply_first_page(ticket, items);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to load {} feed: {}", feed.key(), e);
                let mut state = self.write();
                state.collection_mut(&feed).fail(ticket);
                state.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Append the next page. Fails with a precondition error when the feed is
    /// exhausted or a load for this feed is already running.
    pub async fn load_next_page(&self, feed: DocumentFeed) -> Result<(), StoreError> {
        let (ticket, limit, offset) = {
            let mut state = self.write();
            let collection = state.collection_mut(&feed);
            let ticket = collection.begin_next_page()?;
            (ticket, collection.limit(), collection.offset())
        };

        match self.fetch_page(&feed, limit, offset).await {
            Ok(items) => {
                self.write().collection_mut(&feed).apply_next_page(ticket, items);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to load more of {} feed: {}", feed.key(), e);
                let mut state = self.write();
                state.collection_mut(&feed).fail(ticket);
                state.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Fetch the detail view of one document. Deduplicated by document id.
    pub async fn load_document(&self, document_id: &str) -> Result<Document, StoreError> {
        // Clear the previous document so a navigation never shows stale data.
        self.write().current_document = None;

        let key = request_key("documents/details", &document_id);
        let service = self.service.clone();
        let id = document_id.to_string();
        let result = self
            .dedup
            .run(key, move || async move { service.document_details(&id).await })
            .await;

        match result {
            Ok(doc) => {
                self.write().current_document = Some(doc.clone());
                Ok(doc)
            }
            Err(e) => {
                self.write().last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Optimistic like toggle with rollback and server-count reconciliation.
    pub async fn toggle_like(&self, document_id: &str) -> Result<(), StoreError> {
        let currently_liked = self
            .read()
            .find(document_id)
            .map(|doc| doc.is_liked)
            .ok_or_else(|| StoreError::precondition("document not loaded"))?;

        let target = !currently_liked;
        let patch = EngagementPatch::like(target);
        self.write().apply_patch(document_id, &patch);
        let seq = self.tracker.begin(document_id, ActionKind::Like);

        let result = if target {
            self.service.like(document_id).await
        } else {
            self.service.unlike(document_id).await
        };

        match result {
            Ok(ack) => {
                if self.tracker.commit(document_id, ActionKind::Like, seq) {
                    // Server count always wins over client arithmetic.
                    if let Some(count) = ack.like_count {
                        self.write()
                            .apply_patch(document_id, &EngagementPatch::server_like_count(count));
                    }
                }
                Ok(())
            }
            Err(e) => {
                if self.tracker.roll_back(document_id, ActionKind::Like, seq) {
                    self.write().apply_patch(document_id, &patch.inverse());
                }
                self.notifier.error("Failed to update like");
                Err(e.into())
            }
        }
    }

    /// Optimistic bookmark toggle with rollback.
    pub async fn toggle_bookmark(&self, document_id: &str) -> Result<(), StoreError> {
        let currently_bookmarked = self
            .read()
            .find(document_id)
            .map(|doc| doc.is_bookmarked)
            .ok_or_else(|| StoreError::precondition("document not loaded"))?;

        let target = !currently_bookmarked;
        let patch = EngagementPatch::bookmark(target);
        self.write().apply_patch(document_id, &patch);
        let seq = self.tracker.begin(document_id, ActionKind::Bookmark);

        let result = if target {
            self.service.bookmark(document_id).await
        } else {
            self.service.remove_bookmark(document_id).await
        };

        match result {
            Ok(_) => {
                self.tracker.commit(document_id, ActionKind::Bookmark, seq);
                Ok(())
            }
            Err(e) => {
                if self.tracker.roll_back(document_id, ActionKind::Bookmark, seq) {
                    self.write().apply_patch(document_id, &patch.inverse());
                }
                self.notifier.error("Failed to update bookmark");
                Err(e.into())
            }
        }
    }

    /// Apply an externally computed engagement patch to every holder.
    pub fn apply_engagement(&self, document_id: &str, patch: &EngagementPatch) {
        self.write().apply_patch(document_id, patch);
    }

    pub async fn load_comments(&self, document_id: &str) -> Result<(), StoreError> {
        match self.service.comments(document_id).await {
            Ok(comments) => {
                self.write().comments = comments;
                Ok(())
            }
            Err(e) => {
                self.write().last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    pub async fn add_comment(
        &self,
        document_id: &str,
        content: &str,
        parent_id: Option<&str>,
    ) -> Result<(), StoreError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::validation("comment cannot be empty"));
        }
        match self.service.add_comment(document_id, content, parent_id).await {
            Ok(comment) => {
                let mut state = self.write();
                state.comments.push(comment);
                if let Some(doc) = state.current_document.as_mut() {
                    if doc.id == document_id {
                        doc.comment_count += 1;
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.notifier.error("Failed to post comment");
                Err(e.into())
            }
        }
    }

    pub async fn delete_comment(&self, comment_id: &str) -> Result<(), StoreError> {
        match self.service.delete_comment(comment_id).await {
            Ok(()) => {
                let mut state = self.write();
                let removed = state
                    .comments
                    .iter()
                    .position(|c| c.id == comment_id)
                    .map(|index| state.comments.remove(index));
                if let Some(comment) = removed {
                    if let Some(doc) = state.current_document.as_mut() {
                        if doc.id == comment.document_id {
                            doc.comment_count = doc.comment_count.saturating_sub(1);
                        }
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.notifier.error("Failed to delete comment");
                Err(e.into())
            }
        }
    }

    /// Document search, deduplicated by query.
    pub async fn search_documents(&self, query: &str, limit: usize) -> Result<(), StoreError> {
        let query = query.trim();
        if query.is_empty() {
            self.write().search_results.clear();
            return Ok(());
        }

        let key = request_key("documents/search", &(query, limit));
        let search = self.search.clone();
        let q = query.to_string();
        let result = self
            .dedup
            .run(key, move || async move { search.documents(&q, limit, 0).await })
            .await;

        match result {
            Ok(documents) => {
                self.write().search_results = documents;
                Ok(())
            }
            Err(e) => {
                self.write().last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Publish a finished upload. The confirmed document becomes the current
    /// detail view.
    pub async fn commit_upload(
        &self,
        object_key: &str,
        title: &str,
        doc_type: &str,
        visibility: &str,
    ) -> Result<Document, StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::validation("title cannot be empty"));
        }
        match self
            .service
            .commit_upload(object_key, title, doc_type, visibility)
            .await
        {
            Ok(doc) => {
                self.write().current_document = Some(doc.clone());
                Ok(doc)
            }
            Err(e) => {
                self.notifier.error("Failed to publish document");
                Err(e.into())
            }
        }
    }

    /// Short-lived download link for a document.
    pub async fn download_url(&self, document_id: &str) -> Result<String, StoreError> {
        match self.service.download_url(document_id).await {
            Ok(url) => Ok(url),
            Err(e) => {
                self.notifier.error("Failed to fetch download link");
                Err(e.into())
            }
        }
    }

    pub async fn delete_document(&self, document_id: &str) -> Result<(), StoreError> {
        match self.service.delete_document(document_id).await {
            Ok(()) => {
                let mut state = self.write();
                if state
                    .current_document
                    .as_ref()
                    .is_some_and(|doc| doc.id == document_id)
                {
                    state.current_document = None;
                }
                Ok(())
            }
            Err(e) => {
                self.notifier.error("Failed to delete document");
                Err(e.into())
            }
        }
    }

    /// Drop all held documents (logout). Bumps every collection's epoch so
    /// in-flight loads settle as stale.
    pub fn reset(&self) {
        let mut state = self.write();
        state.public_feed.reset();
        state.following_feed.reset();
        state.bookmarks.reset();
        state.user_documents.clear();
        state.current_document = None;
        state.comments.clear();
        state.search_results.clear();
        state.last_error = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::api::ApiClient;
    use crate::transport::testing::MockTransport;
    use serde_json::json;
    use url::Url;

    fn doc_json(id: &str, liked: bool, likes: u64) -> serde_json::Value {
        json!({
            "id": id,
            "title": format!("Document {}", id),
            "like_count": likes,
            "is_liked": liked,
            "is_bookmarked": false,
        })
    }

    fn store(transport: Arc<MockTransport>) -> DocumentsStore {
        let api = Arc::new(ApiClient::with_transport(
            Url::parse("https://api.test").unwrap(),
            transport,
        ));
        DocumentsStore::new(
            DocumentService::new(api.clone()),
            SearchService::new(api),
            RequestDeduper::new(),
            Arc::new(Notifier::new()),
        )
    }

    fn page_json(range: std::ops::Range<u32>) -> serde_json::Value {
        json!(range
            .map(|i| doc_json(&format!("d{}", i), false, 0))
            .collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn pagination_tracks_offsets_and_has_more() {
        let transport = MockTransport::new();
        transport.push_json(200, page_json(0..20));
        transport.push_json(200, page_json(20..27));
        let docs = store(transport.clone());

        docs.load_first_page(DocumentFeed::Public, 20).await.unwrap();
        {
            let state = docs.state();
            assert_eq!(state.public_feed.offset(), 20);
            assert!(state.public_feed.has_more());
        }

        docs.load_next_page(DocumentFeed::Public).await.unwrap();
        let state = docs.state();
        assert_eq!(state.public_feed.offset(), 27);
        assert_eq!(state.public_feed.items().len(), 27);
        assert!(!state.public_feed.has_more());

        // Exhausted: precondition error, no network call.
        let calls_before = transport.call_count();
        let err = docs.load_next_page(DocumentFeed::Public).await.unwrap_err();
        assert!(matches!(err, StoreError::Precondition(_)));
        assert_eq!(transport.call_count(), calls_before);
    }

    #[tokio::test]
    async fn rapid_first_page_loads_share_one_fetch() {
        let (transport, gate) = MockTransport::gated();
        transport.push_json(200, page_json(0..20));
        let docs = Arc::new(store(transport.clone()));

        let first = docs.load_first_page(DocumentFeed::Public, 20);
        let second = docs.load_first_page(DocumentFeed::Public, 20);
        gate.add_permits(2);
        let (a, b) = tokio::join!(first, second);

        a.unwrap();
        b.unwrap();
        assert_eq!(transport.call_count(), 1);
        assert_eq!(docs.state().public_feed.items().len(), 20);
    }

    #[tokio::test]
    async fn like_is_optimistic_and_rolls_back_on_failure() {
        let transport = MockTransport::new();
        transport.push_json(200, json!([doc_json("d1", false, 4)]));
        transport.push_json(500, json!({"detail": "server error"}));
        let docs = store(transport.clone());

        docs.load_first_page(DocumentFeed::Public, 20).await.unwrap();
        let err = docs.toggle_like("d1").await.unwrap_err();
        assert!(matches!(err, StoreError::Api(_)));

        let state = docs.state();
        let doc = &state.public_feed.items()[0];
        assert!(!doc.is_liked);
        assert_eq!(doc.like_count, 4);
        assert_eq!(
            docs.engagement_phase("d1", ActionKind::Like),
            MutationPhase::RolledBack
        );
    }

    #[tokio::test]
    async fn like_commits_with_server_count_override() {
        let transport = MockTransport::new();
        transport.push_json(200, json!([doc_json("d1", false, 4)]));
        transport.push_json(200, json!({"is_liked": true, "like_count": 9}));
        let docs = store(transport.clone());

        docs.load_first_page(DocumentFeed::Public, 20).await.unwrap();
        docs.toggle_like("d1").await.unwrap();

        let state = docs.state();
        let doc = &state.public_feed.items()[0];
        assert!(doc.is_liked);
        assert_eq!(doc.like_count, 9);
        assert_eq!(
            docs.engagement_phase("d1", ActionKind::Like),
            MutationPhase::Committed
        );
    }

    #[tokio::test]
    async fn engagement_patch_reaches_every_holder() {
        let transport = MockTransport::new();
        // Same document appears in the public feed, the bookmarks feed and
        // the detail cache.
        transport.push_json(200, json!([doc_json("d1", false, 4)]));
        transport.push_json(200, json!([doc_json("d1", false, 4)]));
        transport.push_json(200, doc_json("d1", false, 4));
        transport.push_json(200, json!({"is_liked": true}));
        let docs = store(transport.clone());

        docs.load_first_page(DocumentFeed::Public, 20).await.unwrap();
        docs.load_first_page(DocumentFeed::Bookmarks, 20).await.unwrap();
        docs.load_document("d1").await.unwrap();

        docs.toggle_like("d1").await.unwrap();

        let state = docs.state();
        assert!(state.public_feed.items()[0].is_liked);
        assert!(state.bookmarks.items()[0].is_liked);
        assert!(state.current_document.as_ref().unwrap().is_liked);
        assert_eq!(state.public_feed.items()[0].like_count, 5);
        assert_eq!(state.bookmarks.items()[0].like_count, 5);
    }

    #[tokio::test]
    async fn deleting_a_comment_updates_detail_counts() {
        let transport = MockTransport::new();
        transport.push_json(200, json!({"id": "d1", "title": "Notes", "comment_count": 2}));
        transport.push_json(
            200,
            json!([
                {"id": "c1", "document_id": "d1", "content": "nice"},
                {"id": "c2", "document_id": "d1", "content": "thanks"}
            ]),
        );
        transport.push_json(200, json!({}));
        let docs = store(transport.clone());

        docs.load_document("d1").await.unwrap();
        docs.load_comments("d1").await.unwrap();
        docs.delete_comment("c1").await.unwrap();

        let state = docs.state();
        assert_eq!(state.comments.len(), 1);
        assert_eq!(state.comments[0].id, "c2");
        assert_eq!(state.current_document.unwrap().comment_count, 1);
    }

    #[tokio::test]
    async fn document_search_holds_results_and_patches_them() {
        let transport = MockTransport::new();
        transport.push_json(200, json!([doc_json("d7", false, 2)]));
        transport.push_json(200, json!({"is_liked": true}));
        let docs = store(transport.clone());

        docs.search_documents("linear algebra", 20).await.unwrap();
        assert_eq!(docs.state().search_results.len(), 1);

        // Search hits are holders too: engagement reaches them.
        docs.toggle_like("d7").await.unwrap();
        let state = docs.state();
        assert!(state.search_results[0].is_liked);
        assert_eq!(state.search_results[0].like_count, 3);

        // Blank queries clear locally without a request.
        docs.search_documents("  ", 20).await.unwrap();
        assert!(docs.state().search_results.is_empty());
        assert_eq!(transport.call_count(), 2);
    }

    #[tokio::test]
    async fn publishing_an_upload_sets_the_detail_view() {
        let transport = MockTransport::new();
        transport.push_json(200, doc_json("d9", false, 0));
        let docs = store(transport.clone());

        let err = docs.commit_upload("k9", "   ", "pdf", "public").await.unwrap_err();
        assert!(matches!(err, StoreError::Validation(_)));
        assert_eq!(transport.call_count(), 0);

        let doc = docs.commit_upload("k9", "Algebra notes", "pdf", "public").await.unwrap();
        assert_eq!(doc.id, "d9");
        assert_eq!(docs.state().current_document.unwrap().id, "d9");
    }

    #[tokio::test]
    async fn download_link_comes_from_the_backend() {
        let transport = MockTransport::new();
        transport.push_json(200, json!({"download_url": "https://cdn.test/d1.pdf"}));
        let docs = store(transport.clone());

        let url = docs.download_url("d1").await.unwrap();
        assert_eq!(url, "https://cdn.test/d1.pdf");
    }

    #[tokio::test]
    async fn read_failure_sets_error_state_without_partial_data() {
        let transport = MockTransport::new();
        transport.push_json(500, json!({"detail": "database down"}));
        let docs = store(transport.clone());

        let err = docs.load_first_page(DocumentFeed::Public, 20).await;
        assert!(err.is_err());
        let state = docs.state();
        assert!(state.public_feed.items().is_empty());
        assert!(state.last_error.is_some());
        assert!(!state.public_feed.is_loading());
    }

    #[tokio::test]
    async fn failed_mutation_emits_transient_notice() {
        let transport = MockTransport::new();
        transport.push_json(200, json!([doc_json("d1", false, 0)]));
        transport.push_json(500, json!({"detail": "nope"}));

        let api = Arc::new(ApiClient::with_transport(
            Url::parse("https://api.test").unwrap(),
            transport,
        ));
        let notifier = Arc::new(Notifier::new());
        let docs = DocumentsStore::new(
            DocumentService::new(api.clone()),
            SearchService::new(api),
            RequestDeduper::new(),
            notifier.clone(),
        );
        let mut notices = notifier.subscribe();

        docs.load_first_page(DocumentFeed::Public, 20).await.unwrap();
        let _ = docs.toggle_bookmark("d1").await;

        let notice = notices.try_recv().unwrap();
        assert_eq!(notice.level, crate::notify::NoticeLevel::Error);
    }
}
