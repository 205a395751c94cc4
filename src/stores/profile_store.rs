//! Profile state: the currently viewed profile, its follower/following lists,
//! user search, and the optimistic follow protocol.
//!
//! Fetched profiles go through a small TTL'd LRU cache so navigating back to
//! a recently viewed profile renders immediately without a refetch.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use lru::LruCache;

use crate::dedup::{request_key, RequestDeduper};
use crate::engagement::{ActionKind, EngagementTracker, MutationPhase};
use crate::error::StoreError;
use crate::models::{ProfileUpdate, UploadTicket, UserProfile, UserSummary};
use crate::notify::Notifier;
use crate::pagination::FeedCollection;
use crate::services::profile::ProfileService;
use crate::services::search::SearchService;
use crate::stores::auth_store::AuthStore;

const PROFILE_CACHE_CAPACITY: usize = 256;
const PROFILE_CACHE_TTL_SECONDS: i64 = 300;

const ALLOWED_AVATAR_TYPES: [&str; 4] =
    ["image/jpeg", "image/png", "image/webp", "image/gif"];

struct CachedProfile {
    profile: UserProfile,
    fetched_at: DateTime<Utc>,
}

impl CachedProfile {
    fn is_fresh(&self) -> bool {
        Utc::now() - self.fetched_at < chrono::Duration::seconds(PROFILE_CACHE_TTL_SECONDS)
    }
}

/// The two user lists attached to a profile page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowList {
    Followers,
    Following,
}

impl FollowList {
    fn key(&self) -> &'static str {
        match self {
            FollowList::Followers => "followers",
            FollowList::Following => "following",
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ProfileState {
    /// The profile currently being viewed.
    pub profile: Option<UserProfile>,
    pub followers: FeedCollection<UserSummary>,
    pub following: FeedCollection<UserSummary>,
    pub search_results: Vec<UserSummary>,
    pub last_error: Option<String>,
}

impl ProfileState {
    fn list_mut(&mut self, list: FollowList) -> &mut FeedCollection<UserSummary> {
        match list {
            FollowList::Followers => &mut self.followers,
            FollowList::Following => &mut self.following,
        }
    }

    /// Flip the follow flag on every copy of the user this state holds.
    ///
    /// Owner summaries embedded in document feeds live in the documents
    /// store and are not reached from here; those copies refresh together
    /// with their feed.
    fn apply_follow(&mut self, user_id: &str, following: bool, follower_delta: i64) {
        if let Some(profile) = self.profile.as_mut() {
            if profile.user_id == user_id {
                profile.is_following = following;
                profile.follower_count =
                    profile.follower_count.saturating_add_signed(follower_delta);
            }
        }
        for user in self
            .followers
            .items_mut()
            .chain(self.following.items_mut())
            .chain(self.search_results.iter_mut())
        {
            if user.user_id == user_id {
                user.is_following = following;
            }
        }
    }

    /// Current follow flag of a user, from whichever holder has them.
    fn find_following(&self, user_id: &str) -> Option<bool> {
        if let Some(profile) = self.profile.as_ref() {
            if profile.user_id == user_id {
                return Some(profile.is_following);
            }
        }
        self.followers
            .items()
            .iter()
            .chain(self.following.items())
            .chain(self.search_results.iter())
            .find(|user| user.user_id == user_id)
            .map(|user| user.is_following)
    }
}

pub struct ProfileStore {
    service: ProfileService,
    search: SearchService,
    dedup: Arc<RequestDeduper>,
    notifier: Arc<Notifier>,
    /// Profile edits are mirrored into the session user.
    session: Option<Arc<AuthStore>>,
    tracker: EngagementTracker,
    cache: Mutex<LruCache<String, CachedProfile>>,
    state: RwLock<ProfileState>,
}

impl ProfileStore {
    pub fn new(
        service: ProfileService,
        search: SearchService,
        dedup: Arc<RequestDeduper>,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            service,
            search,
            dedup,
            notifier,
            session: None,
            tracker: EngagementTracker::new(),
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(PROFILE_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            )),
            state: RwLock::new(ProfileState::default()),
        }
    }

    pub fn with_session(mut self, session: Arc<AuthStore>) -> Self {
        self.session = Some(session);
        self
    }

    pub fn state(&self) -> ProfileState {
        self.read().clone()
    }

    pub fn follow_phase(&self, user_id: &str) -> MutationPhase {
        self.tracker.phase(user_id, ActionKind::Follow)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, ProfileState> {
        self.state.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, ProfileState> {
        self.state.write().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, LruCache<String, CachedProfile>> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Load a profile into the viewing slot. Served from the cache when a
    /// fresh copy exists; otherwise fetched, deduplicated by user id.
    pub async fn load_profile(&self, user_id: &str) -> Result<UserProfile, StoreError> {
        {
            // Navigating to a different profile drops the old lists.
            let mut state = self.write();
            if state.profile.as_ref().is_some_and(|p| p.user_id != user_id) {
                state.profile = None;
                state.followers.reset();
                state.following.reset();
            }
        }

        let cached = {
            let mut cache = self.lock_cache();
            cache
                .get(user_id)
                .filter(|entry| entry.is_fresh())
                .map(|entry| entry.profile.clone())
        };
        if let Some(profile) = cached {
            log::debug!("Profile cache hit for {}", user_id);
            self.write().profile = Some(profile.clone());
            return Ok(profile);
        }

        let key = request_key("profile/user", &user_id);
        let service = self.service.clone();
        let id = user_id.to_string();
        let result = self
            .dedup
            .run(key, move || async move { service.user_profile(&id).await })
            .await;

        match result {
            Ok(profile) => {
                self.lock_cache().put(
                    user_id.to_string(),
                    CachedProfile {
                        profile: profile.clone(),
                        fetched_at: Utc::now(),
                    },
                );
                let mut state = self.write();
                state.last_error = None;
                state.profile = Some(profile.clone());
                Ok(profile)
            }
            Err(e) => {
                self.write().last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    async fn fetch_list(
        &self,
        list: FollowList,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<UserSummary>, crate::error::ApiError> {
        match list {
            FollowList::Followers => self.service.followers(user_id, limit, offset).await,
            FollowList::Following => self.service.following(user_id, limit, offset).await,
        }
    }

    /// Replace a follow list with its first page. Deduplicated by
    /// (list, user, limit) so rapid identical refreshes share one fetch.
    pub async fn load_list(
        &self,
        list: FollowList,
        user_id: &str,
        limit: usize,
    ) -> Result<(), StoreError> {
        let ticket = self.write().list_mut(list).begin_refresh(limit);

        let key = request_key("profile/list", &(list.key(), user_id, limit));
        let service = self.service.clone();
        let id = user_id.to_string();
        let result = self
            .dedup
            .run(key, move || async move {
                match list {
                    FollowList::Followers => service.followers(&id, limit, 0).await,
                    FollowList::Following => service.following(&id, limit, 0).await,
                }
            })
            .await;

        match result {
            Ok(users) => {
                let mut state = self.write();
                state.last_error = None;
                state.list_mut(list).apply_first_page(ticket, users);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to load {} of {}: {}", list.key(), user_id, e);
                let mut state = self.write();
                state.list_mut(list).fail(ticket);
                state.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Append the next page of a follow list.
    pub async fn load_list_next_page(
        &self,
        list: FollowList,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let (ticket, limit, offset) = {
            let mut state = self.write();
            let collection = state.list_mut(list);
            let ticket = collection.begin_next_page()?;
            (ticket, collection.limit(), collection.offset())
        };

        match self.fetch_list(list, user_id, limit, offset).await {
            Ok(users) => {
                self.write().list_mut(list).apply_next_page(ticket, users);
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to load more {} of {}: {}", list.key(), user_id, e);
                let mut state = self.write();
                state.list_mut(list).fail(ticket);
                state.last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Optimistic follow toggle with rollback. The flag is patched in the
    /// viewed profile, both follow lists and the cache. A user no local
    /// holder knows about (a deep link, say) has their current status
    /// fetched first so the toggle starts from the real direction.
    pub async fn toggle_follow(&self, user_id: &str) -> Result<(), StoreError> {
        let known = self.read().find_following(user_id).or_else(|| {
            self.lock_cache()
                .peek(user_id)
                .map(|entry| entry.profile.is_following)
        });
        let currently_following = match known {
            Some(following) => following,
            None => self.service.follow_status(user_id).await?.is_following,
        };

        let target = !currently_following;
        let delta: i64 = if target { 1 } else { -1 };
        self.patch_follow(user_id, target, delta);
        let seq = self.tracker.begin(user_id, ActionKind::Follow);

        let result = if target {
            self.service.follow(user_id).await
        } else {
            self.service.unfollow(user_id).await
        };

        match result {
            Ok(()) => {
                self.tracker.commit(user_id, ActionKind::Follow, seq);
                Ok(())
            }
            Err(e) => {
                if self.tracker.roll_back(user_id, ActionKind::Follow, seq) {
                    self.patch_follow(user_id, currently_following, -delta);
                }
                self.notifier.error("Failed to update follow");
                Err(e.into())
            }
        }
    }

    fn patch_follow(&self, user_id: &str, following: bool, follower_delta: i64) {
        self.write().apply_follow(user_id, following, follower_delta);
        let mut cache = self.lock_cache();
        if let Some(entry) = cache.get_mut(user_id) {
            entry.profile.is_following = following;
            entry.profile.follower_count =
                entry.profile.follower_count.saturating_add_signed(follower_delta);
        }
    }

    /// Persist a profile edit and mirror it into the session user and the
    /// viewed profile when they are the same account.
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<(), StoreError> {
        if update.username.as_deref().is_some_and(|u| u.trim().is_empty()) {
            return Err(StoreError::validation("username cannot be empty"));
        }

        match self.service.update_profile(update).await {
            Ok(()) => {
                if let Some(session) = &self.session {
                    session.update_user(update);
                    let me = session.state().user.map(|user| user.user_id);
                    let mut state = self.write();
                    if let (Some(me), Some(profile)) = (me, state.profile.as_mut()) {
                        if profile.user_id == me {
                            if let Some(username) = &update.username {
                                profile.username = Some(username.clone());
                            }
                            if let Some(full_name) = &update.full_name {
                                profile.full_name = Some(full_name.clone());
                            }
                            if let Some(bio) = &update.bio {
                                profile.bio = Some(bio.clone());
                            }
                            if let Some(profile_url) = &update.profile_url {
                                profile.profile_url = Some(profile_url.clone());
                            }
                        }
                    }
                }
                Ok(())
            }
            Err(e) => {
                self.notifier.error("Failed to save profile");
                Err(e.into())
            }
        }
    }

    /// Presigned avatar upload target. Only image types are accepted; the
    /// request is refused locally before any network traffic.
    pub async fn request_avatar_upload(
        &self,
        content_type: &str,
    ) -> Result<UploadTicket, StoreError> {
        if !ALLOWED_AVATAR_TYPES.contains(&content_type) {
            return Err(StoreError::validation("unsupported avatar format"));
        }
        Ok(self.service.avatar_upload_url(content_type).await?)
    }

    /// Point the account at a finished avatar upload, then refresh the own
    /// profile so the new URL propagates. The refresh is best effort.
    pub async fn commit_avatar(&self, object_key: &str) -> Result<(), StoreError> {
        self.service.commit_avatar(object_key).await?;

        match self.service.my_profile().await {
            Ok(profile) => {
                if let Some(session) = &self.session {
                    session.update_user(&ProfileUpdate {
                        profile_url: profile.profile_url.clone(),
                        ..ProfileUpdate::default()
                    });
                }
                let mut state = self.write();
                if state
                    .profile
                    .as_ref()
                    .is_some_and(|p| p.user_id == profile.user_id)
                {
                    state.profile = Some(profile);
                }
            }
            Err(e) => {
                log::warn!("Avatar committed but profile refresh failed: {}", e);
            }
        }
        Ok(())
    }

    /// User search, deduplicated by query.
    pub async fn search_users(&self, query: &str, limit: usize) -> Result<(), StoreError> {
        let query = query.trim();
        if query.is_empty() {
            self.write().search_results.clear();
            return Ok(());
        }

        let key = request_key("profile/search", &(query, limit));
        let search = self.search.clone();
        let q = query.to_string();
        let result = self
            .dedup
            .run(key, move || async move { search.users(&q, limit, 0).await })
            .await;

        match result {
            Ok(users) => {
                self.write().search_results = users;
                Ok(())
            }
            Err(e) => {
                self.write().last_error = Some(e.to_string());
                Err(e.into())
            }
        }
    }

    /// Drop all held profile data (logout). The cache goes too, since its
    /// entries carry viewer-relative follow flags.
    pub fn reset(&self) {
        self.lock_cache().clear();
        let mut state = self.write();
        state.profile = None;
        state.followers.reset();
        state.following.reset();
        state.search_results.clear();
        state.last_error = None;
    }
}
