//! Optimistic engagement mutations (like / bookmark / follow).
//!
//! Each (entity, action) pair moves through an explicit tagged state:
//! `Idle -> Pending -> Committed | RolledBack`. Toggles issued while a
//! previous one is still pending are accepted (last action wins): every
//! toggle gets a fresh sequence number, and a settling response may only
//! commit or roll back if its sequence is still the latest issued for that
//! pair. A stale response is ignored entirely, so a slow first reply can
//! never overwrite a newer optimistic state.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::models::Document;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Like,
    Bookmark,
    Follow,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationPhase {
    Idle,
    Pending,
    Committed,
    RolledBack,
}

#[derive(Clone, Copy, Debug)]
struct MutationState {
    phase: MutationPhase,
    seq: u64,
}

/// Tracks the mutation state machine per (entity, action).
pub struct EngagementTracker {
    entries: Mutex<HashMap<(String, ActionKind), MutationState>>,
    next_seq: Mutex<u64>,
}

impl EngagementTracker {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_seq: Mutex::new(0),
        }
    }

    /// Record a new pending toggle and return its sequence number.
    pub fn begin(&self, entity_id: &str, action: ActionKind) -> u64 {
        let seq = {
            let mut next = self.next_seq.lock().unwrap_or_else(|p| p.into_inner());
            *next += 1;
            *next
        };
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(
                (entity_id.to_string(), action),
                MutationState {
                    phase: MutationPhase::Pending,
                    seq,
                },
            );
        seq
    }

    /// Commit the mutation if `seq` is still the latest issued for this pair.
    /// Returns false when the response is stale and must be ignored.
    pub fn commit(&self, entity_id: &str, action: ActionKind, seq: u64) -> bool {
        self.settle(entity_id, action, seq, MutationPhase::Committed)
    }

    /// Roll back the mutation if `seq` is still the latest issued.
    pub fn roll_back(&self, entity_id: &str, action: ActionKind, seq: u64) -> bool {
        self.settle(entity_id, action, seq, MutationPhase::RolledBack)
    }

    pub fn phase(&self, entity_id: &str, action: ActionKind) -> MutationPhase {
        self.entries
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(entity_id.to_string(), action))
            .map(|state| state.phase)
            .unwrap_or(MutationPhase::Idle)
    }

    fn settle(&self, entity_id: &str, action: ActionKind, seq: u64, phase: MutationPhase) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match entries.get_mut(&(entity_id.to_string(), action)) {
            Some(state) if state.seq == seq => {
                state.phase = phase;
                true
            }
            _ => {
                log::debug!(
                    "Ignoring stale engagement response for {} ({:?}, seq {})",
                    entity_id,
                    action,
                    seq
                );
                false
            }
        }
    }
}

impl Default for EngagementTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// A patch applied identically to every collection holding a copy of the
/// entity. `like_count` is an absolute server override and wins over the
/// client-side delta when both are set.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EngagementPatch {
    pub is_liked: Option<bool>,
    pub like_delta: i64,
    pub like_count: Option<u64>,
    pub is_bookmarked: Option<bool>,
}

impl EngagementPatch {
    /// Optimistic like toggle: flag plus +-1 on the counter.
    pub fn like(liked: bool) -> Self {
        Self {
            is_liked: Some(liked),
            like_delta: if liked { 1 } else { -1 },
            ..Self::default()
        }
    }

    /// Optimistic bookmark toggle.
    pub fn bookmark(bookmarked: bool) -> Self {
        Self {
            is_bookmarked: Some(bookmarked),
            ..Self::default()
        }
    }

    /// Authoritative server count, applied on commit.
    pub fn server_like_count(count: u64) -> Self {
        Self {
            like_count: Some(count),
            ..Self::default()
        }
    }

    /// Exact inverse of an optimistic patch; applying a patch and then its
    /// inverse restores the original flags and counters.
    pub fn inverse(&self) -> Self {
        Self {
            is_liked: self.is_liked.map(|v| !v),
            like_delta: -self.like_delta,
            like_count: None,
            is_bookmarked: self.is_bookmarked.map(|v| !v),
        }
    }

    pub fn apply(&self, doc: &mut Document) {
        if let Some(liked) = self.is_liked {
            doc.is_liked = liked;
        }
        if self.like_delta != 0 {
            doc.like_count = doc.like_count.saturating_add_signed(self.like_delta);
        }
        if let Some(count) = self.like_count {
            doc.like_count = count;
        }
        if let Some(bookmarked) = self.is_bookmarked {
            doc.is_bookmarked = bookmarked;
        }
    }
}
