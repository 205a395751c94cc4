//! Offset/limit pagination state for a single feed collection.
//!
//! Every load hands out a [`LoadTicket`] carrying the collection's epoch at
//! the time the load started. Applying a page checks the ticket: if the
//! collection was refreshed or reset while the request was in flight, the
//! late page is discarded instead of clobbering newer state.

use crate::error::StoreError;

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Proof that a load was started against a particular epoch of a collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket(u64);

/// A paginated, ordered collection in server order.
///
/// `has_more` is true iff the most recently applied page was exactly `limit`
/// items; `offset` only advances by confirmed page sizes.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedCollection<T> {
    items: Vec<T>,
    offset: usize,
    limit: usize,
    has_more: bool,
    loading: bool,
    epoch: u64,
}

impl<T> FeedCollection<T> {
    pub fn new(limit: usize) -> Self {
        Self {
            items: Vec::new(),
            offset: 0,
            limit: limit.max(1),
            has_more: true,
            loading: false,
            epoch: 0,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn items_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.items.iter_mut()
    }

    /// Start a first-page load. Bumps the epoch so any older in-flight load
    /// (first page or next page) settles as stale.
    pub fn begin_refresh(&mut self, limit: usize) -> LoadTicket {
        self.limit = limit.max(1);
        self.epoch += 1;
        self.loading = true;
        LoadTicket(self.epoch)
    }

    /// Start a next-page load. Fails when the feed is exhausted or a load is
    /// already running for this collection.
    pub fn begin_next_page(&mut self) -> Result<LoadTicket, StoreError> {
        if !self.has_more {
            return Err(StoreError::precondition("no more pages to load"));
        }
        if self.loading {
            return Err(StoreError::precondition("a page load is already in progress"));
        }
        self.loading = true;
        Ok(LoadTicket(self.epoch))
    }

    /// Replace the collection with the first page. Returns false when the
    /// ticket is stale and the page was discarded.
    pub fn apply_first_page(&mut self, ticket: LoadTicket, items: Vec<T>) -> bool {
        if !self.accept(ticket) {
            return false;
        }
        self.offset = items.len();
        self.has_more = items.len() == self.limit;
        self.items = items;
        self.loading = false;
        true
    }

    /// Append a confirmed next page in server order.
    pub fn apply_next_page(&mut self, ticket: LoadTicket, items: Vec<T>) -> bool {
        if !self.accept(ticket) {
            return false;
        }
        self.offset += items.len();
        self.has_more = items.len() == self.limit;
        self.items.extend(items);
        self.loading = false;
        true
    }

    /// Settle a failed load without touching the data.
    pub fn fail(&mut self, ticket: LoadTicket) {
        if self.accept(ticket) {
            self.loading = false;
        }
    }

    /// Clear the collection and invalidate every in-flight load.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.items.clear();
        self.offset = 0;
        self.has_more = true;
        self.loading = false;
    }

    fn accept(&self, ticket: LoadTicket) -> bool {
        if ticket.0 != self.epoch {
            log::debug!("Discarding stale page load (epoch {} != {})", ticket.0, self.epoch);
            return false;
        }
        true
    }
}

impl<T> Default for FeedCollection<T> {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}
