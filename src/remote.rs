//! Lazy iteration over a remote paginated API.
//!
//! Provides:
//! - `PagedSource` - one remote fetch of a decoded page at an offset
//! - `Paginator` - forward-only page fetcher with derived page numbers
//! - `Collection` - a paginator flattened into a per-item iterator
//!
//! The server's "has next page" metadata is the sole termination
//! condition: once a fetched page reports no successor, no further remote
//! call is made.

use std::collections::VecDeque;

use thiserror::Error;

use crate::error::{Effect, Transience};

/// Canonical error enum for the remote-fetch capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum FetchError {
    #[error("remote fetch failed{}: {reason}", status_suffix(.status))]
    Remote { status: Option<u16>, reason: String },

    #[error("failed to decode page at offset {offset}: {reason}")]
    Decode { offset: u32, reason: String },
}

fn status_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (status {code})"),
        None => String::new(),
    }
}

impl FetchError {
    pub fn transience(&self) -> Transience {
        match self {
            FetchError::Remote { .. } => Transience::Retryable,
            FetchError::Decode { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        // Fetches are reads; a failed one changed nothing here.
        Effect::None
    }
}

/// One decoded batch of items plus pagination metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Offset of the successor page, or `None` when this is the last page.
    pub next_offset: Option<u32>,
}

/// One remote fetch. Implementations decode the transport response into
/// typed items and next-page metadata.
pub trait PagedSource {
    type Item;

    fn fetch_page(&self, offset: u32) -> Result<Page<Self::Item>, FetchError>;
}

/// Forward-only page fetcher over a [`PagedSource`].
pub struct Paginator<'a, S: PagedSource> {
    source: &'a S,
    next_offset: u32,
    pages_fetched: u32,
    has_next: bool,
    fetched_any: bool,
}

impl<'a, S: PagedSource> Paginator<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            next_offset: 0,
            pages_fetched: 0,
            has_next: false,
            fetched_any: false,
        }
    }

    /// True before the first fetch (to allow it) and thereafter whenever
    /// the most recent page reported a successor.
    pub fn has_next_page(&self) -> bool {
        !self.fetched_any || self.has_next
    }

    /// Fetch the next page and return its items, or `None` once the
    /// sequence is exhausted. A fetch error leaves the position unchanged,
    /// so the same page may be retried.
    pub fn next_items(&mut self) -> Option<Result<Vec<S::Item>, FetchError>> {
        if !self.has_next_page() {
            return None;
        }
        match self.source.fetch_page(self.next_offset) {
            Ok(page) => {
                self.fetched_any = true;
                self.pages_fetched += 1;
                match page.next_offset {
                    Some(offset) => {
                        self.next_offset = offset;
                        self.has_next = true;
                    }
                    None => self.has_next = false,
                }
                Some(Ok(page.items))
            }
            Err(err) => Some(Err(err)),
        }
    }

    /// 1-based number of the most recently fetched page; 0 before any
    /// fetch. Derived from offset bookkeeping, not independently stored.
    pub fn current_page(&self) -> u32 {
        self.pages_fetched
    }

    pub fn next_page(&self) -> Option<u32> {
        self.has_next_page().then(|| self.pages_fetched + 1)
    }

    pub fn prev_page(&self) -> Option<u32> {
        (self.pages_fetched > 1).then(|| self.pages_fetched - 1)
    }
}

/// A paginator flattened into a lazy, single-pass item iterator.
///
/// Items already yielded stay yielded if a later fetch fails; the error
/// surfaces in place as an `Err` item.
pub struct Collection<'a, S: PagedSource> {
    paginator: Paginator<'a, S>,
    buffer: VecDeque<S::Item>,
}

impl<'a, S: PagedSource> Collection<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self {
            paginator: Paginator::new(source),
            buffer: VecDeque::new(),
        }
    }

    pub fn paginator(&self) -> &Paginator<'a, S> {
        &self.paginator
    }
}

impl<'a, S: PagedSource> Iterator for Collection<'a, S> {
    type Item = Result<S::Item, FetchError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.buffer.pop_front() {
                return Some(Ok(item));
            }
            match self.paginator.next_items()? {
                Ok(items) => self.buffer.extend(items),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}
