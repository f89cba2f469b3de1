//! Shared key-value store abstraction.
//!
//! Every multi-worker coordination primitive in this crate (counters,
//! recursion sets, cursor blobs, waiter signal lists) lives behind this
//! trait. All read-modify-write sequences are single trait calls so an
//! implementation can map them onto the store's native atomic primitives
//! instead of separate round trips.

use std::time::Duration;

use thiserror::Error;

use crate::error::{Effect, Transience};

mod memory;

pub use memory::MemoryStore;

/// Canonical error enum for the store capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum StoreError {
    #[error("store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("stored value at `{key}` is not usable: {reason}")]
    WrongKind { key: String, reason: String },

    #[error("stored value at `{key}` is corrupt: {reason}")]
    Corrupt { key: String, reason: String },
}

impl StoreError {
    pub fn transience(&self) -> Transience {
        match self {
            StoreError::Unavailable { .. } => Transience::Retryable,
            StoreError::WrongKind { .. } | StoreError::Corrupt { .. } => Transience::Permanent,
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            // A timed-out round trip may or may not have landed.
            StoreError::Unavailable { .. } => Effect::Unknown,
            StoreError::WrongKind { .. } | StoreError::Corrupt { .. } => Effect::None,
        }
    }
}

/// Atomic operations over a shared, externally-synchronized store.
///
/// Implementations must make each method atomic with respect to concurrent
/// callers (workers in other threads or processes). TTLs are sliding where
/// the method refreshes them and absolute otherwise, as documented per
/// method.
pub trait KvStore: Send + Sync {
    /// Read a string value. Expired entries read as absent.
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write a string value, replacing any previous kind of value.
    fn put(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<(), StoreError>;

    /// Remove a key. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically increment a counter, creating it with the given TTL on
    /// first increment. Returns the post-increment value. The TTL is set
    /// once at creation; later increments do not extend it.
    fn incr(&self, key: &str, ttl: Duration) -> Result<u64, StoreError>;

    /// Read a counter without incrementing. Absent or expired reads as 0.
    fn read_counter(&self, key: &str) -> Result<u64, StoreError>;

    /// Atomically add a member to a set and refresh the set's TTL
    /// (sliding expiry). Returns the post-add cardinality.
    fn set_add(&self, key: &str, member: &str, ttl: Duration) -> Result<usize, StoreError>;

    /// Membership test. Absent or expired sets contain nothing.
    fn set_contains(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    /// Set cardinality. Absent or expired sets have cardinality 0.
    fn set_len(&self, key: &str) -> Result<usize, StoreError>;

    /// Atomically append a value to a list and refresh the list's TTL
    /// (sliding expiry).
    fn list_push(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically remove and return up to `max` values from the front of
    /// a list. Absent or expired lists yield nothing.
    fn list_take(&self, key: &str, max: usize) -> Result<Vec<String>, StoreError>;
}
