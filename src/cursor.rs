//! Resumable position tracking for long-running background sweeps.
//!
//! A recurring job walks a growing id space one target at a time (round
//! robin, wrapping at the current maximum), reporting usage inside a date
//! window. The cursor persists its position as a JSON blob in the shared
//! store so a sweep interrupted mid-target resumes where it stopped, and a
//! window change (a new reporting period) restarts the sub-scan without
//! losing the target position.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::Date;

use crate::store::{KvStore, StoreError};

time::serde::format_description!(iso_date, Date, "[year]-[month]-[day]");

/// Date window a sweep reports usage for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageWindow {
    #[serde(with = "iso_date")]
    pub start_date: Date,
    #[serde(with = "iso_date")]
    pub end_date: Date,
}

impl UsageWindow {
    pub fn new(start_date: Date, end_date: Date) -> Self {
        Self {
            start_date,
            end_date,
        }
    }
}

/// Supplies the current maximum target id (the top of the id space the
/// sweep wraps around in). Queried fresh on each cursor construction.
pub trait MaxIdSource {
    fn max_id(&self) -> u64;
}

impl MaxIdSource for u64 {
    fn max_id(&self) -> u64 {
        *self
    }
}

/// Persisted attributes. Field order is the wire order of the blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CursorBlob {
    target_id: u64,
    usage_window: UsageWindow,
    last_used_by_project_id: u64,
    last_usage_count: u64,
}

/// Round-robin sweep position over a growing id space.
///
/// Mutations are in-memory; callers persist explicitly with [`save`]
/// after mutating. The maximum target id is transient: recomputed on each
/// construction, used only to decide wrap-around, never persisted.
///
/// [`save`]: SweepCursor::save
pub struct SweepCursor {
    store: Arc<dyn KvStore>,
    key: String,
    target_id: u64,
    window: UsageWindow,
    last_used_by_project_id: u64,
    last_usage_count: u64,
    max_target_id: u64,
    interrupted: bool,
}

impl std::fmt::Debug for SweepCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SweepCursor")
            .field("key", &self.key)
            .field("target_id", &self.target_id)
            .field("window", &self.window)
            .field("last_used_by_project_id", &self.last_used_by_project_id)
            .field("last_usage_count", &self.last_usage_count)
            .field("max_target_id", &self.max_target_id)
            .field("interrupted", &self.interrupted)
            .finish()
    }
}

impl SweepCursor {
    /// Load the cursor stored under `key`, or start fresh if nothing is
    /// stored. A stored window different from `window` resets the
    /// secondary state (the sub-scan position) while keeping `target_id`.
    pub fn load(
        store: Arc<dyn KvStore>,
        key: impl Into<String>,
        window: UsageWindow,
        targets: &dyn MaxIdSource,
    ) -> Result<Self, StoreError> {
        let key = key.into();
        let stored = match store.get(&key)? {
            Some(raw) => {
                let blob: CursorBlob =
                    serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                        key: key.clone(),
                        reason: e.to_string(),
                    })?;
                Some(blob)
            }
            None => None,
        };

        let (target_id, last_used_by_project_id, last_usage_count) = match stored {
            Some(blob) if blob.usage_window == window => (
                blob.target_id,
                blob.last_used_by_project_id,
                blob.last_usage_count,
            ),
            // New reporting window: keep the scan position, restart the
            // sub-scan.
            Some(blob) => (blob.target_id, 0, 0),
            None => (0, 0, 0),
        };

        Ok(Self {
            store,
            key,
            target_id,
            window,
            last_used_by_project_id,
            last_usage_count,
            max_target_id: targets.max_id(),
            interrupted: false,
        })
    }

    pub fn target_id(&self) -> u64 {
        self.target_id
    }

    /// Point the cursor at a different target. Re-assigning the current
    /// target is a no-op; any other target starts a fresh sub-scan.
    pub fn set_target_id(&mut self, target_id: u64) {
        if self.target_id == target_id {
            return;
        }
        self.target_id = target_id;
        self.reset_secondary();
    }

    /// Move to the next target, wrapping to 0 once at or past the maximum
    /// known target id. Always starts a fresh sub-scan.
    pub fn advance(&mut self) {
        if self.target_id >= self.max_target_id {
            self.target_id = 0;
        } else {
            self.target_id += 1;
        }
        self.reset_secondary();
    }

    /// Record a mid-target resumption point without advancing, and mark
    /// the current pass as unfinished.
    pub fn interrupt(&mut self, last_used_by_project_id: u64, last_usage_count: u64) {
        self.last_used_by_project_id = last_used_by_project_id;
        self.last_usage_count = last_usage_count;
        self.interrupted = true;
    }

    /// Whether this pass stopped before sweeping its target completely.
    pub fn interrupted(&self) -> bool {
        self.interrupted
    }

    pub fn window(&self) -> UsageWindow {
        self.window
    }

    pub fn last_used_by_project_id(&self) -> u64 {
        self.last_used_by_project_id
    }

    pub fn last_usage_count(&self) -> u64 {
        self.last_usage_count
    }

    /// Persist all durable attributes under the cursor's key.
    pub fn save(&self) -> Result<(), StoreError> {
        let blob = CursorBlob {
            target_id: self.target_id,
            usage_window: self.window,
            last_used_by_project_id: self.last_used_by_project_id,
            last_usage_count: self.last_usage_count,
        };
        let raw = serde_json::to_string(&blob).map_err(|e| StoreError::Corrupt {
            key: self.key.clone(),
            reason: e.to_string(),
        })?;
        self.store.put(&self.key, &raw, None)
    }

    fn reset_secondary(&mut self) {
        self.last_used_by_project_id = 0;
        self.last_usage_count = 0;
    }
}
