//! Project lookup and import lifecycle state.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Lifecycle of a project's import.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportState {
    NotStarted,
    Started,
    Failed,
    Canceled,
    Finished,
}

impl ImportState {
    /// Terminal states accept no further import work: a failed or
    /// canceled import stays that way, and a finished one must not be
    /// re-run.
    pub fn terminal(self) -> bool {
        matches!(
            self,
            ImportState::Failed | ImportState::Canceled | ImportState::Finished
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ImportState::NotStarted => "not_started",
            ImportState::Started => "started",
            ImportState::Failed => "failed",
            ImportState::Canceled => "canceled",
            ImportState::Finished => "finished",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProjectRecord {
    pub id: u64,
    pub path: String,
    pub import_state: ImportState,
}

/// Persistent domain store for projects, as seen by the pipeline.
///
/// The heartbeat is the liveness marker a stuck-import watchdog consults;
/// stages refresh it before doing work so a long-running but healthy
/// import is not reaped as abandoned.
pub trait ProjectStore: Send + Sync {
    fn find(&self, id: u64) -> Option<ProjectRecord>;
    fn refresh_heartbeat(&self, id: u64);
    fn set_import_state(&self, id: u64, state: ImportState);
}

/// In-memory [`ProjectStore`] for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryProjects {
    records: Mutex<HashMap<u64, ProjectRecord>>,
    heartbeats: Mutex<HashMap<u64, u64>>,
}

impl MemoryProjects {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ProjectRecord) {
        self.records
            .lock()
            .expect("project records lock poisoned")
            .insert(record.id, record);
    }

    /// Last heartbeat in milliseconds since the Unix epoch.
    pub fn heartbeat(&self, id: u64) -> Option<u64> {
        self.heartbeats
            .lock()
            .expect("project heartbeats lock poisoned")
            .get(&id)
            .copied()
    }
}

impl ProjectStore for MemoryProjects {
    fn find(&self, id: u64) -> Option<ProjectRecord> {
        self.records
            .lock()
            .expect("project records lock poisoned")
            .get(&id)
            .cloned()
    }

    fn refresh_heartbeat(&self, id: u64) {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        self.heartbeats
            .lock()
            .expect("project heartbeats lock poisoned")
            .insert(id, now_ms);
    }

    fn set_import_state(&self, id: u64, state: ImportState) {
        if let Some(record) = self
            .records
            .lock()
            .expect("project records lock poisoned")
            .get_mut(&id)
        {
            record.import_state = state;
        }
    }
}
