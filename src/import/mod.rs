//! Staged import pipeline.
//!
//! Provides:
//! - `ProjectStore` / `ImportState` - import lifecycle per project
//! - `StageRunner` - one stage of a multi-stage import for one project
//! - `ObjectImporter` - one external object, with per-object isolation
//! - `JobWaiter` - countdown barrier for fire-and-forget jobs
//! - `ImportQueue` - worker pool with bounded retries
//! - `FailureTracker` - structured failure sink

pub mod object;
pub mod project;
pub mod queue;
pub mod stage;
pub mod tracker;
pub mod waiter;

pub use object::{
    ImporterRegistry, ObjectImportJob, ObjectImporter, ObjectJob, ObjectKind, ObjectOutcome,
    SingleObjectImporter,
};
pub use project::{ImportState, MemoryProjects, ProjectRecord, ProjectStore};
pub use queue::{ImportQueue, QueueJob, StageJob};
pub use stage::{Stage, StageRunner, StageStatus};
pub use tracker::{FailureEvent, FailureTracker, RecordingTracker};
pub use waiter::{JobWaiter, WaitOutcome, WaiterKey};

use thiserror::Error;

use crate::error::{Effect, Transience};
use crate::remote::FetchError;
use crate::store::StoreError;

/// Canonical error enum for the import capability.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum ImportError {
    /// The object payload can never import as-is. Recorded, not retried.
    #[error("{field} failed validation: {reason}")]
    Validation { field: String, reason: String },

    #[error("no importer registered for `{kind}` objects")]
    UnknownKind { kind: String },

    /// An importer strategy failed against the domain store.
    #[error("importing into project {project_id} failed: {reason}")]
    Execution { project_id: u64, reason: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ImportError {
    pub fn transience(&self) -> Transience {
        match self {
            ImportError::Validation { .. } | ImportError::UnknownKind { .. } => {
                Transience::Permanent
            }
            ImportError::Execution { .. } => Transience::Retryable,
            ImportError::Fetch(e) => e.transience(),
            ImportError::Store(e) => e.transience(),
        }
    }

    pub fn effect(&self) -> Effect {
        match self {
            ImportError::Validation { .. } | ImportError::UnknownKind { .. } => Effect::None,
            // The strategy may have written part of the object.
            ImportError::Execution { .. } => Effect::Unknown,
            ImportError::Fetch(e) => e.effect(),
            ImportError::Store(e) => e.effect(),
        }
    }
}
