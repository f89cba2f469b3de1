//! Single-object import with per-object failure isolation.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::import::project::{ProjectRecord, ProjectStore};
use crate::import::queue::QueueJob;
use crate::import::tracker::FailureTracker;
use crate::import::waiter::{JobWaiter, WaiterKey};
use crate::import::ImportError;

/// Kind of external resource being imported.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    PullRequest,
    Issue,
    Note,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ObjectKind::PullRequest => "pull_request",
            ObjectKind::Issue => "issue",
            ObjectKind::Note => "note",
        }
    }
}

/// Imports one external object of one kind into a project.
pub trait SingleObjectImporter: Send + Sync {
    fn kind(&self) -> ObjectKind;

    fn execute(&self, project: &ProjectRecord, payload: &Value) -> Result<(), ImportError>;
}

/// Explicit kind-to-importer registry.
#[derive(Default)]
pub struct ImporterRegistry {
    importers: HashMap<ObjectKind, Arc<dyn SingleObjectImporter>>,
}

impl ImporterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, importer: Arc<dyn SingleObjectImporter>) {
        self.importers.insert(importer.kind(), importer);
    }

    pub fn get(&self, kind: ObjectKind) -> Option<Arc<dyn SingleObjectImporter>> {
        self.importers.get(&kind).cloned()
    }
}

/// How one object-import invocation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectOutcome {
    Imported,
    /// The project is gone or its import is terminal.
    Skipped,
    /// The payload can never import; recorded, not retried.
    Invalid,
}

/// One dispatched object-import job.
#[derive(Clone, Debug)]
pub struct ObjectJob {
    /// This invocation's own identity, reported to the waiter.
    pub job_id: String,
    pub project_id: u64,
    pub kind: ObjectKind,
    pub payload: Value,
    pub notify_key: WaiterKey,
}

impl ObjectJob {
    pub fn new(project_id: u64, kind: ObjectKind, payload: Value, notify_key: WaiterKey) -> Self {
        Self {
            job_id: Uuid::new_v4().to_string(),
            project_id,
            kind,
            payload,
            notify_key,
        }
    }
}

/// Executes [`ObjectJob`]s.
///
/// The waiter is signaled with the job's own id exactly once per
/// invocation, whatever the outcome: success, skip, or failure. A
/// coordinator counting signals must never hang on a job that
/// short-circuited.
#[derive(Clone)]
pub struct ObjectImporter {
    projects: Arc<dyn ProjectStore>,
    tracker: Arc<dyn FailureTracker>,
    registry: Arc<ImporterRegistry>,
    waiter: JobWaiter,
}

impl ObjectImporter {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        tracker: Arc<dyn FailureTracker>,
        registry: Arc<ImporterRegistry>,
        waiter: JobWaiter,
    ) -> Self {
        Self {
            projects,
            tracker,
            registry,
            waiter,
        }
    }

    pub fn perform(&self, job: &ObjectJob) -> Result<ObjectOutcome, ImportError> {
        let result = self.import(job);
        self.waiter.notify(&job.notify_key, &job.job_id);
        result
    }

    fn import(&self, job: &ObjectJob) -> Result<ObjectOutcome, ImportError> {
        let Some(project) = self.projects.find(job.project_id) else {
            tracing::info!(
                project_id = job.project_id,
                kind = job.kind.as_str(),
                "project gone, skipping object"
            );
            return Ok(ObjectOutcome::Skipped);
        };
        if project.import_state.terminal() {
            tracing::info!(
                project_id = job.project_id,
                kind = job.kind.as_str(),
                import_state = project.import_state.as_str(),
                "import is terminal, skipping object"
            );
            return Ok(ObjectOutcome::Skipped);
        }

        let Some(importer) = self.registry.get(job.kind) else {
            let err = ImportError::UnknownKind {
                kind: job.kind.as_str().to_string(),
            };
            self.tracker.track(job.project_id, job.kind.as_str(), &err, false);
            return Ok(ObjectOutcome::Invalid);
        };

        match importer.execute(&project, &job.payload) {
            Ok(()) => Ok(ObjectOutcome::Imported),
            Err(err @ ImportError::Validation { .. }) => {
                // A permanently-invalid object is recorded and absorbed so
                // it cannot stall the rest of the stage through retries.
                self.tracker.track(job.project_id, job.kind.as_str(), &err, false);
                Ok(ObjectOutcome::Invalid)
            }
            Err(err) => {
                self.tracker.track(job.project_id, job.kind.as_str(), &err, false);
                Err(err)
            }
        }
    }
}

/// [`ObjectJob`] adapted for the import queue.
pub struct ObjectImportJob {
    importer: ObjectImporter,
    job: ObjectJob,
}

impl ObjectImportJob {
    pub fn new(importer: ObjectImporter, job: ObjectJob) -> Self {
        Self { importer, job }
    }
}

impl QueueJob for ObjectImportJob {
    fn project_id(&self) -> u64 {
        self.job.project_id
    }

    fn source(&self) -> &'static str {
        self.job.kind.as_str()
    }

    fn run(&self) -> Result<(), ImportError> {
        self.importer.perform(&self.job).map(|_| ())
    }
}
