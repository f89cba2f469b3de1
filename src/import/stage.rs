//! Stage execution for one project's import.

use std::sync::Arc;

use crate::import::project::{ProjectRecord, ProjectStore};
use crate::import::tracker::FailureTracker;
use crate::import::{ImportError, ImportState};

/// One stage of a multi-stage import.
///
/// Implementations carry their own stage-specific payload and do the
/// actual work in [`run`]; lookup, terminal-state short-circuits,
/// heartbeat upkeep, and failure recording live in [`StageRunner`].
///
/// [`run`]: Stage::run
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether a failure of this stage fails the whole import. Defaults
    /// to false: the import continues in a degraded state.
    fn abort_on_failure(&self) -> bool {
        false
    }

    fn run(&self, project: &ProjectRecord) -> Result<(), ImportError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageStatus {
    Completed,
    /// The project is gone or its import is terminal; nothing to do.
    Skipped,
}

#[derive(Clone)]
pub struct StageRunner {
    projects: Arc<dyn ProjectStore>,
    tracker: Arc<dyn FailureTracker>,
}

impl StageRunner {
    pub fn new(projects: Arc<dyn ProjectStore>, tracker: Arc<dyn FailureTracker>) -> Self {
        Self { projects, tracker }
    }

    /// Run `stage` for `project_id`.
    ///
    /// A missing project or a terminally failed/canceled/finished import
    /// skips silently: a stage arriving after the import died is expected
    /// traffic, not an error. Errors from the stage body are recorded and
    /// returned classified, so the hosting queue can requeue retryable
    /// ones.
    pub fn perform(
        &self,
        stage: &dyn Stage,
        project_id: u64,
    ) -> Result<StageStatus, ImportError> {
        let Some(project) = self.projects.find(project_id) else {
            tracing::info!(project_id, stage = stage.name(), "project gone, skipping stage");
            return Ok(StageStatus::Skipped);
        };
        if project.import_state.terminal() {
            tracing::info!(
                project_id,
                stage = stage.name(),
                import_state = project.import_state.as_str(),
                "import is terminal, skipping stage"
            );
            return Ok(StageStatus::Skipped);
        }

        // Keep the watchdog off a legitimately busy import.
        self.projects.refresh_heartbeat(project_id);

        match stage.run(&project) {
            Ok(()) => {
                tracing::debug!(project_id, stage = stage.name(), "stage completed");
                Ok(StageStatus::Completed)
            }
            Err(err) => {
                self.tracker.track(project_id, stage.name(), &err, false);
                if stage.abort_on_failure() {
                    tracing::warn!(
                        project_id,
                        stage = stage.name(),
                        "stage failure aborts the import"
                    );
                    self.projects.set_import_state(project_id, ImportState::Failed);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::import::project::MemoryProjects;
    use crate::import::tracker::RecordingTracker;

    struct TestStage {
        fail: bool,
        abort: bool,
        runs: AtomicUsize,
    }

    impl TestStage {
        fn new(fail: bool, abort: bool) -> Self {
            Self {
                fail,
                abort,
                runs: AtomicUsize::new(0),
            }
        }
    }

    impl Stage for TestStage {
        fn name(&self) -> &'static str {
            "import_pull_requests"
        }

        fn abort_on_failure(&self) -> bool {
            self.abort
        }

        fn run(&self, project: &ProjectRecord) -> Result<(), ImportError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ImportError::Execution {
                    project_id: project.id,
                    reason: "stage blew up".to_string(),
                })
            } else {
                Ok(())
            }
        }
    }

    fn project(id: u64, state: ImportState) -> ProjectRecord {
        ProjectRecord {
            id,
            path: format!("acme/repo-{id}"),
            import_state: state,
        }
    }

    fn runner() -> (Arc<MemoryProjects>, Arc<RecordingTracker>, StageRunner) {
        let projects = Arc::new(MemoryProjects::new());
        let tracker = Arc::new(RecordingTracker::new());
        let runner = StageRunner::new(projects.clone(), tracker.clone());
        (projects, tracker, runner)
    }

    #[test]
    fn missing_project_skips() {
        let (_, tracker, runner) = runner();
        let stage = TestStage::new(false, false);
        assert_eq!(runner.perform(&stage, 999).unwrap(), StageStatus::Skipped);
        assert_eq!(stage.runs.load(Ordering::SeqCst), 0);
        assert!(tracker.events().is_empty());
    }

    #[test]
    fn terminal_import_skips_without_running() {
        let (projects, _, runner) = runner();
        projects.insert(project(1, ImportState::Canceled));
        let stage = TestStage::new(false, false);

        assert_eq!(runner.perform(&stage, 1).unwrap(), StageStatus::Skipped);
        assert_eq!(stage.runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn successful_stage_refreshes_heartbeat() {
        let (projects, tracker, runner) = runner();
        projects.insert(project(1, ImportState::Started));
        let stage = TestStage::new(false, false);

        assert_eq!(runner.perform(&stage, 1).unwrap(), StageStatus::Completed);
        assert_eq!(stage.runs.load(Ordering::SeqCst), 1);
        assert!(projects.heartbeat(1).is_some());
        assert!(tracker.events().is_empty());
    }

    #[test]
    fn failure_is_recorded_and_returned() {
        let (projects, tracker, runner) = runner();
        projects.insert(project(1, ImportState::Started));
        let stage = TestStage::new(true, false);

        let err = runner.perform(&stage, 1).unwrap_err();
        assert!(err.transience().is_retryable());
        assert_eq!(tracker.events().len(), 1);
        assert_eq!(tracker.events()[0].source, "import_pull_requests");
        // Non-fatal by default: the import stays alive.
        assert_eq!(projects.find(1).unwrap().import_state, ImportState::Started);
    }

    #[test]
    fn abort_on_failure_fails_the_import() {
        let (projects, tracker, runner) = runner();
        projects.insert(project(1, ImportState::Started));
        let stage = TestStage::new(true, true);

        runner.perform(&stage, 1).unwrap_err();
        assert_eq!(projects.find(1).unwrap().import_state, ImportState::Failed);
        assert_eq!(tracker.events().len(), 1);
    }
}
