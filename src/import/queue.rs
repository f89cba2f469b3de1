//! In-process import queue with bounded retries.
//!
//! A pool of named worker threads drains a shared channel of jobs. A job
//! failing with a retryable (or unknown) error is re-enqueued after a
//! jittered backoff, up to a bounded attempt count; exhaustion records a
//! final failure with `fail_import` and terminates the project's import
//! rather than leaving it stuck.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender};
use rand::Rng;

use crate::error::Transience;
use crate::import::project::{ImportState, ProjectStore};
use crate::import::stage::{Stage, StageRunner};
use crate::import::tracker::FailureTracker;
use crate::import::waiter::{JobWaiter, WaiterKey};
use crate::import::ImportError;

/// A unit of queued work. Retried runs see the same job value, so `run`
/// must be idempotent at the job level.
pub trait QueueJob: Send + Sync + 'static {
    fn project_id(&self) -> u64;

    /// Identity recorded with failures (stage or importer name).
    fn source(&self) -> &'static str;

    fn run(&self) -> Result<(), ImportError>;
}

/// "Run stage S for project P", queueable.
///
/// When a notify key is attached, the stage signals it with its own job id
/// once the stage ran (or was skipped), letting an orchestrator chain
/// stages behind a waiter.
pub struct StageJob {
    pub job_id: String,
    pub project_id: u64,
    pub stage: Arc<dyn Stage>,
    runner: StageRunner,
    notify: Option<(JobWaiter, WaiterKey)>,
}

impl StageJob {
    pub fn new(
        project_id: u64,
        stage: Arc<dyn Stage>,
        runner: StageRunner,
        notify: Option<(JobWaiter, WaiterKey)>,
    ) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            project_id,
            stage,
            runner,
            notify,
        }
    }
}

impl QueueJob for StageJob {
    fn project_id(&self) -> u64 {
        self.project_id
    }

    fn source(&self) -> &'static str {
        self.stage.name()
    }

    fn run(&self) -> Result<(), ImportError> {
        self.runner.perform(self.stage.as_ref(), self.project_id)?;
        if let Some((waiter, key)) = &self.notify {
            waiter.notify(key, &self.job_id);
        }
        Ok(())
    }
}

enum Command {
    Job(QueuedJob),
    Shutdown,
}

struct QueuedJob {
    job: Arc<dyn QueueJob>,
    attempt: u32,
}

/// Shared worker-pool queue. Dropping the handle without [`shutdown`]
/// leaves workers parked on the channel.
///
/// [`shutdown`]: ImportQueue::shutdown
pub struct ImportQueue {
    tx: Sender<Command>,
    handles: Vec<JoinHandle<()>>,
}

struct WorkerContext {
    rx: Receiver<Command>,
    tx: Sender<Command>,
    projects: Arc<dyn ProjectStore>,
    tracker: Arc<dyn FailureTracker>,
    max_attempts: u32,
    retry_base_delay: Duration,
}

impl ImportQueue {
    pub fn start(
        projects: Arc<dyn ProjectStore>,
        tracker: Arc<dyn FailureTracker>,
        workers: usize,
        max_attempts: u32,
        retry_base_delay: Duration,
    ) -> Self {
        let (tx, rx) = crossbeam::channel::unbounded();
        let handles = (0..workers.max(1))
            .map(|i| {
                let ctx = WorkerContext {
                    rx: rx.clone(),
                    tx: tx.clone(),
                    projects: projects.clone(),
                    tracker: tracker.clone(),
                    max_attempts: max_attempts.max(1),
                    retry_base_delay,
                };
                thread::Builder::new()
                    .name(format!("ferry-import-{i}"))
                    .spawn(move || run_worker_loop(ctx))
                    .expect("spawn import worker")
            })
            .collect();
        Self { tx, handles }
    }

    pub fn start_with_limits(
        projects: Arc<dyn ProjectStore>,
        tracker: Arc<dyn FailureTracker>,
        limits: &crate::config::Limits,
    ) -> Self {
        Self::start(
            projects,
            tracker,
            limits.queue_workers,
            limits.max_job_attempts,
            Duration::from_millis(limits.retry_base_delay_ms),
        )
    }

    pub fn enqueue(&self, job: Arc<dyn QueueJob>) -> Result<(), ()> {
        self.tx
            .send(Command::Job(QueuedJob { job, attempt: 1 }))
            .map_err(|_| ())
    }

    /// Stop the workers after the jobs already picked up finish. Pending
    /// retries scheduled but not yet re-enqueued are dropped.
    pub fn shutdown(self) {
        for _ in &self.handles {
            let _ = self.tx.send(Command::Shutdown);
        }
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

fn run_worker_loop(ctx: WorkerContext) {
    while let Ok(cmd) = ctx.rx.recv() {
        match cmd {
            Command::Job(queued) => execute(&ctx, queued),
            Command::Shutdown => break,
        }
    }
}

fn execute(ctx: &WorkerContext, queued: QueuedJob) {
    let project_id = queued.job.project_id();
    let source = queued.job.source();
    match queued.job.run() {
        Ok(()) => {
            tracing::debug!(project_id, source, attempt = queued.attempt, "job finished");
        }
        Err(err)
            if err.transience() != Transience::Permanent && queued.attempt < ctx.max_attempts =>
        {
            let delay = retry_delay(ctx.retry_base_delay, queued.attempt);
            tracing::info!(
                project_id,
                source,
                attempt = queued.attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "job failed, retrying"
            );
            let tx = ctx.tx.clone();
            let next = QueuedJob {
                job: queued.job,
                attempt: queued.attempt + 1,
            };
            // Timer thread, so the backoff never stalls the worker.
            thread::spawn(move || {
                thread::sleep(delay);
                // Ignore send errors - the queue may have shut down
                let _ = tx.send(Command::Job(next));
            });
        }
        Err(err) => {
            tracing::warn!(
                project_id,
                source,
                attempt = queued.attempt,
                error = %err,
                "job failed terminally, failing the import"
            );
            ctx.tracker.track(project_id, source, &err, true);
            ctx.projects.set_import_state(project_id, ImportState::Failed);
        }
    }
}

/// Exponential backoff from `base`, with up to half a base of jitter to
/// spread synchronized retries.
fn retry_delay(base: Duration, attempt: u32) -> Duration {
    let backoff = base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)));
    let jitter_cap = (base.as_millis() as u64 / 2).max(1);
    let jitter = rand::rng().random_range(0..jitter_cap);
    backoff + Duration::from_millis(jitter)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use super::*;
    use crate::import::project::{MemoryProjects, ProjectRecord};
    use crate::import::tracker::RecordingTracker;

    struct ScriptedJob {
        project_id: u64,
        fail_first: usize,
        permanent: bool,
        runs: AtomicUsize,
    }

    impl ScriptedJob {
        fn new(project_id: u64, fail_first: usize, permanent: bool) -> Self {
            Self {
                project_id,
                fail_first,
                permanent,
                runs: AtomicUsize::new(0),
            }
        }
    }

    impl QueueJob for ScriptedJob {
        fn project_id(&self) -> u64 {
            self.project_id
        }

        fn source(&self) -> &'static str {
            "scripted"
        }

        fn run(&self) -> Result<(), ImportError> {
            let run = self.runs.fetch_add(1, Ordering::SeqCst);
            if run < self.fail_first {
                if self.permanent {
                    Err(ImportError::Validation {
                        field: "payload".to_string(),
                        reason: "never valid".to_string(),
                    })
                } else {
                    Err(ImportError::Execution {
                        project_id: self.project_id,
                        reason: "transient".to_string(),
                    })
                }
            } else {
                Ok(())
            }
        }
    }

    fn harness() -> (Arc<MemoryProjects>, Arc<RecordingTracker>, ImportQueue) {
        let projects = Arc::new(MemoryProjects::new());
        projects.insert(ProjectRecord {
            id: 1,
            path: "acme/widget".to_string(),
            import_state: ImportState::Started,
        });
        let tracker = Arc::new(RecordingTracker::new());
        let queue = ImportQueue::start(
            projects.clone(),
            tracker.clone(),
            2,
            3,
            Duration::from_millis(5),
        );
        (projects, tracker, queue)
    }

    fn wait_for_runs(job: &ScriptedJob, want: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if job.runs.load(Ordering::SeqCst) >= want {
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
        panic!(
            "job ran {} times, wanted {want}",
            job.runs.load(Ordering::SeqCst)
        );
    }

    #[test]
    fn transient_failures_are_retried_until_success() {
        let (projects, tracker, queue) = harness();
        let job = Arc::new(ScriptedJob::new(1, 2, false));

        queue.enqueue(job.clone()).unwrap();
        wait_for_runs(&job, 3);
        queue.shutdown();

        assert!(tracker.fatal_events().is_empty());
        assert_eq!(projects.find(1).unwrap().import_state, ImportState::Started);
    }

    #[test]
    fn exhausted_retries_fail_the_import() {
        let (projects, tracker, queue) = harness();
        let job = Arc::new(ScriptedJob::new(1, usize::MAX, false));

        queue.enqueue(job.clone()).unwrap();
        wait_for_runs(&job, 3);

        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && tracker.fatal_events().is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        queue.shutdown();

        assert_eq!(job.runs.load(Ordering::SeqCst), 3);
        assert_eq!(tracker.fatal_events().len(), 1);
        assert_eq!(projects.find(1).unwrap().import_state, ImportState::Failed);
    }

    #[test]
    fn permanent_failures_are_not_retried() {
        let (projects, tracker, queue) = harness();
        let job = Arc::new(ScriptedJob::new(1, usize::MAX, true));

        queue.enqueue(job.clone()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline && tracker.fatal_events().is_empty() {
            thread::sleep(Duration::from_millis(5));
        }
        queue.shutdown();

        assert_eq!(job.runs.load(Ordering::SeqCst), 1);
        assert_eq!(tracker.fatal_events().len(), 1);
        assert_eq!(projects.find(1).unwrap().import_state, ImportState::Failed);
    }
}
