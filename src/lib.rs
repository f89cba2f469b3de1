#![forbid(unsafe_code)]

pub mod config;
pub mod cursor;
pub mod error;
pub mod import;
pub mod recursion;
pub mod remote;
pub mod store;
pub mod telemetry;
pub mod throttle;

pub use error::{Effect, Error, Transience};
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the pipeline surface at the crate root for convenience
pub use crate::cursor::{MaxIdSource, SweepCursor, UsageWindow};
pub use crate::import::{
    FailureEvent, FailureTracker, ImportError, ImportQueue, ImportState, ImporterRegistry,
    JobWaiter, MemoryProjects, ObjectImportJob, ObjectImporter, ObjectJob, ObjectKind,
    ObjectOutcome, ProjectRecord, ProjectStore, QueueJob, RecordingTracker,
    SingleObjectImporter, Stage, StageJob, StageRunner, StageStatus, WaitOutcome, WaiterKey,
};
pub use crate::recursion::{CallChain, RecursionGuard};
pub use crate::remote::{Collection, FetchError, Page, PagedSource, Paginator};
pub use crate::store::{KvStore, MemoryStore, StoreError};
pub use crate::throttle::{CallerSource, NO_LIMIT, RateLimiter, ThrottleRules, ThrottleScope};
