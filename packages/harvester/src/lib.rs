//! Resumable connection-harvest workflow engine.
//!
//! Drives a long-running, failure-prone enumeration of an account's
//! external-network connections to completion despite crashes, auth
//! challenges, rate limiting, and transient network failures. The pieces:
//!
//! - [`error`] — taxonomy and the classifier deciding heal vs fatal
//! - [`state`] — the workflow state passed by value across restarts
//! - [`session`] — one live automation session per worker, health-checked
//!   and lazily recycled
//! - [`engine`] — checkpointed batch processing over the collector
//! - [`healing`] — snapshot-and-restart recovery via a supervisor queue
//! - [`traits`] — the seams to everything external (collector, stores,
//!   credential resolver, restart mechanism, browser driver)

pub mod config;
pub mod engine;
pub mod error;
pub mod healing;
pub mod session;
pub mod state;
pub mod traits;
pub mod types;

pub use config::HarvestConfig;
pub use engine::BatchEngine;
pub use error::{classify, Classification, ErrorCategory, HarvestError, Severity, SystemicAbort};
pub use healing::{HarvestWorker, HealSupervisor, HealingCoordinator, QueueRestartLauncher};
pub use session::{SessionHealth, SessionManager, SessionState};
pub use state::{
    BatchManifest, HarvestParams, HealOverrides, HealPhase, LastError, ProgressSummary, RunTotals,
    WorkflowState,
};
pub use traits::{
    AutomationDriver, CheckpointStore, CredentialResolver, Credentials, DedupStore, DriverFactory,
    ItemCollector, RestartLauncher,
};
pub use types::{AbortContext, BatchReport, CategoryReport, ConnectionCategory, ItemRef, RunOutcome};
