//! Collaborator seams.
//!
//! The engine is deliberately ignorant of how items are scraped, where
//! edges and manifests live, or how a replacement worker gets started.
//! Everything external is a trait object so tests (and the dev server)
//! can substitute in-memory implementations.

use anyhow::Result;
use async_trait::async_trait;

use crate::state::{BatchManifest, WorkflowState};
use crate::types::{ConnectionCategory, ItemRef};

/// The actual per-connection unit of work. Opaque to the engine: it only
/// cares about success, connection-level failure, or systemic failure.
#[async_trait]
pub trait ItemCollector: Send + Sync {
    /// Total item count for a category, used to build its manifest.
    async fn count_items(&self, category: ConnectionCategory) -> Result<u32>;

    /// Process a single item. Errors mentioning "not found", "private"
    /// or "unavailable" are treated as connection-level and skipped;
    /// anything else aborts the batch.
    async fn process(&self, item: &ItemRef, state: &WorkflowState) -> Result<()>;
}

/// Durable edge store: one record per (owner, item) pair already handled.
#[async_trait]
pub trait DedupStore: Send + Sync {
    async fn exists(&self, owner_id: &str, item_id: &str) -> Result<bool>;
    async fn record(&self, owner_id: &str, item_id: &str, status: &str) -> Result<()>;
}

/// Durable manifest store, keyed by the state's master index reference.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn read_manifest(
        &self,
        master_index_ref: &str,
        category: ConnectionCategory,
    ) -> Result<Option<BatchManifest>>;

    async fn write_manifest(&self, master_index_ref: &str, manifest: &BatchManifest)
        -> Result<()>;
}

/// Resolved plaintext credentials. Held only for the duration of a
/// request, never logged.
#[derive(Clone)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Turns an opaque ciphertext reference into plaintext credentials.
/// Invoked only when plaintext was not supplied directly.
#[async_trait]
pub trait CredentialResolver: Send + Sync {
    async fn resolve(&self, ciphertext_ref: &str) -> Result<Credentials>;
}

/// Fire-and-forget handoff of a healing state to a fresh worker.
#[async_trait]
pub trait RestartLauncher: Send + Sync {
    async fn launch(&self, state: WorkflowState) -> Result<()>;
}

/// A live automation session (browser + page equivalent).
#[async_trait]
pub trait AutomationDriver: Send + Sync {
    /// Whether the underlying transport is still open. Must reflect a
    /// dropped connection immediately.
    fn is_connected(&self) -> bool;

    /// Evaluate a trivial script; the health probe's cheapest liveness
    /// signal.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    async fn navigate(&self, url: &str) -> Result<()>;

    async fn current_url(&self) -> Result<String>;

    /// Whether a security challenge is currently blocking automation.
    async fn challenge_pending(&self) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

/// Launches fresh automation sessions. The session manager owns at most
/// one live driver at a time and recycles it through this factory.
#[async_trait]
pub trait DriverFactory: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn AutomationDriver>>;
}
