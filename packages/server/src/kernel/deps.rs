//! Shared dependency container.
//!
//! Everything the controller and routes need, behind trait objects so
//! tests and deployments can swap implementations piecemeal.

use std::sync::Arc;

use tokio::sync::Mutex;

use harvester::{
    CheckpointStore, CredentialResolver, DedupStore, DriverFactory, HarvestConfig, ItemCollector,
    RestartLauncher, SessionHealth, SessionManager,
};

use crate::kernel::credentials::{CachingCredentialResolver, InlineCredentialCache};

#[derive(Clone)]
pub struct ServerDeps {
    pub collector: Arc<dyn ItemCollector>,
    pub dedup: Arc<dyn DedupStore>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    /// Consults the inline cache first, then the configured backend.
    pub resolver: Arc<dyn CredentialResolver>,
    pub launcher: Arc<dyn RestartLauncher>,
    pub driver_factory: Arc<dyn DriverFactory>,
    pub config: HarvestConfig,
    /// Secrets supplied inline with a request, keyed by the state's
    /// `credentials_ref` so healed workers can redeem them.
    pub inline_credentials: Arc<InlineCredentialCache>,
    /// The session of the most recently started worker, for the health
    /// endpoint. Workers own their sessions; this is observation only.
    active_session: Arc<Mutex<Option<Arc<Mutex<SessionManager>>>>>,
}

impl ServerDeps {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        collector: Arc<dyn ItemCollector>,
        dedup: Arc<dyn DedupStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        resolver: Arc<dyn CredentialResolver>,
        launcher: Arc<dyn RestartLauncher>,
        driver_factory: Arc<dyn DriverFactory>,
        config: HarvestConfig,
    ) -> Self {
        let inline_credentials = Arc::new(InlineCredentialCache::new());
        let resolver: Arc<dyn CredentialResolver> = Arc::new(CachingCredentialResolver::new(
            inline_credentials.clone(),
            resolver,
        ));
        Self {
            collector,
            dedup,
            checkpoints,
            resolver,
            launcher,
            driver_factory,
            config,
            inline_credentials,
            active_session: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn set_active_session(&self, session: Arc<Mutex<SessionManager>>) {
        *self.active_session.lock().await = Some(session);
    }

    pub async fn session_health(&self) -> Option<SessionHealth> {
        let slot = self.active_session.lock().await;
        match slot.as_ref() {
            Some(session) => Some(session.lock().await.health_status().await),
            None => None,
        }
    }
}
