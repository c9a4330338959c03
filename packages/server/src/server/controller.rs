//! The request controller.
//!
//! Per-request state machine: `validating → (fresh | resuming) → running
//! → {completed | healing | fatal}`. The controller also implements
//! `HarvestWorker`, so the heal supervisor relaunches interrupted
//! requests through the exact same run path — with a brand-new session.

use std::sync::Arc;

use anyhow::Result;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use harvester::{
    classify, BatchEngine, BatchReport, Credentials, ErrorCategory, HarvestParams, HarvestWorker,
    HealingCoordinator, RunOutcome, SessionManager, WorkflowState,
};

use crate::kernel::ServerDeps;

/// Inbound request body. Either the plaintext secret or a ciphertext
/// reference must be present alongside the identity.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarvestRequest {
    pub identity: Option<String>,
    pub secret: Option<String>,
    pub ciphertext_ref: Option<String>,
}

/// Controller verdict, mapped onto HTTP statuses by the route layer.
#[derive(Debug)]
pub enum HarvestResponse {
    Success {
        request_id: Uuid,
        data: BatchReport,
    },
    Healing {
        request_id: Uuid,
    },
    Invalid {
        message: String,
    },
    Fatal {
        request_id: Uuid,
        category: ErrorCategory,
        message: &'static str,
    },
}

pub struct RequestController {
    deps: ServerDeps,
}

impl RequestController {
    pub fn new(deps: ServerDeps) -> Self {
        Self { deps }
    }

    /// Handle one inbound request end to end.
    pub async fn handle(&self, request: HarvestRequest) -> HarvestResponse {
        let request_id = Uuid::new_v4();

        let params = match self.validate(request, request_id).await {
            Ok(params) => params,
            Err(message) => {
                warn!(request_id = %request_id, %message, "request rejected");
                return HarvestResponse::Invalid { message };
            }
        };

        let state = WorkflowState::initial(request_id, params);
        info!(request_id = %request_id, "request accepted, starting workflow");

        match self.run_state(state).await {
            Ok(RunOutcome::Completed(data)) => HarvestResponse::Success { request_id, data },
            Ok(RunOutcome::Healing { request_id }) => HarvestResponse::Healing { request_id },
            Err(error) => {
                let classification = classify(&error);
                warn!(
                    request_id = %request_id,
                    category = %classification.category,
                    error = %error,
                    "workflow failed fatally"
                );
                HarvestResponse::Fatal {
                    request_id,
                    category: classification.category,
                    message: classification.user_message,
                }
            }
        }
    }

    /// Presence checks, then credential resolution when only a
    /// ciphertext reference was supplied.
    async fn validate(
        &self,
        request: HarvestRequest,
        request_id: Uuid,
    ) -> Result<HarvestParams, String> {
        let identity = request
            .identity
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        let secret = request
            .secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let ciphertext_ref = request
            .ciphertext_ref
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        if secret.is_none() && ciphertext_ref.is_none() {
            return Err("either secret or ciphertextRef is required".to_string());
        }

        if let Some(secret) = secret {
            let identity = identity.ok_or_else(|| "identity is required".to_string())?;
            // Park the plaintext under the ref so a healed worker can
            // redeem it; the state itself only ever carries the ref.
            let credentials_ref = format!("inline:{request_id}");
            self.deps.inline_credentials.register(
                &credentials_ref,
                Credentials {
                    identity: identity.clone(),
                    secret,
                },
            );
            return Ok(HarvestParams {
                identity,
                credentials_ref,
            });
        }

        // Ciphertext only: the resolver supplies the identity when the
        // body omitted it.
        let ciphertext_ref = ciphertext_ref.expect("checked above");
        let credentials = self
            .deps
            .resolver
            .resolve(&ciphertext_ref)
            .await
            .map_err(|e| format!("credential resolution failed: {e}"))?;
        Ok(HarvestParams {
            identity: identity.unwrap_or(credentials.identity),
            credentials_ref: ciphertext_ref,
        })
    }

    /// One full workflow run: fresh session, engine, heal-or-fail.
    async fn run_state(&self, state: WorkflowState) -> Result<RunOutcome> {
        state.validate()?;

        // Every run (fresh or healed) gets its own session; a session
        // that survived a systemic failure is never trusted again.
        let session = Arc::new(Mutex::new(SessionManager::new(
            self.deps.driver_factory.clone(),
            self.deps.config.clone(),
        )));
        self.deps.set_active_session(session.clone()).await;

        let engine = BatchEngine::new(
            self.deps.collector.clone(),
            self.deps.dedup.clone(),
            self.deps.checkpoints.clone(),
            session.clone(),
            self.deps.config.clone(),
        );

        let result = engine.run(&state).await;
        session.lock().await.close().await;

        let outcome = match result {
            Ok(report) => Ok(RunOutcome::Completed(report)),
            Err(error) => {
                let coordinator =
                    HealingCoordinator::new(self.deps.launcher.clone(), &self.deps.config);
                coordinator.handle_failure(&state, error).await
            }
        };
        // Inline secrets outlive the run only while a heal is pending.
        if !matches!(outcome, Ok(RunOutcome::Healing { .. })) {
            self.deps.inline_credentials.evict(&state.credentials_ref);
        }
        outcome
    }
}

#[async_trait::async_trait]
impl HarvestWorker for RequestController {
    async fn run(&self, state: WorkflowState) -> Result<RunOutcome> {
        info!(
            request_id = %state.request_id,
            recursion_count = state.recursion_count,
            resuming = state.is_resuming(),
            "worker run starting"
        );
        self.run_state(state).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{
        DevCollector, DevDriverFactory, InMemoryCheckpointStore, InMemoryDedupStore,
        StaticCredentialResolver,
    };
    use async_trait::async_trait;
    use harvester::{
        ConnectionCategory, HarvestConfig, HealSupervisor, ItemCollector, ItemRef, RestartLauncher,
    };
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingLauncher {
        launched: StdMutex<Vec<WorkflowState>>,
    }

    #[async_trait]
    impl RestartLauncher for RecordingLauncher {
        async fn launch(&self, state: WorkflowState) -> Result<()> {
            self.launched.lock().unwrap().push(state);
            Ok(())
        }
    }

    fn deps_with(
        collector: Arc<dyn ItemCollector>,
        launcher: Arc<dyn RestartLauncher>,
    ) -> ServerDeps {
        ServerDeps::new(
            collector,
            Arc::new(InMemoryDedupStore::new()),
            Arc::new(InMemoryCheckpointStore::new()),
            Arc::new(StaticCredentialResolver),
            launcher,
            Arc::new(DevDriverFactory),
            HarvestConfig::default().with_batch_size(100),
        )
    }

    fn valid_request() -> HarvestRequest {
        HarvestRequest {
            identity: Some("acct-1".to_string()),
            secret: Some("hunter2".to_string()),
            ciphertext_ref: None,
        }
    }

    #[tokio::test]
    async fn missing_identity_is_rejected() {
        let controller = RequestController::new(deps_with(
            Arc::new(DevCollector::new(0)),
            Arc::new(RecordingLauncher::default()),
        ));
        let response = controller
            .handle(HarvestRequest {
                identity: None,
                secret: Some("hunter2".to_string()),
                ciphertext_ref: None,
            })
            .await;
        assert!(matches!(response, HarvestResponse::Invalid { .. }));
    }

    #[tokio::test]
    async fn missing_credentials_are_rejected() {
        let controller = RequestController::new(deps_with(
            Arc::new(DevCollector::new(0)),
            Arc::new(RecordingLauncher::default()),
        ));
        let response = controller
            .handle(HarvestRequest {
                identity: Some("acct-1".to_string()),
                secret: Some("   ".to_string()),
                ciphertext_ref: None,
            })
            .await;
        assert!(matches!(response, HarvestResponse::Invalid { .. }));
    }

    #[tokio::test]
    async fn ciphertext_reference_is_resolved_for_identity() {
        let controller = RequestController::new(deps_with(
            Arc::new(DevCollector::new(0)),
            Arc::new(RecordingLauncher::default()),
        ));
        let response = controller
            .handle(HarvestRequest {
                identity: None,
                secret: None,
                ciphertext_ref: Some("vault/acct-1".to_string()),
            })
            .await;
        // Empty listings complete immediately; the point is that the
        // resolver supplied the identity.
        assert!(matches!(response, HarvestResponse::Success { .. }));
    }

    #[tokio::test]
    async fn full_run_reports_all_items() {
        let mut totals = HashMap::new();
        totals.insert(ConnectionCategory::Connections, 250u32);
        let controller = RequestController::new(deps_with(
            Arc::new(DevCollector::with_totals(totals)),
            Arc::new(RecordingLauncher::default()),
        ));

        let response = controller.handle(valid_request()).await;
        match response {
            HarvestResponse::Success { data, .. } => {
                assert_eq!(data.processed + data.skipped + data.errors, 250);
                assert_eq!(data.processed, 250);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    /// Fails systemically on the first item until told to behave.
    struct FlakyCollector {
        healthy: AtomicBool,
        total: u32,
    }

    #[async_trait]
    impl ItemCollector for FlakyCollector {
        async fn count_items(&self, category: ConnectionCategory) -> Result<u32> {
            Ok(if category == ConnectionCategory::Connections {
                self.total
            } else {
                0
            })
        }

        async fn process(&self, item: &ItemRef, _state: &WorkflowState) -> Result<()> {
            if !self.healthy.load(Ordering::SeqCst) && item.index == 5 {
                anyhow::bail!("session closed unexpectedly");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn systemic_failure_yields_healing_response() {
        let launcher = Arc::new(RecordingLauncher::default());
        let collector = Arc::new(FlakyCollector {
            healthy: AtomicBool::new(false),
            total: 10,
        });
        let controller = RequestController::new(deps_with(collector, launcher.clone()));

        let response = controller.handle(valid_request()).await;
        let request_id = match response {
            HarvestResponse::Healing { request_id } => request_id,
            other => panic!("expected healing, got {other:?}"),
        };

        let launched = launcher.launched.lock().unwrap();
        assert_eq!(launched.len(), 1);
        assert_eq!(launched[0].request_id, request_id);
        assert!(launched[0].is_healing());
        assert_eq!(launched[0].current_index, 5);
    }

    #[tokio::test]
    async fn inline_secret_survives_a_heal_via_the_resolver() {
        let launcher = Arc::new(RecordingLauncher::default());
        let collector = Arc::new(FlakyCollector {
            healthy: AtomicBool::new(false),
            total: 10,
        });
        let deps = deps_with(collector, launcher.clone());
        let controller = RequestController::new(deps.clone());

        let response = controller.handle(valid_request()).await;
        assert!(matches!(response, HarvestResponse::Healing { .. }));

        // The healing state carries only the opaque ref; the resolver
        // must redeem it to the credentials the request supplied.
        let credentials_ref = launcher.launched.lock().unwrap()[0].credentials_ref.clone();
        assert!(credentials_ref.starts_with("inline:"));
        let credentials = deps.resolver.resolve(&credentials_ref).await.unwrap();
        assert_eq!(credentials.identity, "acct-1");
        assert_eq!(credentials.secret, "hunter2");
    }

    #[tokio::test]
    async fn inline_secret_is_evicted_after_completion() {
        let deps = deps_with(
            Arc::new(DevCollector::new(0)),
            Arc::new(RecordingLauncher::default()),
        );
        let controller = RequestController::new(deps.clone());

        let response = controller.handle(valid_request()).await;
        let request_id = match response {
            HarvestResponse::Success { request_id, .. } => request_id,
            other => panic!("expected success, got {other:?}"),
        };

        // The ref now misses the cache and falls through to the backend.
        let credentials = deps
            .resolver
            .resolve(&format!("inline:{request_id}"))
            .await
            .unwrap();
        assert_ne!(credentials.secret, "hunter2");
    }

    #[tokio::test]
    async fn fatal_failure_carries_category_and_user_message() {
        struct BrokenCollector;
        #[async_trait]
        impl ItemCollector for BrokenCollector {
            async fn count_items(&self, _category: ConnectionCategory) -> Result<u32> {
                anyhow::bail!("database constraint violated");
            }
            async fn process(&self, _item: &ItemRef, _state: &WorkflowState) -> Result<()> {
                unreachable!("count already failed");
            }
        }

        let controller = RequestController::new(deps_with(
            Arc::new(BrokenCollector),
            Arc::new(RecordingLauncher::default()),
        ));
        let response = controller.handle(valid_request()).await;
        match response {
            HarvestResponse::Fatal { category, message, .. } => {
                assert_eq!(category, ErrorCategory::Database);
                assert!(message.contains("storage error"));
            }
            other => panic!("expected fatal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn healed_request_resumes_through_the_supervisor() {
        let collector = Arc::new(FlakyCollector {
            healthy: AtomicBool::new(false),
            total: 10,
        });

        let (queue_launcher, rx) = HealSupervisor::channel(4);
        let launcher: Arc<dyn RestartLauncher> = Arc::new(queue_launcher);
        let deps = deps_with(collector.clone(), launcher);
        let controller = Arc::new(RequestController::new(deps));

        let supervisor = HealSupervisor::new(rx, controller.clone());
        tokio::spawn(supervisor.run());

        let response = controller.handle(valid_request()).await;
        assert!(matches!(response, HarvestResponse::Healing { .. }));

        // Let the replacement worker run against a now-healthy collector.
        collector.healthy.store(true, Ordering::SeqCst);
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        // A second identical request dedups nothing (fresh manifest ref),
        // proving the healed worker didn't wedge the shared stores.
        let response = controller.handle(valid_request()).await;
        assert!(matches!(response, HarvestResponse::Success { .. }));
    }
}
