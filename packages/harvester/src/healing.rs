//! Heal-and-restart recovery.
//!
//! Deciding to heal and launching the replacement worker are separate
//! concerns: the `HealingCoordinator` snapshots progress into a healing
//! state and enqueues it; the `HealSupervisor` dequeues and starts a
//! fresh worker for each state. The failed worker's session is presumed
//! corrupted and is never reused — every heal rebuilds the session from
//! scratch in the new worker.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::HarvestConfig;
use crate::error::{classify, ErrorCategory, HarvestError, SystemicAbort};
use crate::state::{HealOverrides, HealPhase, LastError, RunTotals, WorkflowState};
use crate::traits::RestartLauncher;
use crate::types::RunOutcome;

pub struct HealingCoordinator {
    launcher: Arc<dyn RestartLauncher>,
    max_heal_depth: u32,
}

impl HealingCoordinator {
    pub fn new(launcher: Arc<dyn RestartLauncher>, config: &HarvestConfig) -> Self {
        Self {
            launcher,
            max_heal_depth: config.max_heal_depth,
        }
    }

    /// Decide the fate of a systemic failure: heal via restart, or
    /// propagate as fatal.
    ///
    /// Fatal when the classifier marks the error non-recoverable, or when
    /// the state has already been through the maximum number of heals.
    /// Otherwise the abort context is folded into a healing state and
    /// handed to the restart mechanism; the returned `Healing` outcome is
    /// distinguishable from both success and fatal failure.
    pub async fn handle_failure(
        &self,
        state: &WorkflowState,
        error: anyhow::Error,
    ) -> Result<RunOutcome> {
        let classification = classify(&error);
        if !classification.recoverable {
            warn!(
                request_id = %state.request_id,
                category = %classification.category,
                "failure is not recoverable, propagating as fatal"
            );
            return Err(error);
        }

        if state.recursion_count >= self.max_heal_depth {
            error!(
                request_id = %state.request_id,
                recursion_count = state.recursion_count,
                max = self.max_heal_depth,
                "heal depth exhausted, converting to fatal"
            );
            return Err(HarvestError::HealLimitExceeded {
                attempts: state.recursion_count,
            }
            .into());
        }

        let mut overrides = HealOverrides {
            last_error: Some(LastError {
                category: classification.category,
                message: format!("{error:#}"),
                at: Utc::now(),
            }),
            ..Default::default()
        };
        if let Some(abort) = error.downcast_ref::<SystemicAbort>() {
            overrides.current_list = Some(abort.context.category);
            overrides.current_batch = Some(abort.context.batch);
            overrides.current_index = Some(abort.context.index);
            overrides.completed_batches = Some(abort.completed_batches.clone());
            overrides.totals = Some(RunTotals {
                processed: state.totals.processed + abort.context.processed_so_far,
                skipped: state.totals.skipped,
                errors: state.totals.errors + abort.context.errors_so_far,
            });
        }

        let phase = phase_for(classification.category);
        let healing_state = state.healing(phase, error.to_string(), overrides);

        info!(
            request_id = %healing_state.request_id,
            recursion_count = healing_state.recursion_count,
            phase = ?phase,
            batch = healing_state.current_batch,
            index = healing_state.current_index,
            "handing off healing state to a fresh worker"
        );
        let request_id = healing_state.request_id;
        self.launcher.launch(healing_state).await?;

        Ok(RunOutcome::Healing { request_id })
    }
}

fn phase_for(category: ErrorCategory) -> HealPhase {
    match category {
        ErrorCategory::Authentication => HealPhase::AuthRefresh,
        ErrorCategory::RateLimit => HealPhase::Backoff,
        _ => HealPhase::SessionRebuild,
    }
}

/// One full workflow run in a worker: validate, process, heal or fail.
/// Implemented by the request controller; the supervisor only needs this
/// seam.
#[async_trait]
pub trait HarvestWorker: Send + Sync {
    async fn run(&self, state: WorkflowState) -> Result<RunOutcome>;
}

/// Restart mechanism backed by the supervisor's queue.
pub struct QueueRestartLauncher {
    tx: mpsc::Sender<WorkflowState>,
}

#[async_trait]
impl RestartLauncher for QueueRestartLauncher {
    async fn launch(&self, state: WorkflowState) -> Result<()> {
        self.tx
            .send(state)
            .await
            .map_err(|_| anyhow::anyhow!("heal supervisor is not running"))
    }
}

/// Dequeues healing states and launches a fresh worker per state.
pub struct HealSupervisor {
    rx: mpsc::Receiver<WorkflowState>,
    worker: Arc<dyn HarvestWorker>,
}

impl HealSupervisor {
    /// Build the launcher half and the receiver half of the restart
    /// queue.
    pub fn channel(buffer: usize) -> (QueueRestartLauncher, mpsc::Receiver<WorkflowState>) {
        let (tx, rx) = mpsc::channel(buffer);
        (QueueRestartLauncher { tx }, rx)
    }

    pub fn new(rx: mpsc::Receiver<WorkflowState>, worker: Arc<dyn HarvestWorker>) -> Self {
        Self { rx, worker }
    }

    /// Run until the launcher side is dropped. Each dequeued state gets
    /// its own worker task; the supervisor never blocks on a worker.
    pub async fn run(mut self) {
        info!("heal supervisor starting");
        while let Some(state) = self.rx.recv().await {
            let request_id = state.request_id;
            info!(
                request_id = %request_id,
                recursion_count = state.recursion_count,
                "launching replacement worker"
            );
            let worker = self.worker.clone();
            tokio::spawn(async move {
                match worker.run(state).await {
                    Ok(RunOutcome::Completed(report)) => {
                        info!(
                            request_id = %request_id,
                            processed = report.processed,
                            skipped = report.skipped,
                            errors = report.errors,
                            "healed worker completed"
                        );
                    }
                    Ok(RunOutcome::Healing { .. }) => {
                        info!(request_id = %request_id, "healed worker handed off again");
                    }
                    Err(e) => {
                        error!(request_id = %request_id, error = %e, "healed worker failed fatally");
                    }
                }
            });
        }
        info!("heal supervisor stopped");
    }
}
