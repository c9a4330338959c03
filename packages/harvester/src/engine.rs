//! The batch-processing engine.
//!
//! Partitions each category's listing into checkpointed batches and
//! drives per-item work through the injected collector, skipping work a
//! previous run already finished. Connection-level failures are counted
//! and skipped; anything systemic aborts the batch with enough context
//! for the healing coordinator to build a resume state.
//!
//! Guarantees: at-least-once processing per item (a crash re-runs from
//! the last checkpoint, or from `current_index` within the in-flight
//! batch), made idempotent by the dedup store, with at most one redundant
//! full re-scan of a batch per crash.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::HarvestConfig;
use crate::error::{self, SystemicAbort};
use crate::session::SessionManager;
use crate::state::{BatchManifest, WorkflowState};
use crate::traits::{CheckpointStore, DedupStore, ItemCollector};
use crate::types::{AbortContext, BatchReport, CategoryReport, ConnectionCategory, ItemRef};

/// Edge status written for freshly collected items.
const EDGE_STATUS_COLLECTED: &str = "collected";

pub struct BatchEngine {
    collector: Arc<dyn ItemCollector>,
    dedup: Arc<dyn DedupStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    session: Arc<Mutex<SessionManager>>,
    config: HarvestConfig,
}

impl BatchEngine {
    pub fn new(
        collector: Arc<dyn ItemCollector>,
        dedup: Arc<dyn DedupStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        session: Arc<Mutex<SessionManager>>,
        config: HarvestConfig,
    ) -> Self {
        Self {
            collector,
            dedup,
            checkpoints,
            session,
            config,
        }
    }

    /// Drive the workflow described by `state` to completion.
    ///
    /// Categories run in their fixed declaration order. When
    /// `current_list` is set the run starts at that category (earlier
    /// ones were finished before the heal) and the batch/index cursors
    /// apply to it alone; later categories start from batch 0.
    pub async fn run(&self, state: &WorkflowState) -> Result<BatchReport> {
        state.validate()?;

        let categories: Vec<ConnectionCategory> = match state.current_list {
            Some(resume_at) => ConnectionCategory::ALL
                .into_iter()
                .skip_while(|c| *c != resume_at)
                .collect(),
            None => ConnectionCategory::ALL.to_vec(),
        };

        info!(
            request_id = %state.request_id,
            resuming = state.is_resuming(),
            healing = state.is_healing(),
            categories = categories.len(),
            "engine run starting"
        );

        let mut report = BatchReport::default();
        let mut completed = state.completed_batches.clone();
        for category in categories {
            self.run_category(state, category, &mut report, &mut completed)
                .await?;
        }

        info!(
            request_id = %state.request_id,
            processed = report.processed,
            skipped = report.skipped,
            errors = report.errors,
            "engine run complete"
        );
        Ok(report)
    }

    async fn run_category(
        &self,
        state: &WorkflowState,
        category: ConnectionCategory,
        report: &mut BatchReport,
        completed: &mut BTreeMap<ConnectionCategory, BTreeSet<u32>>,
    ) -> Result<()> {
        let mut manifest = self.load_or_create_manifest(state, category).await?;

        // The durable manifest and the carried state may each know about
        // completions the other missed; the union is always safe.
        if let Some(done) = state.completed_for(category) {
            manifest.completed.extend(done.iter().copied());
        }

        let cursors_apply = state.current_list == Some(category);
        let mut cat_report = CategoryReport::default();

        for batch in manifest.batch_numbers() {
            if manifest.is_complete(batch) {
                debug!(%category, batch, "batch already complete, skipping");
                continue;
            }
            if cursors_apply && batch < state.current_batch {
                debug!(%category, batch, "batch before resume cursor, skipping");
                continue;
            }
            let start_index = if cursors_apply && batch == state.current_batch {
                state.current_index
            } else {
                0
            };

            self.process_batch(
                state,
                &manifest,
                batch,
                start_index,
                &mut cat_report,
                report,
                completed,
            )
            .await?;

            manifest.mark_complete(batch);
            completed.entry(category).or_default().insert(batch);
            // Checkpoint before advancing: a crash after this point loses
            // nothing from the batch just finished.
            self.checkpoints
                .write_manifest(&state.master_index_ref, &manifest)
                .await
                .context("failed to persist batch checkpoint")?;
            debug!(%category, batch, "batch checkpointed");
        }

        report.absorb(category, cat_report);
        Ok(())
    }

    async fn load_or_create_manifest(
        &self,
        state: &WorkflowState,
        category: ConnectionCategory,
    ) -> Result<BatchManifest> {
        if let Some(manifest) = self
            .checkpoints
            .read_manifest(&state.master_index_ref, category)
            .await
            .context("failed to read batch manifest")?
        {
            return Ok(manifest);
        }

        let total = self
            .collector
            .count_items(category)
            .await
            .with_context(|| format!("failed to count {category} items"))?;
        let manifest = BatchManifest::new(category, total, self.config.batch_size);
        self.checkpoints
            .write_manifest(&state.master_index_ref, &manifest)
            .await
            .context("failed to persist new manifest")?;
        info!(%category, total_items = total, batches = manifest.total_batches(), "manifest created");
        Ok(manifest)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_batch(
        &self,
        state: &WorkflowState,
        manifest: &BatchManifest,
        batch: u32,
        start_index: u32,
        cat_report: &mut CategoryReport,
        overall: &BatchReport,
        completed: &BTreeMap<ConnectionCategory, BTreeSet<u32>>,
    ) -> Result<()> {
        let category = manifest.category;
        let abort = |err: anyhow::Error, index: u32, cat: &CategoryReport| -> anyhow::Error {
            SystemicAbort {
                context: AbortContext {
                    category,
                    batch,
                    index,
                    processed_so_far: overall.processed + cat.processed,
                    errors_so_far: overall.errors + cat.errors,
                },
                completed_batches: completed.clone(),
                source: err,
            }
            .into()
        };

        // The shared session must be healthy before the batch starts; a
        // failed rebuild here is as systemic as a mid-item fault.
        if let Err(e) = self.session.lock().await.acquire(true).await {
            return Err(abort(e, start_index, cat_report));
        }

        let len = manifest.batch_len(batch);
        debug!(%category, batch, start_index, items = len, "processing batch");

        for index in start_index..len {
            let item = ItemRef::new(category, batch * manifest.batch_size + index);
            let item_id = item.identity();

            match self.dedup.exists(&state.identity, &item_id).await {
                Ok(true) => {
                    cat_report.skipped += 1;
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    return Err(abort(e.context("dedup lookup failed"), index, cat_report));
                }
            }

            match self.collector.process(&item, state).await {
                Ok(()) => {
                    if let Err(e) = self
                        .dedup
                        .record(&state.identity, &item_id, EDGE_STATUS_COLLECTED)
                        .await
                    {
                        return Err(abort(e.context("edge record failed"), index, cat_report));
                    }
                    cat_report.processed += 1;
                    self.session.lock().await.note_success();
                }
                Err(e) if error::is_connection_level(&e) => {
                    warn!(%category, item = %item_id, error = %e, "connection-level failure, continuing");
                    cat_report.errors += 1;
                    if let Err(recover_err) = self.session.lock().await.record_error(&e).await {
                        return Err(abort(recover_err, index, cat_report));
                    }
                }
                Err(e) => {
                    warn!(%category, batch, index, error = %e, "systemic failure, aborting batch");
                    return Err(abort(e, index, cat_report));
                }
            }
        }

        Ok(())
    }
}
