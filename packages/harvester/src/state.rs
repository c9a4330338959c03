//! Workflow state: the single source of truth for "where processing is".
//!
//! A `WorkflowState` is passed by value across worker restarts and must be
//! sufficient, alone, to resume processing with no data loss beyond the
//! current in-flight item. States are never mutated in place; every
//! transition goes through a pure constructor that returns a new value.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ErrorCategory, HarvestError};
use crate::types::ConnectionCategory;

/// Identity and secret handle for a fresh request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarvestParams {
    /// The account whose network is being enumerated. Also the owner id
    /// for dedup edges.
    pub identity: String,
    /// Opaque handle to the stored secret. Never logged, never echoed in
    /// responses.
    pub credentials_ref: String,
}

/// Why a healing state was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealPhase {
    /// The browser session is presumed corrupted and must be rebuilt.
    SessionRebuild,
    /// Credentials must be re-applied before processing continues.
    AuthRefresh,
    /// The remote service asked us to slow down; the fresh worker starts
    /// after its own ramp-up delay.
    Backoff,
}

/// Informational record of the failure that triggered the last heal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastError {
    pub category: ErrorCategory,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Counters carried across heals so reporting survives restarts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunTotals {
    pub processed: u32,
    pub skipped: u32,
    pub errors: u32,
}

/// Explicit cursor overrides for a healing transition. Unset fields keep
/// the prior state's values.
#[derive(Debug, Clone, Default)]
pub struct HealOverrides {
    pub current_list: Option<ConnectionCategory>,
    pub current_batch: Option<u32>,
    pub current_index: Option<u32>,
    pub last_error: Option<LastError>,
    pub totals: Option<RunTotals>,
    /// Unioned into the prior state's completed set; completed batches
    /// are never dropped.
    pub completed_batches: Option<BTreeMap<ConnectionCategory, BTreeSet<u32>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowState {
    pub request_id: Uuid,
    pub identity: String,
    pub credentials_ref: String,
    /// Number of heal restarts this state has been through. Strictly
    /// increases by one per heal, never decreases.
    pub recursion_count: u32,
    pub heal_phase: Option<HealPhase>,
    pub heal_reason: Option<String>,
    /// When set, only this category is processed and the resume cursors
    /// below refer to it. Unset means process all categories from the top.
    pub current_list: Option<ConnectionCategory>,
    pub current_batch: u32,
    /// Only meaningful within `current_batch`; reset to 0 when the engine
    /// moves to a new batch.
    pub current_index: u32,
    /// Handle to the per-request manifest namespace in the checkpoint
    /// store.
    pub master_index_ref: String,
    /// Batches already finished, per category. Grows monotonically.
    pub completed_batches: BTreeMap<ConnectionCategory, BTreeSet<u32>>,
    pub last_error: Option<LastError>,
    pub totals: RunTotals,
    pub created_at: DateTime<Utc>,
}

impl WorkflowState {
    /// Fresh state for an inbound request: no heal fields, cursors at
    /// batch 0 / index 0, nothing completed.
    pub fn initial(request_id: Uuid, params: HarvestParams) -> Self {
        Self {
            request_id,
            master_index_ref: format!("manifest:{}:{}", params.identity, request_id),
            identity: params.identity,
            credentials_ref: params.credentials_ref,
            recursion_count: 0,
            heal_phase: None,
            heal_reason: None,
            current_list: None,
            current_batch: 0,
            current_index: 0,
            completed_batches: BTreeMap::new(),
            last_error: None,
            totals: RunTotals::default(),
            created_at: Utc::now(),
        }
    }

    /// Copy of this state for a heal restart: recursion count + 1, heal
    /// phase and reason set, fresh timestamp, cursors overridable. All
    /// other processing fields are preserved unchanged.
    pub fn healing(
        &self,
        phase: HealPhase,
        reason: impl Into<String>,
        overrides: HealOverrides,
    ) -> Self {
        let mut completed_batches = self.completed_batches.clone();
        if let Some(extra) = overrides.completed_batches {
            for (category, batches) in extra {
                completed_batches.entry(category).or_default().extend(batches);
            }
        }
        Self {
            completed_batches,
            recursion_count: self.recursion_count + 1,
            heal_phase: Some(phase),
            heal_reason: Some(reason.into()),
            current_list: overrides.current_list.or(self.current_list),
            current_batch: overrides.current_batch.unwrap_or(self.current_batch),
            current_index: overrides.current_index.unwrap_or(self.current_index),
            last_error: overrides.last_error.or_else(|| self.last_error.clone()),
            totals: overrides.totals.unwrap_or(self.totals),
            created_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Reject states that cannot identify their request or owner. Cursor
    /// fields are unsigned, so the "no negative cursors" invariant holds
    /// by construction.
    pub fn validate(&self) -> Result<(), HarvestError> {
        if self.identity.trim().is_empty() {
            return Err(HarvestError::Validation("identity is required".into()));
        }
        if self.credentials_ref.trim().is_empty() {
            return Err(HarvestError::Validation(
                "credentials reference is required".into(),
            ));
        }
        if self.master_index_ref.trim().is_empty() {
            return Err(HarvestError::Validation(
                "master index reference is required".into(),
            ));
        }
        Ok(())
    }

    pub fn is_healing(&self) -> bool {
        self.heal_phase.is_some()
    }

    /// True when any cursor is non-zero or any batch is already complete:
    /// the engine will skip work rather than start from scratch.
    pub fn is_resuming(&self) -> bool {
        self.current_batch > 0
            || self.current_index > 0
            || self.completed_batches.values().any(|set| !set.is_empty())
    }

    pub fn completed_for(&self, category: ConnectionCategory) -> Option<&BTreeSet<u32>> {
        self.completed_batches.get(&category)
    }

    /// Derived progress figures for reporting. Never used for control
    /// flow; the engine resumes from the cursors, not from percentages.
    pub fn progress_summary(&self, manifests: &[BatchManifest]) -> ProgressSummary {
        let mut total_items: u64 = 0;
        let mut completed_items: u64 = 0;
        for manifest in manifests {
            total_items += u64::from(manifest.total_items);
            let done = self
                .completed_for(manifest.category)
                .map(|set| set.len() as u64)
                .unwrap_or(0);
            completed_items +=
                (done * u64::from(manifest.batch_size)).min(u64::from(manifest.total_items));
        }
        let percent_complete = if total_items == 0 {
            100.0
        } else {
            (completed_items as f64 / total_items as f64) * 100.0
        };
        ProgressSummary {
            total_processed: self.totals.processed,
            total_skipped: self.totals.skipped,
            total_errors: self.totals.errors,
            percent_complete,
        }
    }
}

/// Reporting-only view of how far a request has come.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressSummary {
    pub total_processed: u32,
    pub total_skipped: u32,
    pub total_errors: u32,
    pub percent_complete: f64,
}

/// Per-category partition plan: total item count, fixed batch size, and
/// which batches are already done. Created once per category per request,
/// read on every resume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchManifest {
    pub category: ConnectionCategory,
    pub total_items: u32,
    pub batch_size: u32,
    pub completed: BTreeSet<u32>,
}

impl BatchManifest {
    pub fn new(category: ConnectionCategory, total_items: u32, batch_size: u32) -> Self {
        assert!(batch_size > 0, "batch size must be positive");
        Self {
            category,
            total_items,
            batch_size,
            completed: BTreeSet::new(),
        }
    }

    pub fn total_batches(&self) -> u32 {
        self.total_items.div_ceil(self.batch_size)
    }

    pub fn batch_numbers(&self) -> std::ops::Range<u32> {
        0..self.total_batches()
    }

    /// Number of items in batch `n` (the last batch may be short).
    pub fn batch_len(&self, n: u32) -> u32 {
        let start = n * self.batch_size;
        self.total_items.saturating_sub(start).min(self.batch_size)
    }

    pub fn is_complete(&self, n: u32) -> bool {
        self.completed.contains(&n)
    }

    pub fn mark_complete(&mut self, n: u32) {
        debug_assert!(n < self.total_batches());
        self.completed.insert(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HarvestParams {
        HarvestParams {
            identity: "acct-123".to_string(),
            credentials_ref: "secret/acct-123".to_string(),
        }
    }

    fn fresh() -> WorkflowState {
        WorkflowState::initial(Uuid::new_v4(), params())
    }

    #[test]
    fn initial_state_is_neither_healing_nor_resuming() {
        let state = fresh();
        assert_eq!(state.recursion_count, 0);
        assert!(!state.is_healing());
        assert!(!state.is_resuming());
        assert!(state.validate().is_ok());
    }

    #[test]
    fn healing_increments_recursion_exactly_once() {
        let state = fresh();
        let healed = state.healing(HealPhase::SessionRebuild, "driver fault", HealOverrides::default());
        assert!(healed.is_healing());
        assert_eq!(healed.recursion_count, state.recursion_count + 1);
        assert_eq!(healed.heal_phase, Some(HealPhase::SessionRebuild));
        assert_eq!(healed.heal_reason.as_deref(), Some("driver fault"));

        let healed_again =
            healed.healing(HealPhase::Backoff, "rate limited", HealOverrides::default());
        assert_eq!(healed_again.recursion_count, 2);
    }

    #[test]
    fn healing_preserves_progress_unless_overridden() {
        let mut state = fresh();
        state
            .completed_batches
            .entry(ConnectionCategory::Followers)
            .or_default()
            .insert(0);
        state.current_list = Some(ConnectionCategory::Followers);
        state.current_batch = 1;
        state.current_index = 45;

        let healed = state.healing(HealPhase::SessionRebuild, "x", HealOverrides::default());
        assert_eq!(healed.current_list, Some(ConnectionCategory::Followers));
        assert_eq!(healed.current_batch, 1);
        assert_eq!(healed.current_index, 45);
        assert_eq!(healed.completed_batches, state.completed_batches);
        assert_eq!(healed.identity, state.identity);
        assert_eq!(healed.request_id, state.request_id);

        let overridden = state.healing(
            HealPhase::SessionRebuild,
            "x",
            HealOverrides {
                current_batch: Some(2),
                current_index: Some(0),
                ..Default::default()
            },
        );
        assert_eq!(overridden.current_batch, 2);
        assert_eq!(overridden.current_index, 0);
        assert!(overridden.is_resuming());
    }

    #[test]
    fn validate_rejects_missing_identity_fields() {
        let mut state = fresh();
        state.identity = "  ".to_string();
        assert!(matches!(
            state.validate(),
            Err(HarvestError::Validation(_))
        ));

        let mut state = fresh();
        state.credentials_ref = String::new();
        assert!(state.validate().is_err());
    }

    #[test]
    fn resuming_detected_from_cursors_or_completed_batches() {
        let mut state = fresh();
        assert!(!state.is_resuming());
        state.current_index = 7;
        assert!(state.is_resuming());

        let mut state = fresh();
        state
            .completed_batches
            .entry(ConnectionCategory::Connections)
            .or_default()
            .insert(0);
        assert!(state.is_resuming());
    }

    #[test]
    fn manifest_partitions_250_items_into_3_batches() {
        let manifest = BatchManifest::new(ConnectionCategory::Connections, 250, 100);
        assert_eq!(manifest.total_batches(), 3);
        assert_eq!(manifest.batch_len(0), 100);
        assert_eq!(manifest.batch_len(1), 100);
        assert_eq!(manifest.batch_len(2), 50);
        assert_eq!(manifest.batch_numbers().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn progress_summary_derives_percentage_from_manifests() {
        let mut state = fresh();
        state
            .completed_batches
            .entry(ConnectionCategory::Connections)
            .or_default()
            .extend([0, 1]);
        state.totals = RunTotals {
            processed: 180,
            skipped: 15,
            errors: 5,
        };

        let manifest = BatchManifest::new(ConnectionCategory::Connections, 400, 100);
        let summary = state.progress_summary(&[manifest]);
        assert_eq!(summary.total_processed, 180);
        assert_eq!(summary.total_skipped, 15);
        assert_eq!(summary.total_errors, 5);
        assert!((summary.percent_complete - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn state_round_trips_through_json() {
        let mut state = fresh();
        state.current_list = Some(ConnectionCategory::Following);
        state
            .completed_batches
            .entry(ConnectionCategory::Following)
            .or_default()
            .insert(3);
        let json = serde_json::to_string(&state).unwrap();
        let back: WorkflowState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
    }
}
