use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// The fixed set of connection categories a harvest can enumerate.
///
/// Declaration order is the processing order; the engine iterates
/// `ConnectionCategory::ALL` deterministically so resume cursors stay
/// meaningful across restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionCategory {
    Connections,
    Followers,
    Following,
}

impl ConnectionCategory {
    pub const ALL: [ConnectionCategory; 3] = [
        ConnectionCategory::Connections,
        ConnectionCategory::Followers,
        ConnectionCategory::Following,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionCategory::Connections => "connections",
            ConnectionCategory::Followers => "followers",
            ConnectionCategory::Following => "following",
        }
    }
}

impl std::fmt::Display for ConnectionCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single item addressed by its position in a category listing.
///
/// The collector resolves the index to the concrete remote entry; the
/// engine only needs a stable identity for dedup records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    pub category: ConnectionCategory,
    /// Global index within the category listing (not batch-relative).
    pub index: u32,
}

impl ItemRef {
    pub fn new(category: ConnectionCategory, index: u32) -> Self {
        Self { category, index }
    }

    /// Stable identity used for edge/dedup records.
    pub fn identity(&self) -> String {
        format!("{}#{}", self.category, self.index)
    }
}

/// Counters for one category's run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryReport {
    pub processed: u32,
    pub skipped: u32,
    pub errors: u32,
}

impl CategoryReport {
    pub fn total(&self) -> u32 {
        self.processed + self.skipped + self.errors
    }
}

/// Aggregate result of a full engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed: u32,
    pub skipped: u32,
    pub errors: u32,
    pub per_category: BTreeMap<ConnectionCategory, CategoryReport>,
}

impl BatchReport {
    pub fn absorb(&mut self, category: ConnectionCategory, report: CategoryReport) {
        self.processed += report.processed;
        self.skipped += report.skipped;
        self.errors += report.errors;
        self.per_category.insert(category, report);
    }

    pub fn total(&self) -> u32 {
        self.processed + self.skipped + self.errors
    }
}

/// Where processing stood when a systemic failure aborted a batch.
///
/// Folded into the healing state's resume cursors by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortContext {
    pub category: ConnectionCategory,
    pub batch: u32,
    /// Index within the aborted batch, not the global listing.
    pub index: u32,
    pub processed_so_far: u32,
    pub errors_so_far: u32,
}

/// The three terminal outcomes of driving a workflow state.
///
/// Fatal failures are the `Err` side of the surrounding `Result`; this
/// enum only distinguishes "done" from "a new worker is taking over".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(BatchReport),
    Healing { request_id: Uuid },
}
