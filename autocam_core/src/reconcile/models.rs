use crate::models::{Part, Ticket};
use crate::reconcile::traits::ArtifactPut;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStep {
    Artifact,
    Category,
    Part,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step: SyncStep,
    pub message: String,
}

/// What happened to a single work item during a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Every store step succeeded. `artifact` is `None` when the item has no design attachment.
    Synced {
        ticket: Ticket,
        artifact: Option<ArtifactPut>,
        part: Part,
    },
    /// Valid item, but at least one store step failed.
    Partial {
        ticket: Ticket,
        failures: Vec<StepFailure>,
    },
    /// Item did not pass extraction.
    Skipped { ticket: Ticket, reason: String },
}

impl ItemOutcome {
    pub fn ticket(&self) -> &Ticket {
        match self {
            Self::Synced { ticket, .. }
            | Self::Partial { ticket, .. }
            | Self::Skipped { ticket, .. } => ticket,
        }
    }

    /// Whether this item's ticket protects its rows and artifacts from cleanup.
    pub fn is_retained(&self) -> bool {
        !matches!(self, Self::Skipped { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupSkipReason {
    /// The tracker returned no qualifying items.
    EmptySource,
    /// Items were returned but none of them can anchor a deletion set.
    NoValidItems,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CleanupReport {
    Skipped {
        reason: CleanupSkipReason,
    },
    Applied {
        parts_deleted: u64,
        categories_deleted: u64,
        artifacts_deleted: u64,
        errors: u64,
    },
}

/// Summary of one reconciliation cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleSummary {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Items returned by the tracker.
    pub found: usize,
    /// Valid items whose store steps all succeeded.
    pub processed: usize,
    /// Items rejected by extraction.
    pub skipped: usize,
    /// Valid items with at least one failed store step.
    pub failed: usize,
    pub cleanup: CleanupReport,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub items: Vec<ItemOutcome>,
}
