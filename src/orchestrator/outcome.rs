//! Result of one refresh cycle (`feed-refresh run --json`)

use refresh_naming::StoreRecord;
use serde::{Deserialize, Serialize};

use super::state::CycleState;

/// Schema identifier for the JSON outcome
pub const OUTCOME_SCHEMA_ID: &str = "feed-refresh/import_outcome@1";

/// Why a cycle did not import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Another cycle holds the bookkeeping lock
    Contention,
    /// The feed digest equals the current store's
    Unchanged,
}

/// Returned by every cycle that does not fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub schema_id: String,

    /// ULID of the cycle, also on every log line of the cycle
    pub cycle_id: String,

    /// `COMMITTED` or `SKIPPED`
    pub state: CycleState,

    /// Wall-clock duration of the download collaborator in milliseconds
    pub download_duration_ms: Option<u64>,

    /// Digest of the downloaded feed, once computed
    pub feed_digest: Option<String>,

    /// Stores dropped by this cycle's garbage collection
    pub deleted: Vec<String>,

    /// Stores that failed to drop and were skipped
    pub deletion_failures: Vec<String>,

    /// Stores kept by the retention policy, plus a newly promoted one
    pub retained: Vec<String>,

    pub skipped: bool,

    pub skip_reason: Option<SkipReason>,

    /// The newly promoted store
    pub store: Option<StoreRecord>,

    /// Wall-clock duration of the transform collaborator in milliseconds
    pub transform_duration_ms: Option<u64>,
}

impl ImportOutcome {
    pub(crate) fn new(cycle_id: String) -> Self {
        Self {
            schema_id: OUTCOME_SCHEMA_ID.to_string(),
            cycle_id,
            state: CycleState::Idle,
            download_duration_ms: None,
            feed_digest: None,
            deleted: Vec::new(),
            deletion_failures: Vec::new(),
            retained: Vec::new(),
            skipped: false,
            skip_reason: None,
            store: None,
            transform_duration_ms: None,
        }
    }

    pub(crate) fn mark_skipped(&mut self, reason: SkipReason) {
        self.state = CycleState::Skipped;
        self.skipped = true;
        self.skip_reason = Some(reason);
    }

    /// One line for humans.
    pub fn human_summary(&self) -> String {
        match (self.skip_reason, &self.store) {
            (Some(SkipReason::Contention), _) => {
                "skipped: another import is already running".to_string()
            }
            (Some(SkipReason::Unchanged), _) => format!(
                "skipped: feed unchanged ({}), deleted {}, retained {}",
                self.feed_digest.as_deref().unwrap_or("?"),
                self.deleted.len(),
                self.retained.len()
            ),
            (None, Some(store)) => format!(
                "imported {} in {} ms, deleted {}, retained {}",
                store.name,
                self.transform_duration_ms.unwrap_or(0),
                self.deleted.len(),
                self.retained.len()
            ),
            (None, None) => format!("cycle ended in state {}", self.state),
        }
    }
}
