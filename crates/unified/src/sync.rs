use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::source::SourceKind;

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Syncing,
    Completed,
    CompletedWithErrors,
    Error,
}

/// Outcome of one sync pass against a single source, or the aggregate of
/// several (see [`SyncResult::merge`]).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncResult {
    pub source: SourceKind,
    pub entities_found: usize,
    pub entities_registered: usize,
    pub entities_updated: usize,
    pub entities_removed: usize,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    pub completed_at: DateTime<Utc>,
}

impl SyncResult {
    #[must_use]
    pub fn empty(source: SourceKind) -> Self {
        Self {
            source,
            entities_found: 0,
            entities_registered: 0,
            entities_updated: 0,
            entities_removed: 0,
            duration_ms: 0,
            errors: Vec::new(),
            completed_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn status(&self) -> SyncStatus {
        if self.errors.is_empty() {
            SyncStatus::Completed
        } else {
            SyncStatus::CompletedWithErrors
        }
    }

    /// Fold another source's result into this one. The aggregate keeps the
    /// slowest duration, since parallel syncs overlap in wall time.
    pub fn merge(&mut self, other: &Self) {
        self.entities_found += other.entities_found;
        self.entities_registered += other.entities_registered;
        self.entities_updated += other.entities_updated;
        self.entities_removed += other.entities_removed;
        self.duration_ms = self.duration_ms.max(other.duration_ms);
        self.errors.extend(other.errors.iter().cloned());
        if other.completed_at > self.completed_at {
            self.completed_at = other.completed_at;
        }
    }
}
