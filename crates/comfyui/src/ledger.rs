//! In-memory job ledger.
//!
//! Maps job id to lifecycle state for one manager session. Entries are
//! appended on submission and only ever move forward:
//! `Queued -> Polling -> {Finished | Failed | TimedOut}`.

use std::collections::HashMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;
use comfybatch_core::types::{JobId, Seed, Timestamp};
use serde::Serialize;

/// Lifecycle state of a tracked job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Polling,
    Finished,
    Failed,
    TimedOut,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed | Self::TimedOut)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Polling => "polling",
            Self::Finished => "finished",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    fn rank(self) -> u8 {
        match self {
            Self::Queued => 0,
            Self::Polling => 1,
            Self::Finished | Self::Failed | Self::TimedOut => 2,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the ledger.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LedgerEntry {
    pub job_id: JobId,
    pub state: JobState,
    /// Seed the job was submitted with, when it came from a batch.
    pub seed: Option<Seed>,
    pub submitted_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Default)]
struct LedgerInner {
    order: Vec<JobId>,
    entries: HashMap<JobId, LedgerEntry>,
}

/// Shared job table. Lock sections are short and never span an `.await`.
#[derive(Debug, Default)]
pub struct JobLedger {
    inner: RwLock<LedgerInner>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `job_id` as [`JobState::Queued`].
    ///
    /// Returns `false` (and changes nothing) if the id is already tracked.
    pub fn record(&self, job_id: &str, seed: Option<Seed>) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.entries.contains_key(job_id) {
            return false;
        }
        let now = Utc::now();
        inner.order.push(job_id.to_string());
        inner.entries.insert(
            job_id.to_string(),
            LedgerEntry {
                job_id: job_id.to_string(),
                state: JobState::Queued,
                seed,
                submitted_at: now,
                updated_at: now,
            },
        );
        true
    }

    /// Move `job_id` forward to `next`.
    ///
    /// Returns the previous state when the transition was applied. Unknown
    /// ids, repeated states, backwards moves and moves out of a terminal
    /// state are ignored and return `None`.
    pub fn transition(&self, job_id: &str, next: JobState) -> Option<JobState> {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let entry = inner.entries.get_mut(job_id)?;
        let current = entry.state;
        if current.is_terminal() || next.rank() <= current.rank() {
            return None;
        }
        entry.state = next;
        entry.updated_at = Utc::now();
        Some(current)
    }

    pub fn state(&self, job_id: &str) -> Option<JobState> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(job_id).map(|e| e.state)
    }

    pub fn get(&self, job_id: &str) -> Option<LedgerEntry> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.entries.get(job_id).cloned()
    }

    /// Snapshot of every entry in submission order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner
            .order
            .iter()
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .order
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
