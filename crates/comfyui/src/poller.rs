//! Concurrent history polling.
//!
//! Each job is polled on its own tokio task with its own deadline, so a
//! slow or failing job never holds up the others. [`Poller::wait_all`]
//! joins every task before returning and reports each requested id in
//! exactly one of its two maps.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use comfybatch_core::types::JobId;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::api::QueueBackend;
use crate::error::ComfyError;
use crate::ledger::{JobLedger, JobState};
use crate::resolver::{self, OutputReference};

/// Stand-in deadline for budgets too large to add to an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Progress hook invoked with `(job_id, new_state)` on every transition.
///
/// Runs on the job's polling task. A panic inside the hook is caught and
/// logged; it never affects polling.
pub type StatusCallback = Arc<dyn Fn(&str, JobState) + Send + Sync>;

/// Polling cadence and per-job budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_wait: Duration,
}

/// Resolved outputs and per-job errors of a [`Poller::wait_all`] call.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    pub results: HashMap<JobId, OutputReference>,
    pub errors: HashMap<JobId, ComfyError>,
}

impl BatchOutcome {
    pub fn len(&self) -> usize {
        self.results.len() + self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Drives jobs to a terminal state against a [`QueueBackend`].
#[derive(Clone)]
pub struct Poller {
    backend: Arc<dyn QueueBackend>,
    ledger: Arc<JobLedger>,
    settings: PollSettings,
}

impl Poller {
    pub fn new(backend: Arc<dyn QueueBackend>, ledger: Arc<JobLedger>, settings: PollSettings) -> Self {
        Self {
            backend,
            ledger,
            settings,
        }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Poll one job until it resolves, fails remotely, or runs out of time.
    pub async fn wait_for_finish(
        &self,
        job_id: &str,
        callback: Option<&StatusCallback>,
    ) -> Result<OutputReference, ComfyError> {
        self.poll_job(job_id, callback, &CancellationToken::new())
            .await
    }

    /// Poll every job concurrently and wait for all of them.
    pub async fn wait_all(&self, job_ids: &[JobId], callback: Option<StatusCallback>) -> BatchOutcome {
        self.wait_all_until_cancelled(job_ids, callback, CancellationToken::new())
            .await
    }

    /// Like [`wait_all`](Self::wait_all), but stops early once `cancel`
    /// fires. Jobs resolved before cancellation keep their results; the
    /// rest are reported as [`ComfyError::Cancelled`].
    ///
    /// A history response that is already available when the token fires
    /// is still resolved. A request still waiting on the server is
    /// abandoned, so a cancelled batch never waits out a stalled fetch.
    pub async fn wait_all_until_cancelled(
        &self,
        job_ids: &[JobId],
        callback: Option<StatusCallback>,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        let mut seen = HashSet::new();
        let handles: Vec<_> = job_ids
            .iter()
            .filter(|id| seen.insert(id.as_str()))
            .map(|id| {
                let poller = self.clone();
                let callback = callback.clone();
                let cancel = cancel.clone();
                let task_id = id.clone();
                let handle = tokio::spawn(async move {
                    poller.poll_job(&task_id, callback.as_ref(), &cancel).await
                });
                (id.clone(), handle)
            })
            .collect();

        tracing::info!(jobs = handles.len(), "Waiting for batch");

        let joined = futures::future::join_all(
            handles
                .into_iter()
                .map(|(id, handle)| async move { (id, handle.await) }),
        )
        .await;

        let mut outcome = BatchOutcome::default();
        for (job_id, joined) in joined {
            match joined {
                Ok(Ok(reference)) => {
                    outcome.results.insert(job_id, reference);
                }
                Ok(Err(e)) => {
                    outcome.errors.insert(job_id, e);
                }
                Err(e) => {
                    tracing::error!(job_id = %job_id, error = %e, "Polling task failed");
                    let message = e.to_string();
                    outcome
                        .errors
                        .insert(job_id.clone(), ComfyError::TaskFailed { job_id, message });
                }
            }
        }

        tracing::info!(
            finished = outcome.results.len(),
            failed = outcome.errors.len(),
            "Batch wait complete",
        );
        outcome
    }

    /// One non-blocking check. History failures count as "not finished";
    /// untracked ids are never finished.
    pub async fn check_once(&self, job_id: &str) -> bool {
        match self.ledger.state(job_id) {
            None => return false,
            Some(JobState::Finished) => return true,
            Some(_) => {}
        }

        match self.backend.history(job_id).await {
            Ok(record) => {
                if resolver::resolve(&record, self.backend.base_url()).is_some() {
                    self.ledger.transition(job_id, JobState::Finished);
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                tracing::debug!(job_id = %job_id, error = %e, "History check failed");
                false
            }
        }
    }

    /// Fetch history once and resolve its output.
    pub async fn fetch_output(&self, job_id: &str) -> Result<OutputReference, ComfyError> {
        let record = self
            .backend
            .history(job_id)
            .await
            .map_err(|e| ComfyError::History {
                job_id: job_id.to_string(),
                message: e.to_string(),
            })?;
        resolver::resolve(&record, self.backend.base_url()).ok_or_else(|| ComfyError::NoOutput {
            job_id: job_id.to_string(),
        })
    }

    async fn poll_job(
        &self,
        job_id: &str,
        callback: Option<&StatusCallback>,
        cancel: &CancellationToken,
    ) -> Result<OutputReference, ComfyError> {
        let PollSettings { interval, max_wait } = self.settings;

        self.ledger.record(job_id, None);
        self.advance(job_id, JobState::Polling, callback);

        let started = Instant::now();
        let deadline = started
            .checked_add(max_wait)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut last_error: Option<String> = None;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            // The deadline also bounds a history request that never answers.
            let fetched = tokio::select! {
                biased;
                fetched = tokio::time::timeout_at(deadline, self.backend.history(job_id)) => fetched,
                _ = cancel.cancelled() => return Err(self.cancelled(job_id)),
            };
            let Ok(fetched) = fetched else {
                return Err(self.timed_out(job_id, started, last_error, callback));
            };

            match fetched {
                Ok(record) => {
                    last_error = None;
                    if let Some(reference) = resolver::resolve(&record, self.backend.base_url()) {
                        self.advance(job_id, JobState::Finished, callback);
                        tracing::info!(job_id = %job_id, url = %reference.url, "Job finished");
                        return Ok(reference);
                    }
                    if let Some(failure) = resolver::execution_failure(&record) {
                        self.advance(job_id, JobState::Failed, callback);
                        tracing::warn!(
                            job_id = %job_id,
                            node_id = ?failure.node_id,
                            error = %failure.message,
                            "Job failed on the server",
                        );
                        return Err(ComfyError::Execution {
                            job_id: job_id.to_string(),
                            node_id: failure.node_id,
                            message: failure.message,
                        });
                    }
                    tracing::debug!(job_id = %job_id, attempt, "No output yet");
                }
                Err(e) => {
                    tracing::warn!(job_id = %job_id, attempt, error = %e, "History fetch failed, will retry");
                    last_error = Some(e.to_string());
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.timed_out(job_id, started, last_error, callback));
            }

            let pause = interval.min(deadline - now);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(self.cancelled(job_id)),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    fn timed_out(
        &self,
        job_id: &str,
        started: Instant,
        last_error: Option<String>,
        callback: Option<&StatusCallback>,
    ) -> ComfyError {
        let waited = started.elapsed();
        self.advance(job_id, JobState::TimedOut, callback);
        tracing::warn!(job_id = %job_id, waited_ms = waited.as_millis() as u64, "Job timed out");
        ComfyError::Timeout {
            job_id: job_id.to_string(),
            waited,
            last_error,
        }
    }

    fn cancelled(&self, job_id: &str) -> ComfyError {
        tracing::info!(job_id = %job_id, "Stopped waiting for job");
        ComfyError::Cancelled {
            job_id: job_id.to_string(),
        }
    }

    /// Apply a ledger transition and report it when it took effect.
    fn advance(&self, job_id: &str, state: JobState, callback: Option<&StatusCallback>) {
        if self.ledger.transition(job_id, state).is_none() {
            return;
        }
        if let Some(callback) = callback {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(job_id, state)));
            if outcome.is_err() {
                tracing::warn!(job_id = %job_id, %state, "Status callback panicked, ignoring");
            }
        }
    }
}
