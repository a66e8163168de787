//! Single and batch workflow submission.

use comfybatch_core::seeds::SeedPlan;
use comfybatch_core::types::{JobId, Seed};
use comfybatch_core::workflow::WorkflowTemplate;
use serde_json::Value;

use crate::api::{ComfyUIApiError, QueueBackend};
use crate::error::ComfyError;
use crate::ledger::JobLedger;

/// A job accepted by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub job_id: JobId,
    pub seed: Seed,
}

/// A seed whose submission was rejected.
#[derive(Debug)]
pub struct SubmissionFailure {
    pub seed: Seed,
    pub error: ComfyError,
}

/// Outcome of [`submit_batch`], in seed order.
#[derive(Debug, Default)]
pub struct BatchSubmission {
    pub submitted: Vec<SubmittedJob>,
    pub failures: Vec<SubmissionFailure>,
}

impl BatchSubmission {
    /// Accepted job ids in submission order.
    pub fn job_ids(&self) -> Vec<JobId> {
        self.submitted.iter().map(|j| j.job_id.clone()).collect()
    }

    /// Number of submissions attempted (one per resolved seed).
    pub fn attempted(&self) -> usize {
        self.submitted.len() + self.failures.len()
    }
}

/// Submit `template` once and start tracking it as queued.
pub async fn submit_workflow(
    backend: &dyn QueueBackend,
    ledger: &JobLedger,
    template: &WorkflowTemplate,
) -> Result<JobId, ComfyError> {
    let job_id = backend
        .submit(template.as_value())
        .await
        .map_err(submission_error)?;
    ledger.record(&job_id, None);
    tracing::info!(job_id = %job_id, "Workflow submitted");
    Ok(job_id)
}

/// Submit one copy of `template` per seed in `plan`, each differing only
/// at `seed_path`.
///
/// Rejected submissions are collected and the batch continues. An
/// unreachable service aborts the batch with [`ComfyError::Connection`];
/// jobs accepted before that point stay in the ledger.
pub async fn submit_batch<S: AsRef<str>>(
    backend: &dyn QueueBackend,
    ledger: &JobLedger,
    template: &WorkflowTemplate,
    seed_path: &[S],
    plan: &SeedPlan,
) -> Result<BatchSubmission, ComfyError> {
    let current = template.get(seed_path)?;
    if current.is_object() || current.is_array() {
        return Err(ComfyError::InvalidPath {
            path: seed_path.iter().map(|s| s.as_ref().to_string()).collect(),
            reason: "seed path must address a scalar field".into(),
        });
    }
    let seeds = plan.resolve(current.as_u64())?;

    tracing::info!(count = seeds.len(), random = plan.random, "Submitting batch");

    let mut batch = BatchSubmission::default();
    for seed in seeds {
        let variant = template.with_value_at(seed_path, Value::from(seed))?;
        match backend.submit(variant.as_value()).await {
            Ok(job_id) => {
                ledger.record(&job_id, Some(seed));
                tracing::info!(job_id = %job_id, seed, "Batch job submitted");
                batch.submitted.push(SubmittedJob { job_id, seed });
            }
            Err(e) if e.is_connection() => {
                tracing::error!(seed, error = %e, "Queue service unreachable, aborting batch");
                return Err(ComfyError::Connection(e.to_string()));
            }
            Err(e) => {
                tracing::warn!(seed, error = %e, "Batch job rejected");
                batch.failures.push(SubmissionFailure {
                    seed,
                    error: ComfyError::Queue(e.to_string()),
                });
            }
        }
    }

    Ok(batch)
}

fn submission_error(e: ComfyUIApiError) -> ComfyError {
    if e.is_connection() {
        ComfyError::Connection(e.to_string())
    } else {
        ComfyError::Queue(e.to_string())
    }
}
