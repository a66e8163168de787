//! Job manager for one ComfyUI service.
//!
//! [`ComfyUIManager`] owns the working workflow template, the client
//! configuration, and the job ledger, and exposes the submit -> wait ->
//! download cycle. Several managers may target different servers in the
//! same process; nothing here is global.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use comfybatch_core::image_pack::{self, PackOptions, PackedImage};
use comfybatch_core::seeds::SeedPlan;
use comfybatch_core::types::JobId;
use comfybatch_core::workflow::WorkflowTemplate;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::{ComfyUIApi, QueueBackend};
use crate::config::ClientConfig;
use crate::downloader;
use crate::error::ComfyError;
use crate::ledger::JobLedger;
use crate::poller::{BatchOutcome, PollSettings, Poller, StatusCallback};
use crate::resolver::OutputReference;
use crate::submitter::{self, BatchSubmission};

/// Seed input of the KSampler node in the stock text-to-image workflow.
pub const DEFAULT_SEED_PATH: [&str; 3] = ["3", "inputs", "seed"];

/// Orchestrates submissions and waits against one queue service.
pub struct ComfyUIManager {
    config: ClientConfig,
    backend: Arc<dyn QueueBackend>,
    ledger: Arc<JobLedger>,
    workflow: Option<WorkflowTemplate>,
}

impl ComfyUIManager {
    /// Manager talking HTTP to `config.base_url`.
    pub fn new(config: ClientConfig) -> Result<Self, ComfyError> {
        let api = ComfyUIApi::from_config(&config)
            .map_err(|e| ComfyError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_backend(config, Arc::new(api)))
    }

    /// Manager driving an arbitrary backend.
    ///
    /// Artifact URLs are built from `backend.base_url()`; `config.base_url`
    /// is only used by [`new`](Self::new) to build the HTTP backend. The
    /// timings in `config` apply either way.
    pub fn with_backend(config: ClientConfig, backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            config,
            backend,
            ledger: Arc::new(JobLedger::new()),
            workflow: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Job table for this session.
    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    pub fn workflow(&self) -> Option<&WorkflowTemplate> {
        self.workflow.as_ref()
    }

    /// Replace the working template with one read from `path`.
    pub fn load_workflow(&mut self, path: impl AsRef<Path>) -> Result<(), ComfyError> {
        self.workflow = Some(WorkflowTemplate::load(path)?);
        Ok(())
    }

    pub fn set_workflow(&mut self, workflow: WorkflowTemplate) {
        self.workflow = Some(workflow);
    }

    /// Set one field of the working template. Leaves it unchanged on error.
    pub fn edit_workflow<S: AsRef<str>>(
        &mut self,
        path: &[S],
        value: impl Into<Value>,
    ) -> Result<(), ComfyError> {
        self.workflow_mut()?.set(path, value.into())?;
        Ok(())
    }

    /// Submit the working template as a single job.
    pub async fn submit_workflow(&self) -> Result<JobId, ComfyError> {
        let workflow = self.require_workflow()?;
        submitter::submit_workflow(self.backend.as_ref(), &self.ledger, workflow).await
    }

    /// Submit one job per seed in `plan`, varying the field at `seed_path`.
    pub async fn batch_submit<S: AsRef<str>>(
        &self,
        seed_path: &[S],
        plan: &SeedPlan,
    ) -> Result<BatchSubmission, ComfyError> {
        let workflow = self.require_workflow()?;
        submitter::submit_batch(self.backend.as_ref(), &self.ledger, workflow, seed_path, plan).await
    }

    /// Block until `job_id` produces output, using explicit timings.
    pub async fn wait_for_finish(
        &self,
        job_id: &str,
        interval: Duration,
        max_wait: Duration,
        callback: Option<StatusCallback>,
    ) -> Result<OutputReference, ComfyError> {
        self.poller_with(PollSettings { interval, max_wait })
            .wait_for_finish(job_id, callback.as_ref())
            .await
    }

    /// Single non-blocking completion check.
    pub async fn check_queue(&self, job_id: &str) -> bool {
        self.poller().check_once(job_id).await
    }

    /// Output of a job that has already finished.
    pub async fn find_output(&self, job_id: &str) -> Result<OutputReference, ComfyError> {
        self.poller().fetch_output(job_id).await
    }

    /// Wait for every job concurrently with the configured timings.
    pub async fn wait_all(&self, job_ids: &[JobId], callback: Option<StatusCallback>) -> BatchOutcome {
        self.poller().wait_all(job_ids, callback).await
    }

    /// [`wait_all`](Self::wait_all) that can be stopped through `cancel`.
    pub async fn wait_all_until_cancelled(
        &self,
        job_ids: &[JobId],
        callback: Option<StatusCallback>,
        cancel: CancellationToken,
    ) -> BatchOutcome {
        self.poller()
            .wait_all_until_cancelled(job_ids, callback, cancel)
            .await
    }

    /// Save an artifact into an existing directory.
    pub async fn download_output(
        &self,
        reference: &OutputReference,
        destination_dir: impl AsRef<Path>,
        filename: Option<&str>,
    ) -> Result<PathBuf, ComfyError> {
        downloader::download(
            self.backend.as_ref(),
            reference,
            destination_dir.as_ref(),
            filename,
        )
        .await
    }

    /// Pack a local image and embed it in a base64 image-loader node.
    ///
    /// Writes `image_base64`, `image_name` and `image_path` under
    /// `[node_id, "inputs", ...]` in one step: if any of them cannot be
    /// set, the template is left as it was.
    pub fn set_base64_image(
        &mut self,
        node_id: &str,
        image_path: impl AsRef<Path>,
        temp_name: Option<&str>,
        options: &PackOptions,
    ) -> Result<PackedImage, ComfyError> {
        let image_path = image_path.as_ref();
        if !image_path.is_file() {
            return Err(ComfyError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("local image not found at {}", image_path.display()),
            )));
        }
        let current = self.require_workflow()?;

        let packed = image_pack::pack(image_path, options)?;
        let name = match temp_name {
            Some(name) if packed.recompressed => image_pack::jpeg_name(name),
            Some(name) => name.to_string(),
            None => packed.file_name.clone(),
        };
        let encoded = base64::engine::general_purpose::STANDARD.encode(&packed.bytes);

        let mut updated = current.clone();
        updated.set(&[node_id, "inputs", "image_base64"], Value::from(encoded))?;
        updated.set(&[node_id, "inputs", "image_name"], Value::from(name.clone()))?;
        updated.set(
            &[node_id, "inputs", "image_path"],
            Value::from(image_path.to_string_lossy().into_owned()),
        )?;
        self.workflow = Some(updated);

        tracing::info!(
            node_id,
            image_name = %name,
            bytes = packed.bytes.len(),
            recompressed = packed.recompressed,
            "Embedded image into workflow",
        );
        Ok(PackedImage {
            file_name: name,
            ..packed
        })
    }

    // ---- private helpers ----

    fn poller(&self) -> Poller {
        self.poller_with(PollSettings {
            interval: self.config.poll_interval,
            max_wait: self.config.max_wait,
        })
    }

    fn poller_with(&self, settings: PollSettings) -> Poller {
        Poller::new(Arc::clone(&self.backend), Arc::clone(&self.ledger), settings)
    }

    fn require_workflow(&self) -> Result<&WorkflowTemplate, ComfyError> {
        self.workflow
            .as_ref()
            .ok_or_else(|| ComfyError::Configuration("no workflow loaded".into()))
    }

    fn workflow_mut(&mut self) -> Result<&mut WorkflowTemplate, ComfyError> {
        self.workflow
            .as_mut()
            .ok_or_else(|| ComfyError::Configuration("no workflow loaded".into()))
    }
}
