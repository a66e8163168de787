use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use comfybatch_comfyui::config::ClientConfig;
use comfybatch_comfyui::ledger::JobState;
use comfybatch_comfyui::manager::ComfyUIManager;
use comfybatch_comfyui::poller::StatusCallback;
use comfybatch_core::seeds::SeedPlan;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Batch settings read from the environment on top of [`ClientConfig`].
///
/// | Env Var              | Default          |
/// |----------------------|------------------|
/// | `COMFY_WORKFLOW`     | *(required)*     |
/// | `COMFY_SEED_PATH`    | `3/inputs/seed`  |
/// | `COMFY_BATCH_SIZE`   | `1`              |
/// | `COMFY_RANDOM_SEEDS` | `false`          |
/// | `COMFY_OUTPUT_DIR`   | `outputs`        |
struct RunSettings {
    workflow: PathBuf,
    seed_path: Vec<String>,
    batch_size: usize,
    random_seeds: bool,
    output_dir: PathBuf,
}

impl RunSettings {
    fn from_env() -> anyhow::Result<Self> {
        let workflow = std::env::var("COMFY_WORKFLOW")
            .context("COMFY_WORKFLOW must point at an API-format workflow JSON file")?;
        let seed_path = std::env::var("COMFY_SEED_PATH")
            .unwrap_or_else(|_| "3/inputs/seed".into())
            .split('/')
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        let batch_size = match std::env::var("COMFY_BATCH_SIZE") {
            Ok(v) => v
                .trim()
                .parse()
                .with_context(|| format!("COMFY_BATCH_SIZE must be a positive integer, got '{v}'"))?,
            Err(_) => 1,
        };
        let random_seeds = std::env::var("COMFY_RANDOM_SEEDS")
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let output_dir = std::env::var("COMFY_OUTPUT_DIR").unwrap_or_else(|_| "outputs".into());

        Ok(Self {
            workflow: PathBuf::from(workflow),
            seed_path,
            batch_size,
            random_seeds,
            output_dir: PathBuf::from(output_dir),
        })
    }

    fn seed_plan(&self) -> SeedPlan {
        if self.random_seeds {
            SeedPlan::random(self.batch_size)
        } else {
            SeedPlan::sequential(self.batch_size)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "comfybatch_worker=debug,comfybatch_comfyui=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ClientConfig::from_env()?;
    let settings = RunSettings::from_env()?;
    tracing::info!(
        base_url = %config.base_url,
        workflow = %settings.workflow.display(),
        batch_size = settings.batch_size,
        random_seeds = settings.random_seeds,
        "Batch worker starting",
    );

    let mut manager = ComfyUIManager::new(config)?;
    manager.load_workflow(&settings.workflow)?;

    let batch = manager
        .batch_submit(&settings.seed_path, &settings.seed_plan())
        .await?;
    for failure in &batch.failures {
        tracing::error!(seed = failure.seed, error = %failure.error, "Submission rejected");
    }

    let on_status: StatusCallback = Arc::new(|job_id: &str, state: JobState| {
        tracing::info!(job_id, state = %state, "Job status changed");
    });
    let outcome = manager.wait_all(&batch.job_ids(), Some(on_status)).await;

    std::fs::create_dir_all(&settings.output_dir).with_context(|| {
        format!("failed to create output directory {}", settings.output_dir.display())
    })?;
    // Keep submission order in the output.
    for job in &batch.submitted {
        if let Some(reference) = outcome.results.get(&job.job_id) {
            match manager
                .download_output(reference, &settings.output_dir, None)
                .await
            {
                Ok(path) => {
                    tracing::info!(job_id = %job.job_id, seed = job.seed, path = %path.display(), "Saved output")
                }
                Err(e) => tracing::error!(job_id = %job.job_id, error = %e, "Download failed"),
            }
        } else if let Some(err) = outcome.errors.get(&job.job_id) {
            tracing::error!(job_id = %job.job_id, seed = job.seed, error = %err, "Job did not produce output");
        }
    }

    tracing::info!(
        finished = outcome.results.len(),
        failed = outcome.errors.len() + batch.failures.len(),
        "Batch complete",
    );
    Ok(())
}
