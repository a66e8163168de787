#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use comfybatch_comfyui::api::{ComfyUIApiError, QueueBackend};
use comfybatch_comfyui::config::ClientConfig;
use comfybatch_comfyui::ledger::JobState;
use comfybatch_comfyui::manager::ComfyUIManager;
use comfybatch_comfyui::poller::StatusCallback;
use comfybatch_comfyui::resolver::HistoryRecord;
use comfybatch_comfyui::WorkflowTemplate;
use serde_json::{json, Value};

pub const BASE_URL: &str = "http://comfy.test:8188";

/// How the fake server answers history requests for one job.
#[derive(Debug, Clone)]
pub enum HistoryScript {
    /// Empty history for `polls - 1` calls, then a saved image.
    ReadyAfter { polls: usize, filename: String },
    /// Every history request fails.
    AlwaysError,
    /// The job failed on the server.
    Failed { message: String },
    /// Never produces anything.
    Never,
    /// Each request takes `delay`, then reports a saved image.
    Slow { delay: Duration, filename: String },
}

impl HistoryScript {
    pub fn ready(polls: usize, filename: &str) -> Self {
        Self::ReadyAfter {
            polls,
            filename: filename.to_string(),
        }
    }
}

/// In-memory queue service with scripted behaviour per job id.
#[derive(Default)]
pub struct FakeBackend {
    next_id: AtomicUsize,
    submitted: Mutex<Vec<Value>>,
    reject_submissions: Mutex<HashSet<usize>>,
    scripts: Mutex<HashMap<String, HistoryScript>>,
    history_calls: Mutex<HashMap<String, usize>>,
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, job_id: &str, script: HistoryScript) {
        self.scripts
            .lock()
            .unwrap()
            .insert(job_id.to_string(), script);
    }

    /// Reject the submission with this zero-based index.
    pub fn reject_submission(&self, index: usize) {
        self.reject_submissions.lock().unwrap().insert(index);
    }

    pub fn add_artifact(&self, url: &str, bytes: &[u8]) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(url.to_string(), bytes.to_vec());
    }

    pub fn submitted(&self) -> Vec<Value> {
        self.submitted.lock().unwrap().clone()
    }

    pub fn history_calls(&self, job_id: &str) -> usize {
        self.history_calls
            .lock()
            .unwrap()
            .get(job_id)
            .copied()
            .unwrap_or(0)
    }
}

pub fn saved_image_record(filename: &str) -> Value {
    json!({
        "outputs": {"9": {"images": [{"filename": filename, "subfolder": "", "type": "output"}]}},
        "status": {"status_str": "success", "completed": true, "messages": []}
    })
}

#[async_trait]
impl QueueBackend for FakeBackend {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    async fn submit(&self, workflow: &Value) -> Result<String, ComfyUIApiError> {
        let index = self.next_id.fetch_add(1, Ordering::SeqCst);
        if self.reject_submissions.lock().unwrap().contains(&index) {
            return Err(ComfyUIApiError::ApiError {
                status: 400,
                body: r#"{"error": "invalid prompt"}"#.to_string(),
            });
        }
        self.submitted.lock().unwrap().push(workflow.clone());
        Ok(format!("job-{index}"))
    }

    async fn history(&self, job_id: &str) -> Result<HistoryRecord, ComfyUIApiError> {
        let call = {
            let mut calls = self.history_calls.lock().unwrap();
            let count = calls.entry(job_id.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let script = self.scripts.lock().unwrap().get(job_id).cloned();

        match script {
            None | Some(HistoryScript::Never) => Ok(Value::Null),
            Some(HistoryScript::ReadyAfter { polls, filename }) => {
                if call >= polls {
                    Ok(saved_image_record(&filename))
                } else {
                    Ok(json!({}))
                }
            }
            Some(HistoryScript::AlwaysError) => Err(ComfyUIApiError::ApiError {
                status: 500,
                body: "history unavailable".to_string(),
            }),
            Some(HistoryScript::Failed { message }) => Ok(json!({
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [["execution_error", {
                        "node_id": "5",
                        "exception_message": message,
                        "exception_type": "RuntimeError"
                    }]]
                }
            })),
            Some(HistoryScript::Slow { delay, filename }) => {
                tokio::time::sleep(delay).await;
                Ok(saved_image_record(&filename))
            }
        }
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, ComfyUIApiError> {
        self.artifacts
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or(ComfyUIApiError::ApiError {
                status: 404,
                body: "not found".to_string(),
            })
    }
}

pub fn sample_workflow() -> WorkflowTemplate {
    WorkflowTemplate::new(json!({
        "3": {"class_type": "KSampler", "inputs": {"seed": 7, "steps": 20, "model": ["4", 0]}},
        "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat on a sofa"}},
        "9": {"class_type": "SaveImage", "inputs": {"images": ["8", 0]}},
        "10": {"class_type": "Base64ImageLoader", "inputs": {}}
    }))
}

/// Manager over `backend` with fast polling and a short budget.
pub fn fast_manager(backend: Arc<FakeBackend>, max_wait: Duration) -> ComfyUIManager {
    let config = ClientConfig::default()
        .with_poll_interval(Duration::from_millis(10))
        .with_max_wait(max_wait);
    let mut manager = ComfyUIManager::with_backend(config, backend);
    manager.set_workflow(sample_workflow());
    manager
}

/// Callback that records every transition it sees.
pub fn recording_callback() -> (StatusCallback, Arc<Mutex<Vec<(String, JobState)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let callback: StatusCallback = Arc::new(move |job_id: &str, state: JobState| {
        sink.lock().unwrap().push((job_id.to_string(), state));
    });
    (callback, seen)
}
