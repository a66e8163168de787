//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission (`POST /prompt`), history retrieval
//! (`GET /history/{prompt_id}`) and artifact download (`GET /view?...`)
//! using [`reqwest`]. Nothing here retries; callers decide.

use async_trait::async_trait;
use comfybatch_core::types::JobId;
use serde::Deserialize;

use crate::config::{normalize_base_url, ClientConfig};
use crate::resolver::HistoryRecord;

/// The three remote operations the engine needs from a queue service.
///
/// [`ComfyUIApi`] is the HTTP implementation; the manager only holds an
/// `Arc<dyn QueueBackend>` so other transports can be plugged in.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Normalized base URL artifacts are served from.
    fn base_url(&self) -> &str;

    /// Queue a workflow and return its server-assigned id.
    async fn submit(&self, workflow: &serde_json::Value) -> Result<JobId, ComfyUIApiError>;

    /// Fetch the history entry for one job (`null` while the server has none).
    async fn history(&self, job_id: &str) -> Result<HistoryRecord, ComfyUIApiError>;

    /// Fetch raw artifact bytes.
    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, ComfyUIApiError>;
}

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    client_id: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
    /// Per-node validation problems reported alongside the id.
    #[serde(default)]
    pub node_errors: serde_json::Value,
}

impl SubmitResponse {
    /// Whether the server flagged any node while accepting the prompt.
    pub fn has_node_errors(&self) -> bool {
        match &self.node_errors {
            serde_json::Value::Null => false,
            serde_json::Value::Object(map) => !map.is_empty(),
            serde_json::Value::Array(items) => !items.is_empty(),
            _ => true,
        }
    }
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ComfyUIApiError {
    /// True when the service could not be reached at all.
    pub fn is_connection(&self) -> bool {
        match self {
            Self::Request(e) => e.is_connect() || e.is_timeout(),
            Self::ApiError { .. } => false,
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across multiple instances).
    ///
    /// `api_url` goes through [`normalize_base_url`]; a value it rejects
    /// is kept as given so the first request reports the problem.
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        let api_url = normalize_base_url(&api_url).unwrap_or(api_url);
        Self {
            client,
            api_url,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    /// Build a client honouring the configured base URL and request timeout.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self::with_client(client, config.base_url.clone()))
    }

    /// Client id sent with every submission.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID.  Returns the server-assigned `prompt_id` and queue
    /// position.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request.  The returned JSON maps
    /// the prompt id to its outputs and status, and is an empty object
    /// while the prompt is still queued or running.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download the bytes behind an artifact URL.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl QueueBackend for ComfyUIApi {
    fn base_url(&self) -> &str {
        &self.api_url
    }

    async fn submit(&self, workflow: &serde_json::Value) -> Result<JobId, ComfyUIApiError> {
        let response = self.submit_workflow(workflow).await?;
        if response.has_node_errors() {
            tracing::warn!(
                prompt_id = %response.prompt_id,
                node_errors = %response.node_errors,
                "Workflow queued with node errors",
            );
        }
        tracing::debug!(
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow queued",
        );
        Ok(response.prompt_id)
    }

    async fn history(&self, job_id: &str) -> Result<HistoryRecord, ComfyUIApiError> {
        let mut response = self.get_history(job_id).await?;
        Ok(response
            .get_mut(job_id)
            .map(serde_json::Value::take)
            .unwrap_or(serde_json::Value::Null))
    }

    async fn fetch_artifact(&self, url: &str) -> Result<Vec<u8>, ComfyUIApiError> {
        self.get_bytes(url).await
    }
}
