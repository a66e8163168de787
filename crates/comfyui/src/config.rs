//! Per-manager client configuration.

use std::time::Duration;

use crate::error::ComfyError;

/// Default ComfyUI address used when nothing else is configured.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8188";
/// Default pause between history polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
/// Default per-job polling budget.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(600);
/// Default timeout for a single HTTP request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection and polling settings for one ComfyUI service.
///
/// Each manager owns its own copy, so several managers can target
/// different servers at the same time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Normalized base URL, no trailing slash (e.g. `http://host:8188`).
    pub base_url: String,
    pub poll_interval: Duration,
    pub max_wait: Duration,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_wait: DEFAULT_MAX_WAIT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    /// Default settings targeting `base_url`.
    pub fn new(base_url: &str) -> Result<Self, ComfyError> {
        Ok(Self {
            base_url: normalize_base_url(base_url)?,
            ..Self::default()
        })
    }

    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                      | Default                  |
    /// |------------------------------|--------------------------|
    /// | `COMFY_BASE_URL`             | `http://127.0.0.1:8188`  |
    /// | `COMFY_POLL_INTERVAL_SECS`   | `3`                      |
    /// | `COMFY_MAX_WAIT_SECS`        | `600`                    |
    /// | `COMFY_REQUEST_TIMEOUT_SECS` | `30`                     |
    pub fn from_env() -> Result<Self, ComfyError> {
        let base_url =
            std::env::var("COMFY_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.into());

        Ok(Self {
            base_url: normalize_base_url(&base_url)?,
            poll_interval: secs_from_env("COMFY_POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL)?,
            max_wait: secs_from_env("COMFY_MAX_WAIT_SECS", DEFAULT_MAX_WAIT)?,
            request_timeout: secs_from_env("COMFY_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT)?,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Trim, drop trailing slashes, and default the scheme to `http://`.
///
/// `127.0.0.1:8188/` becomes `http://127.0.0.1:8188`.
pub fn normalize_base_url(raw: &str) -> Result<String, ComfyError> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ComfyError::Configuration("base URL must not be empty".into()));
    }

    let url = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };

    reqwest::Url::parse(&url)
        .map_err(|e| ComfyError::Configuration(format!("invalid base URL '{raw}': {e}")))?;
    Ok(url)
}

fn secs_from_env(key: &str, default: Duration) -> Result<Duration, ComfyError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| ComfyError::Configuration(format!("{key} must be a whole number of seconds"))),
        Err(_) => Ok(default),
    }
}
