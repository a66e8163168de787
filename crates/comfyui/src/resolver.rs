//! Output resolution from ComfyUI history records.
//!
//! A history entry looks like
//! `{"outputs": {"<node>": {"images": [{"filename", "subfolder", "type"}]}},
//!   "status": {"status_str": "success", "completed": true, "messages": [...]}}`.
//! Only the pieces needed to find an artifact or a failure are read; the
//! rest of the record is left uninterpreted.

use serde::{Deserialize, Serialize};

/// Per-job history entry as returned by the server (`null` when absent).
pub type HistoryRecord = serde_json::Value;

/// Output key written by image-saving nodes.
pub const OUTPUT_KEY: &str = "images";

/// Artifact kind for previews, which are never treated as job output.
const PREVIEW_KIND: &str = "temp";

/// Locator for one produced artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputReference {
    pub url: String,
    pub filename: Option<String>,
}

/// Remote failure details pulled from a history record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionFailure {
    pub node_id: Option<String>,
    pub message: String,
}

/// One entry of a node's `images` list.
#[derive(Debug, Deserialize)]
struct Artifact {
    filename: String,
    #[serde(default)]
    subfolder: String,
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
}

fn default_kind() -> String {
    "output".to_string()
}

/// Payload of an `execution_error` status message.
#[derive(Debug, Deserialize)]
struct ErrorData {
    #[serde(default)]
    node_id: Option<String>,
    #[serde(default)]
    exception_message: String,
    #[serde(default)]
    exception_type: String,
}

/// Find the first saved artifact in `record`, in record order.
///
/// Returns `None` while nothing has been produced. A record that will
/// never produce output looks the same, so callers bound their waiting by
/// time rather than by this function.
pub fn resolve(record: &HistoryRecord, base_url: &str) -> Option<OutputReference> {
    let outputs = record.get("outputs")?.as_object()?;

    let artifact = outputs
        .values()
        .filter_map(|node| node.get(OUTPUT_KEY)?.as_array())
        .flatten()
        .filter_map(|entry| Artifact::deserialize(entry).ok())
        .find(|artifact| artifact.kind != PREVIEW_KIND)?;

    let mut url = reqwest::Url::parse(&format!("{base_url}/view")).ok()?;
    url.query_pairs_mut()
        .append_pair("filename", &artifact.filename)
        .append_pair("subfolder", &artifact.subfolder)
        .append_pair("type", &artifact.kind);

    Some(OutputReference {
        url: url.into(),
        filename: Some(artifact.filename),
    })
}

/// Report a server-side failure recorded in `record`, if any.
pub fn execution_failure(record: &HistoryRecord) -> Option<ExecutionFailure> {
    let status = record.get("status")?;
    if status.get("status_str")?.as_str()? != "error" {
        return None;
    }

    let details = status
        .get("messages")
        .and_then(|m| m.as_array())
        .into_iter()
        .flatten()
        .filter_map(|message| {
            let pair = message.as_array()?;
            if pair.first()?.as_str()? != "execution_error" {
                return None;
            }
            ErrorData::deserialize(pair.get(1)?).ok()
        })
        .next();

    Some(match details {
        Some(data) if !data.exception_message.is_empty() => ExecutionFailure {
            node_id: data.node_id,
            message: if data.exception_type.is_empty() {
                data.exception_message
            } else {
                format!("{}: {}", data.exception_type, data.exception_message)
            },
        },
        Some(data) => ExecutionFailure {
            node_id: data.node_id,
            message: "execution failed".to_string(),
        },
        None => ExecutionFailure {
            node_id: None,
            message: "execution failed".to_string(),
        },
    })
}
