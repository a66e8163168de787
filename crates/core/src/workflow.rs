//! Job template store: a ComfyUI workflow held as an ordered JSON tree.
//!
//! Fields are addressed by a path of string segments, e.g.
//! `["3", "inputs", "seed"]`. Inside a mapping every segment is a key
//! (numeric strings included, which is how ComfyUI names its nodes).
//! Inside a sequence an all-digit segment is a positional index.

use std::path::Path;

use serde_json::Value;

use crate::error::CoreError;

/// An API-format workflow: node id -> `{"class_type", "inputs", ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTemplate {
    root: Value,
}

impl WorkflowTemplate {
    pub fn new(root: Value) -> Self {
        Self { root }
    }

    /// Load a workflow from a JSON file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!(
                "Failed to read workflow file {}: {e}",
                path.display()
            ))
        })?;
        let root = serde_json::from_str(&text).map_err(|e| {
            CoreError::Configuration(format!(
                "Failed to decode JSON from workflow file {}: {e}",
                path.display()
            ))
        })?;

        tracing::debug!(path = %path.display(), "Workflow loaded");
        Ok(Self { root })
    }

    pub fn as_value(&self) -> &Value {
        &self.root
    }

    pub fn into_value(self) -> Value {
        self.root
    }

    /// Read the value at `path`.
    ///
    /// Every segment must resolve: a missing key, an out-of-range index, a
    /// non-numeric segment inside a sequence, or indexing into a scalar all
    /// yield [`CoreError::InvalidPath`].
    pub fn get<S: AsRef<str>>(&self, path: &[S]) -> Result<&Value, CoreError> {
        if path.is_empty() {
            return Err(invalid(path, "path is empty"));
        }
        let mut node = &self.root;
        for segment in path {
            node = child(node, segment.as_ref()).map_err(|reason| invalid(path, reason))?;
        }
        Ok(node)
    }

    /// Replace the value at `path`.
    ///
    /// All intermediate segments must exist. The final segment may add a
    /// new key to a mapping but cannot extend a sequence. On error the
    /// template is left untouched.
    pub fn set<S: AsRef<str>>(&mut self, path: &[S], value: Value) -> Result<(), CoreError> {
        let Some((last, parents)) = path.split_last() else {
            return Err(invalid(path, "path is empty"));
        };

        let mut node = &mut self.root;
        for segment in parents {
            node = child_mut(node, segment.as_ref()).map_err(|reason| invalid(path, reason))?;
        }

        let last = last.as_ref();
        match node {
            Value::Array(items) => {
                let len = items.len();
                let idx = parse_index(last).map_err(|reason| invalid(path, reason))?;
                let slot = items
                    .get_mut(idx)
                    .ok_or_else(|| invalid(path, format!("index {idx} out of range (len {len})")))?;
                *slot = value;
            }
            Value::Object(map) => {
                map.insert(last.to_string(), value);
            }
            other => {
                return Err(invalid(
                    path,
                    format!("cannot assign '{last}' inside a {}", kind(other)),
                ));
            }
        }
        Ok(())
    }

    /// Clone the template and set `path` on the copy, leaving `self` as is.
    pub fn with_value_at<S: AsRef<str>>(&self, path: &[S], value: Value) -> Result<Self, CoreError> {
        let mut copy = self.clone();
        copy.set(path, value)?;
        Ok(copy)
    }
}

impl From<Value> for WorkflowTemplate {
    fn from(root: Value) -> Self {
        Self::new(root)
    }
}

fn child<'a>(node: &'a Value, segment: &str) -> Result<&'a Value, String> {
    match node {
        Value::Array(items) => {
            let idx = parse_index(segment)?;
            items
                .get(idx)
                .ok_or_else(|| format!("index {idx} out of range (len {})", items.len()))
        }
        Value::Object(map) => map
            .get(segment)
            .ok_or_else(|| format!("missing key '{segment}'")),
        other => Err(format!("cannot index '{segment}' into a {}", kind(other))),
    }
}

fn child_mut<'a>(node: &'a mut Value, segment: &str) -> Result<&'a mut Value, String> {
    match node {
        Value::Array(items) => {
            let len = items.len();
            let idx = parse_index(segment)?;
            items
                .get_mut(idx)
                .ok_or_else(|| format!("index {idx} out of range (len {len})"))
        }
        Value::Object(map) => map
            .get_mut(segment)
            .ok_or_else(|| format!("missing key '{segment}'")),
        other => Err(format!("cannot index '{segment}' into a {}", kind(other))),
    }
}

fn parse_index(segment: &str) -> Result<usize, String> {
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return Err(format!("non-numeric segment '{segment}' inside a sequence"));
    }
    segment
        .parse()
        .map_err(|_| format!("index '{segment}' is too large"))
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "sequence",
        Value::Object(_) => "mapping",
    }
}

fn invalid<S: AsRef<str>>(path: &[S], reason: impl Into<String>) -> CoreError {
    CoreError::InvalidPath {
        path: path.iter().map(|s| s.as_ref().to_string()).collect(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn sample() -> WorkflowTemplate {
        WorkflowTemplate::new(json!({
            "3": {"class_type": "KSampler", "inputs": {"seed": 7, "steps": 20}},
            "6": {"class_type": "CLIPTextEncode", "inputs": {"text": "a cat", "clip": ["4", 1]}},
        }))
    }

    #[test]
    fn get_reads_nested_scalar() {
        let wf = sample();
        assert_eq!(wf.get(&["3", "inputs", "seed"]).unwrap(), &json!(7));
    }

    #[test]
    fn set_replaces_only_the_addressed_field() {
        let mut wf = sample();
        wf.set(&["3", "inputs", "seed"], json!(99)).unwrap();

        let mut expected = sample().into_value();
        expected["3"]["inputs"]["seed"] = json!(99);
        assert_eq!(wf.as_value(), &expected);
    }

    #[test]
    fn set_can_add_a_final_mapping_key() {
        let mut wf = sample();
        wf.set(&["3", "inputs", "cfg"], json!(7.5)).unwrap();
        assert_eq!(wf.get(&["3", "inputs", "cfg"]).unwrap(), &json!(7.5));
    }

    #[test]
    fn numeric_segment_indexes_into_sequence() {
        let mut wf = sample();
        assert_eq!(wf.get(&["6", "inputs", "clip", "1"]).unwrap(), &json!(1));
        wf.set(&["6", "inputs", "clip", "0"], json!("5")).unwrap();
        assert_eq!(wf.get(&["6", "inputs", "clip"]).unwrap(), &json!(["5", 1]));
    }

    #[test]
    fn numeric_segment_is_a_plain_key_inside_mapping() {
        // "3" is a node id here, not position 3.
        let wf = WorkflowTemplate::new(json!({"0": "zero", "3": "three"}));
        assert_eq!(wf.get(&["3"]).unwrap(), &json!("three"));
        assert_matches!(wf.get(&["1"]), Err(CoreError::InvalidPath { .. }));
    }

    #[test]
    fn non_numeric_segment_inside_sequence_is_rejected() {
        let wf = sample();
        assert_matches!(
            wf.get(&["6", "inputs", "clip", "first"]),
            Err(CoreError::InvalidPath { .. })
        );
    }

    #[test]
    fn sequence_index_out_of_range_is_rejected_without_extending() {
        let mut wf = sample();
        let err = wf.set(&["6", "inputs", "clip", "2"], json!(0)).unwrap_err();
        assert_matches!(err, CoreError::InvalidPath { ref path, .. } if path.len() == 4);
        assert_eq!(wf, sample());
    }

    #[test]
    fn missing_intermediate_key_leaves_template_unchanged() {
        let mut wf = sample();
        assert_matches!(
            wf.set(&["9", "inputs", "seed"], json!(1)),
            Err(CoreError::InvalidPath { .. })
        );
        assert_eq!(wf, sample());
    }

    #[test]
    fn indexing_a_scalar_is_rejected() {
        let mut wf = sample();
        assert_matches!(
            wf.set(&["3", "inputs", "seed", "x"], json!(1)),
            Err(CoreError::InvalidPath { .. })
        );
    }

    #[test]
    fn empty_path_is_rejected() {
        let wf = sample();
        let empty: [&str; 0] = [];
        assert_matches!(wf.get(&empty), Err(CoreError::InvalidPath { .. }));
    }

    #[test]
    fn with_value_at_does_not_touch_the_original() {
        let wf = sample();
        let variant = wf.with_value_at(&["3", "inputs", "seed"], json!(1)).unwrap();
        assert_eq!(wf.get(&["3", "inputs", "seed"]).unwrap(), &json!(7));
        assert_eq!(variant.get(&["3", "inputs", "seed"]).unwrap(), &json!(1));
    }

    #[test]
    fn load_preserves_node_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workflow.json");
        std::fs::write(&path, r#"{"9": {}, "10": {}, "2": {}}"#).unwrap();

        let wf = WorkflowTemplate::load(&path).unwrap();
        let keys: Vec<&str> = wf
            .as_value()
            .as_object()
            .unwrap()
            .keys()
            .map(String::as_str)
            .collect();
        assert_eq!(keys, vec!["9", "10", "2"]);
    }

    #[test]
    fn load_reports_missing_and_malformed_files() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            WorkflowTemplate::load(dir.path().join("nope.json")),
            Err(CoreError::Configuration(_))
        );

        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_matches!(WorkflowTemplate::load(&path), Err(CoreError::Configuration(_)));
    }
}
