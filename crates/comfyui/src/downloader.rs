//! Artifact download to the local filesystem.

use std::path::{Path, PathBuf};

use crate::api::QueueBackend;
use crate::error::ComfyError;
use crate::resolver::OutputReference;

/// Name used when neither the caller nor the URL yields one.
const FALLBACK_FILENAME: &str = "download";

/// Fetch `reference` and write it to `destination_dir/filename`.
///
/// The directory must already exist. An existing file is overwritten.
/// One attempt only: transport failures and non-2xx responses surface as
/// [`ComfyError::Download`].
pub async fn download(
    backend: &dyn QueueBackend,
    reference: &OutputReference,
    destination_dir: &Path,
    filename: Option<&str>,
) -> Result<PathBuf, ComfyError> {
    let is_dir = tokio::fs::metadata(destination_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(ComfyError::Download(format!(
            "destination directory {} does not exist",
            destination_dir.display()
        )));
    }

    let name = output_filename(reference, filename);
    let bytes = backend
        .fetch_artifact(&reference.url)
        .await
        .map_err(|e| ComfyError::Download(format!("{}: {e}", reference.url)))?;

    let target = destination_dir.join(&name);
    tokio::fs::write(&target, &bytes).await?;

    tracing::info!(
        path = %target.display(),
        bytes = bytes.len(),
        "Artifact downloaded",
    );
    Ok(target)
}

/// Pick the local file name for `reference`.
///
/// Preference: explicit name, the reference's own filename, the URL's
/// `filename` query parameter, the last URL path segment. Only the final
/// path component of the chosen name is kept.
pub fn output_filename(reference: &OutputReference, explicit: Option<&str>) -> String {
    let candidate = explicit
        .map(str::to_string)
        .or_else(|| reference.filename.clone())
        .or_else(|| filename_from_url(&reference.url));

    candidate
        .as_deref()
        .and_then(|name| Path::new(name).file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    if let Some((_, value)) = parsed.query_pairs().find(|(key, _)| key == "filename") {
        if !value.is_empty() {
            return Some(value.into_owned());
        }
    }
    parsed
        .path_segments()?
        .rev()
        .find(|s| !s.is_empty())
        .map(str::to_string)
}
