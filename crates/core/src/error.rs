/// Errors raised by the pure, local parts of the client: template edits,
/// seed planning and image packing.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: Vec<String>, reason: String },

    #[error("Unsupported input: {0}")]
    UnsupportedInput(String),

    #[error("Missing dependency: {0}")]
    MissingDependency(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
