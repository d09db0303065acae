use std::path::PathBuf;

/// Errors raised while loading definitions or settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("failed to read {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse definition: {0}")]
  Parse(#[from] serde_json::Error),
}
