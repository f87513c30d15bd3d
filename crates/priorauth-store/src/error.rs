use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("rule file not found: {0}")]
    NotFound(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("hyperedge error: {0}")]
    Hyperedge(#[from] priorauth_core::HyperedgeError),

    #[error("unsupported rule file version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
}
