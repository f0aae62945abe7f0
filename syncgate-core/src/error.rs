use std::path::PathBuf;

/// Errors reported by a remote store adapter.
///
/// `AlreadyExists` and `NotFound` are answers rather than failures; callers
/// branch on them (folder creation ignores the first, existence checks map the
/// second to `false`).
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("remote path already exists: {0}")]
    AlreadyExists(String),
    #[error("remote path not found: {0}")]
    NotFound(String),
    #[error("remote API error (status {status}): {summary}")]
    Api { status: u16, summary: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest source does not exist: {0:?}")]
    MissingSource(PathBuf),
    #[error("manifest line {line}: {reason}")]
    Malformed { line: usize, reason: String },
    #[error("destination folder is outside the sync root: {0:?}")]
    OutsideSyncRoot(PathBuf),
}
