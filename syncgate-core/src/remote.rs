use crate::error::RemoteError;

/// Cursor of a chunked upload in progress.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadSession {
    pub session_id: String,
    pub cursor_offset: u64,
    pub remote_path: String,
}

/// The remote store operations the scheduler consumes. Paths are remote
/// canonical paths (`/`-separated, leading `/`).
pub trait RemoteStore {
    /// Create a folder; `RemoteError::AlreadyExists` when it is already there.
    fn create_folder(&self, path: &str) -> Result<(), RemoteError>;

    /// Whether a file is visible remotely.
    fn exists(&self, path: &str) -> Result<bool, RemoteError>;

    /// Single-shot upload of a small file.
    fn upload(&self, data: &[u8], path: &str) -> Result<(), RemoteError>;

    /// Open a session with the first chunk; returns the session id.
    fn session_start(&self, chunk: &[u8]) -> Result<String, RemoteError>;

    /// Append a chunk at `session.cursor_offset`.
    fn session_append(&self, chunk: &[u8], session: &UploadSession) -> Result<(), RemoteError>;

    /// Append the last chunk and commit the file at `session.remote_path`.
    fn session_finish(&self, chunk: &[u8], session: &UploadSession) -> Result<(), RemoteError>;
}

/// Create each folder once, treating "already exists" as success.
pub fn ensure_folders<'a, I>(remote: &dyn RemoteStore, folders: I) -> Result<usize, RemoteError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut created = 0;
    for f in folders {
        match remote.create_folder(f) {
            Ok(()) => created += 1,
            Err(RemoteError::AlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    Ok(created)
}
