use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::Read;
use std::path::PathBuf;

use crate::config::Config;
use crate::manifest::FileEntry;
use crate::progress::Progress;
use crate::remote::{ensure_folders, RemoteStore, UploadSession};
use crate::runlog::{gib, RunLog};

#[derive(Clone, Copy, Debug)]
pub struct ApiConfig {
    pub chunk_size: usize,
    pub max_attempts: u32,
}

impl ApiConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self { chunk_size: cfg.api_chunk as usize, max_attempts: cfg.api_max_attempts }
    }
}

#[derive(Serialize, Clone, Debug, Default)]
pub struct ApiReport {
    pub uploaded: Vec<PathBuf>,
    /// Sources left in place after every attempt failed.
    pub failed: Vec<PathBuf>,
}

/// Uploads files straight to the remote store, one at a time.
pub struct ApiUploader<'a> {
    cfg: ApiConfig,
    remote: &'a dyn RemoteStore,
    log: RunLog<'a>,
    progress: &'a Progress,
}

impl<'a> ApiUploader<'a> {
    pub fn new(
        cfg: ApiConfig,
        remote: &'a dyn RemoteStore,
        log: RunLog<'a>,
        progress: &'a Progress,
    ) -> Self {
        Self { cfg, remote, log, progress }
    }

    /// Create every destination folder up front. Existing folders are fine;
    /// any other failure stops the run.
    pub fn create_folders<'f, I>(&self, folders: I) -> Result<usize>
    where
        I: IntoIterator<Item = &'f str>,
    {
        ensure_folders(self.remote, folders).context("create remote folders")
    }

    pub fn upload_all(&self, entries: &[FileEntry]) -> Result<ApiReport> {
        let mut report = ApiReport::default();
        self.progress.begin_files(entries.len() as u64);
        for e in entries {
            tracing::info!(src = %e.source_path.display(), dst = %e.remote_canonical_path, "uploading");
            let mut uploaded = false;
            for attempt in 1..=self.cfg.max_attempts {
                match self.upload_once(e) {
                    Ok(()) => {
                        uploaded = true;
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(
                            src = %e.source_path.display(),
                            attempt,
                            error = %format!("{:#}", err),
                            "upload attempt failed"
                        );
                        self.log.event(&self.line(e, "Failed"));
                    }
                }
            }
            if uploaded {
                fs::remove_file(&e.source_path)
                    .with_context(|| format!("remove uploaded source {:?}", e.source_path))?;
                self.log.event(&self.line(e, "Success"));
                report.uploaded.push(e.source_path.clone());
            } else {
                report.failed.push(e.source_path.clone());
            }
            self.progress.file_done();
        }
        Ok(report)
    }

    fn line(&self, e: &FileEntry, status: &str) -> String {
        format!(
            "{}\t{}\t{}\t{}",
            e.source_path.display(),
            e.remote_canonical_path,
            gib(e.size_bytes),
            status
        )
    }

    /// One full attempt from the start of the file.
    fn upload_once(&self, e: &FileEntry) -> Result<()> {
        let mut f = File::open(&e.source_path)
            .with_context(|| format!("open {:?}", e.source_path))?;
        let size = f.metadata()?.len();
        let chunk = self.cfg.chunk_size as u64;
        self.progress.begin_file("upload", &e.source_path, size);

        if size <= chunk {
            let mut data = Vec::with_capacity(size as usize);
            f.read_to_end(&mut data)?;
            self.remote.upload(&data, &e.remote_canonical_path)?;
            self.progress.add_bytes(size);
            return Ok(());
        }

        let num_chunks = size.div_ceil(chunk);
        let mut buf = vec![0u8; self.cfg.chunk_size];
        let mut session: Option<UploadSession> = None;
        for i in 0..num_chunks {
            let len = chunk.min(size - i * chunk) as usize;
            f.read_exact(&mut buf[..len])
                .with_context(|| format!("read {:?}", e.source_path))?;
            let data = &buf[..len];
            match session.as_mut() {
                None => {
                    let session_id = self.remote.session_start(data)?;
                    session = Some(UploadSession {
                        session_id,
                        cursor_offset: len as u64,
                        remote_path: e.remote_canonical_path.clone(),
                    });
                }
                Some(s) if i == num_chunks - 1 => self.remote.session_finish(data, s)?,
                Some(s) => {
                    self.remote.session_append(data, s)?;
                    s.cursor_offset += len as u64;
                }
            }
            self.progress.add_bytes(len as u64);
        }
        Ok(())
    }
}
