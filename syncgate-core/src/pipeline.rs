use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::api_upload::{ApiReport, ApiUploader};
use crate::batch::{make_batches, Batch};
use crate::batch_upload::{BatchOutcome, BatchUploader};
use crate::error::ManifestError;
use crate::manifest::{Expander, Expansion, ManifestRow};
use crate::progress::Progress;
use crate::runlog::RunLog;
use crate::split::{split_oversized, SplitConfig, SplitReport};

/// Returns how many folders were created.
pub fn materialize_dirs<'a, I>(dirs: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a PathBuf>,
{
    let mut created = 0;
    for d in dirs {
        if d.is_dir() {
            continue;
        }
        if d.exists() {
            bail!("destination exists and is not a directory: {:?}", d);
        }
        match fs::create_dir_all(d) {
            Ok(()) => created += 1,
            Err(e) if e.kind() == ErrorKind::AlreadyExists && d.is_dir() => {}
            Err(e) => return Err(e).with_context(|| format!("create dir {:?}", d)),
        }
    }
    Ok(created)
}

#[derive(Serialize, Clone, Debug)]
pub struct Plan {
    pub created: String,
    pub batch_ceiling: u64,
    pub total_bytes: u64,
    pub dest_dirs: Vec<PathBuf>,
    pub batches: Vec<Batch>,
}

pub fn plan(expansion: Expansion, batch_ceiling: u64) -> Plan {
    let total_bytes = expansion.total_bytes();
    let dest_dirs = expansion.dest_dirs.into_iter().collect();
    Plan {
        created: chrono::Local::now().to_rfc3339(),
        batch_ceiling,
        total_bytes,
        dest_dirs,
        batches: make_batches(expansion.entries, batch_ceiling),
    }
}

pub struct Prepared {
    pub expansion: Expansion,
    pub splits: Vec<SplitReport>,
}

/// Expand the manifest, split oversized files, and expand again so the parts
/// replace the files they came from.
pub fn prepare(
    rows: &[ManifestRow],
    expander: &Expander,
    split_cfg: &SplitConfig,
    log: RunLog<'_>,
    progress: &Progress,
) -> Result<Prepared> {
    let first = expander.expand(rows)?;
    log.event(&format!("Expanded manifest: {} file(s)", first.entries.len()));
    let splits = split_oversized(&first.entries, split_cfg, log, progress)?;
    let expansion = if splits.is_empty() { first } else { expander.expand(rows)? };
    Ok(Prepared { expansion, splits })
}

pub fn sync_folder(
    expansion: Expansion,
    batch_ceiling: u64,
    uploader: &BatchUploader<'_>,
    log: RunLog<'_>,
) -> Result<Vec<BatchOutcome>> {
    if let Some(dir) = expansion.outside_sync_root.iter().next() {
        return Err(ManifestError::OutsideSyncRoot(dir.clone()).into());
    }
    let made = materialize_dirs(&expansion.dest_dirs)?;
    tracing::info!(created = made, total = expansion.dest_dirs.len(), "destination folders ready");
    let batches = make_batches(expansion.entries, batch_ceiling);
    log.event(&format!("Data upload using sync folder: {} batch(es)", batches.len()));
    uploader.run(&batches)
}

pub fn api_upload(
    expansion: Expansion,
    uploader: &ApiUploader<'_>,
    log: RunLog<'_>,
) -> Result<ApiReport> {
    log.event("Data upload using API");
    let dirs = expansion.remote_dirs();
    uploader.create_folders(dirs.iter().map(String::as_str))?;
    uploader.upload_all(&expansion.entries)
}
