use anyhow::{bail, ensure, Context, Result};
use serde::Serialize;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::manifest::FileEntry;
use crate::progress::Progress;
use crate::runlog::RunLog;

/// Suffix inserted before the ordinal of a split part.
pub const SPLIT_MARKER: &str = "_split_";
const MAX_PARTS: usize = 9999;

#[derive(Clone, Copy, Debug)]
pub struct SplitConfig {
    /// Size of every part except the last; also the oversize threshold.
    pub part_size: u64,
    /// Upper bound on bytes held in memory at once.
    pub read_chunk: usize,
}

impl SplitConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self { part_size: cfg.file_size_limit, read_chunk: cfg.split_read_chunk as usize }
    }

    pub fn parts_for(&self, size: u64) -> u64 {
        size.div_ceil(self.part_size)
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct SplitReport {
    pub source: PathBuf,
    pub parts: Vec<PathBuf>,
    pub part_sizes: Vec<u64>,
    pub total_bytes: u64,
    pub blake3_hex: String,
}

#[derive(Serialize, Clone, Debug)]
pub struct JoinReport {
    pub output: PathBuf,
    pub parts: Vec<PathBuf>,
    pub total_bytes: u64,
    pub blake3_hex: String,
}

/// `<original>_split_NNNN` (ordinal is 1-based).
pub fn part_path(original: &Path, ordinal: usize) -> PathBuf {
    let mut name: OsString = original.as_os_str().to_owned();
    name.push(format!("{}{:04}", SPLIT_MARKER, ordinal));
    PathBuf::from(name)
}

/// The file a `_split_0001` part was cut from.
pub fn original_of(first_part: &Path) -> Result<PathBuf> {
    let s = first_part.to_string_lossy();
    let suffix = format!("{}{:04}", SPLIT_MARKER, 1);
    match s.strip_suffix(&suffix) {
        Some(base) if !base.is_empty() => Ok(PathBuf::from(base)),
        _ => bail!("not a first split part (expected *{}): {:?}", suffix, first_part),
    }
}

/// All parts of a split file in ordinal order, starting from its `_split_0001`
/// part and stopping at the first missing ordinal.
pub fn find_parts(first_part: &Path) -> Result<Vec<PathBuf>> {
    let original = original_of(first_part)?;
    let mut parts = Vec::new();
    for ordinal in 1..=MAX_PARTS {
        let p = part_path(&original, ordinal);
        if !p.is_file() {
            break;
        }
        parts.push(p);
    }
    Ok(parts)
}

struct OpenPart {
    file: File,
    written: u64,
}

/// Split `path` into parts of `cfg.part_size` bytes next to the original, then
/// delete the original.
///
/// Reads go through one buffer of `cfg.read_chunk` bytes and never cross a
/// part boundary, so every part but the last holds exactly `part_size` bytes.
/// On error the original is left in place; parts already written remain.
pub fn split_file(path: &Path, cfg: &SplitConfig, progress: &Progress) -> Result<SplitReport> {
    ensure!(cfg.part_size > 0 && cfg.read_chunk > 0, "part and read sizes must be positive");
    let mut src = File::open(path).with_context(|| format!("open {:?}", path))?;
    let size = src.metadata()?.len();
    ensure!(
        cfg.parts_for(size) <= MAX_PARTS as u64,
        "{:?} would need more than {} parts",
        path,
        MAX_PARTS
    );
    progress.begin_file("split", path, size);

    let mut buf = vec![0u8; cfg.read_chunk];
    let mut hasher = blake3::Hasher::new();
    let mut parts: Vec<PathBuf> = Vec::new();
    let mut part_sizes: Vec<u64> = Vec::new();
    let mut current: Option<OpenPart> = None;
    let mut total = 0u64;
    loop {
        let room = current.as_ref().map_or(cfg.part_size, |p| cfg.part_size - p.written);
        let want = room.min(buf.len() as u64) as usize;
        let n = src.read(&mut buf[..want]).with_context(|| format!("read {:?}", path))?;
        if n == 0 {
            break;
        }
        let mut part = match current.take() {
            Some(p) => p,
            None => {
                let p = part_path(path, parts.len() + 1);
                let file = File::create(&p).with_context(|| format!("create {:?}", p))?;
                parts.push(p);
                part_sizes.push(0);
                OpenPart { file, written: 0 }
            }
        };
        part.file.write_all(&buf[..n]).with_context(|| format!("write part of {:?}", path))?;
        part.written += n as u64;
        if let Some(last) = part_sizes.last_mut() {
            *last = part.written;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
        progress.add_bytes(n as u64);
        if part.written == cfg.part_size {
            part.file.sync_all()?;
        } else {
            current = Some(part);
        }
    }
    if let Some(part) = current.take() {
        part.file.sync_all()?;
    }
    ensure!(total == size, "{:?} changed while splitting ({} of {} bytes read)", path, total, size);
    drop(src);
    fs::remove_file(path).with_context(|| format!("remove split source {:?}", path))?;

    Ok(SplitReport {
        source: path.to_path_buf(),
        parts,
        part_sizes,
        total_bytes: total,
        blake3_hex: hasher.finalize().to_hex().to_string(),
    })
}

/// Pre-pass: split every entry larger than the part size.
pub fn split_oversized(
    entries: &[FileEntry],
    cfg: &SplitConfig,
    log: RunLog<'_>,
    progress: &Progress,
) -> Result<Vec<SplitReport>> {
    let oversized: Vec<&FileEntry> =
        entries.iter().filter(|e| e.size_bytes > cfg.part_size).collect();
    progress.begin_files(oversized.len() as u64);
    let mut reports = Vec::with_capacity(oversized.len());
    for e in oversized {
        let n = cfg.parts_for(e.size_bytes);
        tracing::info!(path = %e.source_path.display(), parts = n, "splitting");
        log.event(&format!("Split {} into {} parts", e.source_path.display(), n));
        reports.push(split_file(&e.source_path, cfg, progress)?);
        progress.file_done();
    }
    Ok(reports)
}

/// Concatenate the parts that start at `first_part` back into the original
/// file. The output must not exist yet. With `delete_parts`, parts are removed
/// once the output is flushed.
pub fn join_parts(
    first_part: &Path,
    delete_parts: bool,
    read_chunk: usize,
    progress: &Progress,
) -> Result<JoinReport> {
    ensure!(read_chunk > 0, "read chunk must be positive");
    let output = original_of(first_part)?;
    let parts = find_parts(first_part)?;
    ensure!(!parts.is_empty(), "no split parts found for {:?}", first_part);
    ensure!(!output.exists(), "join target already exists: {:?}", output);

    progress.begin_files(parts.len() as u64);
    let mut out = File::create(&output).with_context(|| format!("create {:?}", output))?;
    let mut buf = vec![0u8; read_chunk];
    let mut hasher = blake3::Hasher::new();
    let mut total = 0u64;
    for p in &parts {
        let mut f = File::open(p).with_context(|| format!("open {:?}", p))?;
        progress.begin_file("join", p, f.metadata()?.len());
        loop {
            let n = f.read(&mut buf).with_context(|| format!("read {:?}", p))?;
            if n == 0 {
                break;
            }
            out.write_all(&buf[..n]).with_context(|| format!("write {:?}", output))?;
            hasher.update(&buf[..n]);
            total += n as u64;
            progress.add_bytes(n as u64);
        }
        progress.file_done();
    }
    out.sync_all()?;
    drop(out);

    if delete_parts {
        for p in &parts {
            fs::remove_file(p).with_context(|| format!("remove part {:?}", p))?;
        }
    }
    Ok(JoinReport {
        output,
        parts,
        total_bytes: total,
        blake3_hex: hasher.finalize().to_hex().to_string(),
    })
}
