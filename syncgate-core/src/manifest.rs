use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::{Config, MissingSourcePolicy};
use crate::error::ManifestError;
use crate::path_convention::{relative_under, PathConvention};
use crate::split;

/// File names never uploaded from a directory walk (OS metadata and sync-client
/// sentinels).
pub const JUNK_FILE_NAMES: &[&str] = &[
    "desktop.ini",
    "thumbs.db",
    "Thumbs.db",
    ".ds_store",
    ".DS_Store",
    "._.DS_Store",
    ".dropbox",
    ".dropbox.attr",
];

/// One manifest row: a file or directory and the folder it goes to.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ManifestRow {
    pub source: PathBuf,
    pub dest_folder: PathBuf,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FileEntry {
    pub source_path: PathBuf,
    pub size_bytes: u64,
    pub local_dest_path: PathBuf,
    pub remote_canonical_path: String,
}

/// Result of expanding a manifest: every file in order, plus the folders that
/// must exist before anything is moved.
#[derive(Clone, Debug, Default)]
pub struct Expansion {
    pub entries: Vec<FileEntry>,
    pub dest_dirs: BTreeSet<PathBuf>,
    /// Destination folders that do not sit under the sync root.
    pub outside_sync_root: BTreeSet<PathBuf>,
}

impl Expansion {
    pub fn total_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }

    /// Parent folders of every remote path, deduplicated.
    pub fn remote_dirs(&self) -> BTreeSet<String> {
        self.entries
            .iter()
            .map(|e| crate::path_convention::remote_parent(&e.remote_canonical_path).to_string())
            .filter(|d| d != "/")
            .collect()
    }
}

/// Read a tab-separated manifest: `source<TAB>destination` per line, no header.
/// Blank lines, rows with a blank source and `#` comments are skipped; columns
/// after the second are ignored.
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>> {
    let f = fs::File::open(path).with_context(|| format!("open manifest {:?}", path))?;
    let mut rows = Vec::new();
    for (i, line) in BufReader::new(f).lines().enumerate() {
        let line = line.with_context(|| format!("read manifest {:?}", path))?;
        if line.trim_start().starts_with('#') {
            continue;
        }
        let mut cols = line.split('\t');
        let source = cols.next().unwrap_or("").trim();
        if source.is_empty() {
            continue;
        }
        let dest = cols.next().map(str::trim).unwrap_or("");
        if dest.is_empty() {
            return Err(ManifestError::Malformed {
                line: i + 1,
                reason: format!("no destination folder for {:?}", source),
            }
            .into());
        }
        rows.push(ManifestRow { source: PathBuf::from(source), dest_folder: PathBuf::from(dest) });
    }
    Ok(rows)
}

/// Junk-file filter matched against bare file names.
pub struct ExclusionSet {
    names: HashSet<String>,
    globs: GlobSet,
}

impl ExclusionSet {
    pub fn new(extra_globs: &[String]) -> Result<Self> {
        let mut b = GlobSetBuilder::new();
        for g in extra_globs {
            b.add(Glob::new(g).with_context(|| format!("bad exclude pattern {:?}", g))?);
        }
        Ok(Self {
            names: JUNK_FILE_NAMES.iter().map(|s| s.to_string()).collect(),
            globs: b.build()?,
        })
    }

    pub fn is_excluded(&self, file_name: &str) -> bool {
        self.names.contains(file_name) || self.globs.is_match(file_name)
    }
}

pub struct Expander {
    sync_root: PathBuf,
    convention: PathConvention,
    exclude: ExclusionSet,
    missing: MissingSourcePolicy,
}

impl Expander {
    pub fn new(
        sync_root: &Path,
        convention: PathConvention,
        exclude: ExclusionSet,
        missing: MissingSourcePolicy,
    ) -> Self {
        Self { sync_root: sync_root.to_path_buf(), convention, exclude, missing }
    }

    pub fn from_config(cfg: &Config, convention: PathConvention) -> Result<Self> {
        Ok(Self::new(
            &cfg.sync_root,
            convention,
            ExclusionSet::new(&cfg.exclude)?,
            cfg.missing_source,
        ))
    }

    pub fn expand(&self, rows: &[ManifestRow]) -> Result<Expansion> {
        let mut out = Expansion::default();
        for row in rows {
            let meta = fs::metadata(&row.source);
            match meta {
                Ok(m) if m.is_file() => {
                    let dest = self.dest_for(&row.dest_folder, &row.source);
                    self.push(&mut out, row.source.clone(), m.len(), dest);
                }
                Ok(m) if m.is_dir() => self.expand_dir(&mut out, &row.source, &row.dest_folder)?,
                _ => {
                    let first = split::part_path(&row.source, 1);
                    if first.is_file() {
                        self.expand_parts(&mut out, &first, &row.dest_folder)?;
                    } else {
                        self.missing_source(&row.source)?;
                    }
                }
            }
        }
        Ok(out)
    }

    fn expand_dir(&self, out: &mut Expansion, dir: &Path, dest_folder: &Path) -> Result<()> {
        let walker = WalkDir::new(dir).min_depth(1).sort_by_file_name();
        for ent in walker {
            let ent = ent.with_context(|| format!("walk {:?}", dir))?;
            if !ent.file_type().is_file() {
                continue;
            }
            let name = ent.file_name().to_string_lossy();
            if self.exclude.is_excluded(&name) {
                tracing::debug!(path = %ent.path().display(), "excluded");
                continue;
            }
            let Some(rel) = relative_under(ent.path(), dir) else {
                continue;
            };
            let size = ent.metadata().with_context(|| format!("stat {:?}", ent.path()))?.len();
            let dest = self.dest_under(dest_folder, &rel.to_string_lossy());
            self.push(out, ent.path().to_path_buf(), size, dest);
        }
        Ok(())
    }

    fn expand_parts(&self, out: &mut Expansion, first: &Path, dest_folder: &Path) -> Result<()> {
        for part in split::find_parts(first)? {
            let size = fs::metadata(&part).with_context(|| format!("stat {:?}", part))?.len();
            let dest = self.dest_for(dest_folder, &part);
            self.push(out, part, size, dest);
        }
        Ok(())
    }

    fn dest_under(&self, folder: &Path, rel: &str) -> PathBuf {
        PathBuf::from(self.convention.join(&folder.to_string_lossy(), rel))
    }

    fn dest_for(&self, folder: &Path, source: &Path) -> PathBuf {
        let source = source.to_string_lossy();
        self.dest_under(folder, self.convention.file_name(&source))
    }

    fn missing_source(&self, source: &Path) -> Result<()> {
        match self.missing {
            MissingSourcePolicy::Skip => {
                tracing::warn!(path = %source.display(), "manifest source missing; skipped");
                Ok(())
            }
            MissingSourcePolicy::Fail => Err(ManifestError::MissingSource(source.into()).into()),
        }
    }

    fn push(&self, out: &mut Expansion, source: PathBuf, size: u64, dest: PathBuf) {
        if let Some(parent) = dest.parent() {
            if !parent.as_os_str().is_empty() {
                out.dest_dirs.insert(parent.to_path_buf());
            }
        }
        let root = self.sync_root.to_string_lossy();
        let dest_str = dest.to_string_lossy();
        if !root.is_empty() && self.convention.relativize(&dest_str, &root).is_none() {
            let folder = dest.parent().unwrap_or(&dest).to_path_buf();
            if !out.outside_sync_root.contains(&folder) {
                tracing::warn!(
                    dest = %folder.display(),
                    root = %root,
                    "destination outside sync root"
                );
                out.outside_sync_root.insert(folder);
            }
        }
        let remote = self.convention.to_remote(&dest_str, &root);
        out.entries.push(FileEntry {
            source_path: source,
            size_bytes: size,
            local_dest_path: dest,
            remote_canonical_path: remote,
        });
    }
}
