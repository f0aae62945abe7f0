use std::path::{Component, Path, PathBuf};

/// Separator rules for local paths, chosen once at startup.
///
/// Remote paths always use `/` and start with `/`; local paths use the
/// convention's own separator. Working on strings lets a Windows layout be
/// reasoned about on any host.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathConvention {
    Posix,
    Windows,
}

impl PathConvention {
    pub fn native() -> Self {
        if cfg!(windows) {
            PathConvention::Windows
        } else {
            PathConvention::Posix
        }
    }

    pub fn separator(self) -> char {
        match self {
            PathConvention::Posix => '/',
            PathConvention::Windows => '\\',
        }
    }

    fn is_sep(self, c: char) -> bool {
        // Windows accepts both separators.
        c == self.separator() || (self == PathConvention::Windows && c == '/')
    }

    /// Windows compares separators loosely and letters case-insensitively.
    fn same_char(self, a: char, b: char) -> bool {
        match self {
            PathConvention::Posix => a == b,
            PathConvention::Windows => {
                (self.is_sep(a) && self.is_sep(b)) || a.to_lowercase().eq(b.to_lowercase())
            }
        }
    }

    pub fn join(self, base: &str, name: &str) -> String {
        let name = name.trim_start_matches(|c| self.is_sep(c));
        if base.is_empty() {
            return name.to_string();
        }
        let base = base.trim_end_matches(|c| self.is_sep(c));
        format!("{}{}{}", base, self.separator(), name)
    }

    /// Last component of `path` (the whole string if it has no separator).
    pub fn file_name(self, path: &str) -> &str {
        let trimmed = path.trim_end_matches(|c| self.is_sep(c));
        match trimmed.rfind(|c| self.is_sep(c)) {
            Some(i) => &trimmed[i + 1..],
            None => trimmed,
        }
    }

    /// `path` relative to `root`, or `None` when `path` is not under `root`.
    /// Only whole components match: `/data2/x` is not under `/data`.
    pub fn relativize<'a>(self, path: &'a str, root: &str) -> Option<&'a str> {
        let root = root.trim_end_matches(|c| self.is_sep(c));
        if root.is_empty() {
            return None;
        }
        let mut chars = path.char_indices();
        let mut matched = 0;
        for rc in root.chars() {
            let (i, pc) = chars.next()?;
            if !self.same_char(pc, rc) {
                return None;
            }
            matched = i + pc.len_utf8();
        }
        let rest = &path[matched..];
        if !rest.is_empty() && !rest.starts_with(|c| self.is_sep(c)) {
            return None;
        }
        Some(rest.trim_start_matches(|c| self.is_sep(c)))
    }

    /// Path of `local` in the remote namespace: the sync-root prefix is removed
    /// and separators become `/`. A path outside the sync root keeps all of its
    /// components.
    pub fn to_remote(self, local: &str, sync_root: &str) -> String {
        let rel = self.relativize(local, sync_root).unwrap_or(local);
        let mut out = String::with_capacity(rel.len() + 1);
        for part in rel.split(|c| self.is_sep(c)).filter(|p| !p.is_empty()) {
            out.push('/');
            out.push_str(part);
        }
        if out.is_empty() {
            out.push('/');
        }
        out
    }

    pub fn to_remote_path(self, local: &Path, sync_root: &Path) -> String {
        self.to_remote(&local.to_string_lossy(), &sync_root.to_string_lossy())
    }
}

impl Default for PathConvention {
    fn default() -> Self {
        PathConvention::native()
    }
}

/// Parent folder of a remote path (`/` for top-level entries).
pub fn remote_parent(remote: &str) -> &str {
    match remote.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &remote[..i],
    }
}

/// Path of `path` relative to `base` for a file found under a directory walk.
/// Rejects results that climb out of `base`.
pub fn relative_under(path: &Path, base: &Path) -> Option<PathBuf> {
    let rel = pathdiff::diff_paths(path, base)?;
    if rel.is_absolute() || rel.components().any(|c| matches!(c, Component::ParentDir)) {
        return None;
    }
    Some(rel)
}
