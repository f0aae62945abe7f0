use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Timestamp format of run-log lines.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d %H:%M:%S";

pub fn timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Append-only destination for run-log lines.
pub trait LineSink {
    fn write_line(&self, line: &str) -> io::Result<()>;
}

/// Stamps stage events and hands them to a sink. A failing sink never aborts
/// the run; the failure is reported through `tracing` instead.
#[derive(Clone, Copy)]
pub struct RunLog<'a> {
    sink: &'a dyn LineSink,
}

impl<'a> RunLog<'a> {
    pub fn new(sink: &'a dyn LineSink) -> Self {
        Self { sink }
    }

    pub fn event(&self, msg: &str) {
        let line = format!("{}\t{}", timestamp(), msg);
        if let Err(e) = self.sink.write_line(&line) {
            tracing::warn!(error = %e, "run log write failed");
        }
    }
}

/// Size in GiB as written in run logs.
pub fn gib(bytes: u64) -> String {
    format!("{:.6} GB", bytes as f64 / (1u64 << 30) as f64)
}

/// Appends to a log file, creating it (and its directory) on open.
pub struct FileSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileSink {
    pub fn open(path: &Path) -> io::Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { path: path.to_path_buf(), file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LineSink for FileSink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "log file lock poisoned"))?;
        writeln!(f, "{}", line)?;
        f.flush()
    }
}

/// Keeps lines in memory.
#[derive(Default)]
pub struct MemorySink {
    lines: RefCell<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    /// Lines with the timestamp column removed.
    pub fn messages(&self) -> Vec<String> {
        self.lines
            .borrow()
            .iter()
            .map(|l| l.split_once('\t').map(|(_, m)| m.to_string()).unwrap_or_else(|| l.clone()))
            .collect()
    }
}

impl LineSink for MemorySink {
    fn write_line(&self, line: &str) -> io::Result<()> {
        self.lines.borrow_mut().push(line.to_string());
        Ok(())
    }
}

/// Discards everything.
pub struct NullSink;

impl LineSink for NullSink {
    fn write_line(&self, _line: &str) -> io::Result<()> {
        Ok(())
    }
}
