use std::path::Path;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::GIB;

#[derive(Clone, Debug, Default)]
struct FileProgress {
    action: &'static str,
    name: String,
    files_done: u64,
    files_total: u64,
    bytes_done: u64,
    bytes_total: u64,
}

/// Per-file heartbeat on stderr for splitting, joining and API uploads.
#[derive(Clone)]
pub struct Progress {
    enabled: bool,
    state: Arc<Mutex<FileProgress>>,
    running: Arc<AtomicBool>,
}

impl Progress {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            state: Arc::new(Mutex::new(FileProgress::default())),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn disabled() -> Self {
        Self::new(false)
    }

    fn update(&self, f: impl FnOnce(&mut FileProgress)) {
        if let Ok(mut st) = self.state.lock() {
            f(&mut st);
        }
    }

    pub fn begin_files(&self, total: u64) {
        self.update(|st| {
            st.files_total = total;
            st.files_done = 0;
        });
    }

    /// Start on `path`: `action` is the verb shown in the heartbeat.
    pub fn begin_file(&self, action: &'static str, path: &Path, size: u64) {
        let name = path.file_name().unwrap_or(path.as_os_str()).to_string_lossy().into_owned();
        self.update(|st| {
            st.action = action;
            st.name = name;
            st.bytes_done = 0;
            st.bytes_total = size;
        });
    }

    pub fn add_bytes(&self, n: u64) {
        self.update(|st| st.bytes_done += n);
    }

    pub fn file_done(&self) {
        self.update(|st| st.files_done += 1);
    }

    /// e.g. `[   10s] split scan.raw (0/3) 2.500/8.000 GiB 31%`
    pub fn heartbeat(&self, elapsed: Duration) -> String {
        let st = self.state.lock().map(|s| s.clone()).unwrap_or_default();
        let pct = if st.bytes_total > 0 { st.bytes_done * 100 / st.bytes_total } else { 0 };
        format!(
            "[{:>5}s] {} {} ({}/{}) {:.3}/{:.3} GiB {}%",
            elapsed.as_secs(),
            st.action,
            st.name,
            st.files_done,
            st.files_total,
            st.bytes_done as f64 / GIB as f64,
            st.bytes_total as f64 / GIB as f64,
            pct
        )
    }

    pub fn start(&self) {
        if !self.enabled {
            return;
        }
        self.running.store(true, Ordering::Relaxed);
        let me = self.clone();
        thread::spawn(move || {
            let t0 = Instant::now();
            while me.running.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_secs(5));
                if !me.running.load(Ordering::Relaxed) {
                    break;
                }
                eprintln!("{}", me.heartbeat(t0.elapsed()));
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}
