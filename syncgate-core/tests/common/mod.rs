#![allow(dead_code)]

use anyhow::{anyhow, Result};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::time::Duration;

use syncgate_core::clock::Clock;
use syncgate_core::error::RemoteError;
use syncgate_core::gate::{IoSample, ProcessProbe, SpaceProbe};
use syncgate_core::operator::{AckReason, Operator};
use syncgate_core::remote::{RemoteStore, UploadSession};

/// Clock whose `sleep` only advances the reading.
#[derive(Default)]
pub struct FakeClock {
    now: Cell<Duration>,
    pub sleeps: Cell<usize>,
}

impl Clock for FakeClock {
    fn now(&self) -> Duration {
        self.now.get()
    }

    fn sleep(&self, d: Duration) {
        self.now.set(self.now.get() + d);
        self.sleeps.set(self.sleeps.get() + 1);
    }
}

/// Pops scripted answers; the last one repeats forever.
fn next<T: Clone>(q: &RefCell<VecDeque<T>>) -> Option<T> {
    let mut q = q.borrow_mut();
    if q.len() > 1 {
        q.pop_front()
    } else {
        q.front().cloned()
    }
}

/// Scripted process table. `None` answers simulate a failing probe.
#[derive(Default)]
pub struct FakeProbe {
    counts: RefCell<VecDeque<Option<usize>>>,
    samples: RefCell<VecDeque<Option<Vec<IoSample>>>>,
    pub count_calls: Cell<usize>,
}

impl FakeProbe {
    /// `n` processes whose counters never move.
    pub fn idle(n: usize) -> Self {
        let p = Self::default();
        p.push_count(Some(n));
        p.push_samples(Some((0..n as u32).map(|pid| sample(pid, 0, 0)).collect()));
        p
    }

    pub fn push_count(&self, n: Option<usize>) {
        self.counts.borrow_mut().push_back(n);
    }

    pub fn push_samples(&self, s: Option<Vec<IoSample>>) {
        self.samples.borrow_mut().push_back(s);
    }
}

pub fn sample(pid: u32, read_bytes: u64, written_bytes: u64) -> IoSample {
    IoSample { pid, read_bytes, written_bytes }
}

impl ProcessProbe for FakeProbe {
    fn count(&self, _name: &str) -> Result<usize> {
        self.count_calls.set(self.count_calls.get() + 1);
        next(&self.counts).flatten().ok_or_else(|| anyhow!("process table unavailable"))
    }

    fn io_samples(&self, _name: &str) -> Result<Vec<IoSample>> {
        next(&self.samples).flatten().ok_or_else(|| anyhow!("io counters unavailable"))
    }
}

pub struct FakeSpace(pub Cell<u64>);

impl FakeSpace {
    pub fn new(free: u64) -> Self {
        Self(Cell::new(free))
    }
}

impl SpaceProbe for FakeSpace {
    fn free_bytes(&self, _path: &Path) -> Result<u64> {
        Ok(self.0.get())
    }
}

/// Operator that always resumes and remembers why it was asked.
#[derive(Default)]
pub struct RecordingOperator {
    pub acks: RefCell<Vec<AckReason>>,
}

impl Operator for RecordingOperator {
    fn acknowledge(&self, reason: &AckReason) -> Result<()> {
        self.acks.borrow_mut().push(reason.clone());
        Ok(())
    }
}

/// In-memory remote store.
///
/// Uploaded files become visible immediately; anything else is visible when
/// the `visibility` hook says so. `fail_next` makes that many upload calls fail
/// with a transport error.
pub struct FakeRemote {
    pub files: RefCell<BTreeMap<String, Vec<u8>>>,
    pub folders: RefCell<BTreeSet<String>>,
    pub calls: RefCell<Vec<String>>,
    pub fail_next: Cell<usize>,
    pub broken_folder: RefCell<Option<String>>,
    sessions: RefCell<HashMap<String, Vec<u8>>>,
    visibility: Box<dyn Fn(&str) -> bool>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self::with_visibility(|_| false)
    }
}

impl FakeRemote {
    pub fn with_visibility(f: impl Fn(&str) -> bool + 'static) -> Self {
        Self {
            files: RefCell::default(),
            folders: RefCell::default(),
            calls: RefCell::default(),
            fail_next: Cell::new(0),
            broken_folder: RefCell::new(None),
            sessions: RefCell::default(),
            visibility: Box::new(f),
        }
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }

    fn maybe_fail(&self) -> Result<(), RemoteError> {
        let n = self.fail_next.get();
        if n > 0 {
            self.fail_next.set(n - 1);
            return Err(RemoteError::Transport("connection reset".into()));
        }
        Ok(())
    }

    fn session_data(&self, session: &UploadSession) -> Result<Vec<u8>, RemoteError> {
        let sessions = self.sessions.borrow();
        let data = sessions
            .get(&session.session_id)
            .ok_or_else(|| RemoteError::NotFound(session.session_id.clone()))?;
        if data.len() as u64 != session.cursor_offset {
            return Err(RemoteError::Api {
                status: 409,
                summary: format!("incorrect_offset/{}", data.len()),
            });
        }
        Ok(data.clone())
    }
}

impl RemoteStore for FakeRemote {
    fn create_folder(&self, path: &str) -> Result<(), RemoteError> {
        self.record(format!("mkdir {}", path));
        if self.broken_folder.borrow().as_deref() == Some(path) {
            return Err(RemoteError::Api { status: 403, summary: "no_write_permission".into() });
        }
        if !self.folders.borrow_mut().insert(path.to_string()) {
            return Err(RemoteError::AlreadyExists(path.to_string()));
        }
        Ok(())
    }

    fn exists(&self, path: &str) -> Result<bool, RemoteError> {
        self.record(format!("exists {}", path));
        Ok(self.files.borrow().contains_key(path) || (self.visibility)(path))
    }

    fn upload(&self, data: &[u8], path: &str) -> Result<(), RemoteError> {
        self.record(format!("upload {} {}", path, data.len()));
        self.maybe_fail()?;
        self.files.borrow_mut().insert(path.to_string(), data.to_vec());
        Ok(())
    }

    fn session_start(&self, chunk: &[u8]) -> Result<String, RemoteError> {
        self.record(format!("start {}", chunk.len()));
        self.maybe_fail()?;
        let id = format!("s{}", self.sessions.borrow().len() + 1);
        self.sessions.borrow_mut().insert(id.clone(), chunk.to_vec());
        Ok(id)
    }

    fn session_append(&self, chunk: &[u8], session: &UploadSession) -> Result<(), RemoteError> {
        self.record(format!("append {}+{}", session.cursor_offset, chunk.len()));
        self.maybe_fail()?;
        let mut data = self.session_data(session)?;
        data.extend_from_slice(chunk);
        self.sessions.borrow_mut().insert(session.session_id.clone(), data);
        Ok(())
    }

    fn session_finish(&self, chunk: &[u8], session: &UploadSession) -> Result<(), RemoteError> {
        self.record(format!(
            "finish {}+{} {}",
            session.cursor_offset,
            chunk.len(),
            session.remote_path
        ));
        self.maybe_fail()?;
        let mut data = self.session_data(session)?;
        data.extend_from_slice(chunk);
        self.files.borrow_mut().insert(session.remote_path.clone(), data);
        Ok(())
    }
}

pub fn write_pattern(path: &Path, len: usize, seed: u8) -> Vec<u8> {
    let data: Vec<u8> = (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }
    std::fs::write(path, &data).unwrap();
    data
}
