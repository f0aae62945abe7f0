use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{Config, ProcessCount, MIB};
use crate::operator::{AckReason, Operator};
use crate::runlog::RunLog;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IoSample {
    pub pid: u32,
    pub read_bytes: u64,
    pub written_bytes: u64,
}

/// Process introspection for the sync client.
pub trait ProcessProbe {
    fn count(&self, name: &str) -> Result<usize>;
    fn io_samples(&self, name: &str) -> Result<Vec<IoSample>>;
}

pub trait SpaceProbe {
    fn free_bytes(&self, path: &Path) -> Result<u64>;
}

pub struct SysinfoProbe;

impl SysinfoProbe {
    fn snapshot(&self) -> Result<sysinfo::System> {
        if !sysinfo::IS_SUPPORTED_SYSTEM {
            bail!("process introspection is not supported on this system");
        }
        let mut sys = sysinfo::System::new();
        sys.refresh_processes_specifics(sysinfo::ProcessRefreshKind::new().with_disk_usage());
        Ok(sys)
    }
}

impl ProcessProbe for SysinfoProbe {
    fn count(&self, name: &str) -> Result<usize> {
        let sys = self.snapshot()?;
        let n = sys.processes().values().filter(|p| p.name() == name).count();
        Ok(n)
    }

    fn io_samples(&self, name: &str) -> Result<Vec<IoSample>> {
        let sys = self.snapshot()?;
        let samples = sys
            .processes()
            .values()
            .filter(|p| p.name() == name)
            .map(|p| {
                let du = p.disk_usage();
                IoSample {
                    pid: p.pid().as_u32(),
                    read_bytes: du.total_read_bytes,
                    written_bytes: du.total_written_bytes,
                }
            })
            .collect();
        Ok(samples)
    }
}

pub struct Fs2Space;

impl SpaceProbe for Fs2Space {
    fn free_bytes(&self, path: &Path) -> Result<u64> {
        fs2::available_space(path).with_context(|| format!("free space of {:?}", path))
    }
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    pub process_name: String,
    pub expected: ProcessCount,
    pub sync_root: PathBuf,
    pub required_free: u64,
    pub idle_sample: Duration,
    pub idle_cutoff_mib_s: f64,
    pub busy_escalation: Option<Duration>,
}

impl GateConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            process_name: cfg.sync_client.process_name.clone(),
            expected: cfg.sync_client.expected,
            sync_root: cfg.sync_root.clone(),
            // room for this batch and the next
            required_free: cfg.batch_size.saturating_mul(2),
            idle_sample: cfg.idle_sample(),
            idle_cutoff_mib_s: cfg.idle_cutoff_mib_s,
            busy_escalation: cfg.busy_escalation(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Throughput {
    pub read_mib_s: f64,
    pub write_mib_s: f64,
}

impl Throughput {
    pub fn is_below(&self, cutoff: f64) -> bool {
        self.read_mib_s < cutoff && self.write_mib_s < cutoff
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum GateVerdict {
    Open,
    SyncClientDown { found: usize },
    StorageLow { free: u64, needed: u64 },
    /// `None` when the client's counters could not be sampled.
    SyncClientBusy(Option<Throughput>),
}

impl GateVerdict {
    pub fn is_open(&self) -> bool {
        matches!(self, GateVerdict::Open)
    }
}

/// Preconditions for releasing the next batch into the sync folder.
pub struct ResourceGate<'a> {
    cfg: GateConfig,
    probe: &'a dyn ProcessProbe,
    space: &'a dyn SpaceProbe,
    clock: &'a dyn Clock,
    operator: &'a dyn Operator,
    log: RunLog<'a>,
}

impl<'a> ResourceGate<'a> {
    pub fn new(
        cfg: GateConfig,
        probe: &'a dyn ProcessProbe,
        space: &'a dyn SpaceProbe,
        clock: &'a dyn Clock,
        operator: &'a dyn Operator,
        log: RunLog<'a>,
    ) -> Self {
        Self { cfg, probe, space, clock, operator, log }
    }

    pub fn config(&self) -> &GateConfig {
        &self.cfg
    }

    fn process_count(&self) -> Option<usize> {
        match self.probe.count(&self.cfg.process_name) {
            Ok(n) => Some(n),
            Err(e) => {
                tracing::warn!(error = %e, "process count unavailable");
                None
            }
        }
    }

    fn free_bytes(&self) -> u64 {
        match self.space.free_bytes(&self.cfg.sync_root) {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "free space unavailable");
                0
            }
        }
    }

    pub fn sync_client_running(&self) -> bool {
        self.process_count().is_some_and(|n| self.cfg.expected.accepts(n))
    }

    pub fn storage_free(&self) -> bool {
        self.free_bytes() >= self.cfg.required_free
    }

    /// `None` when no process could be sampled both times.
    pub fn measure_throughput(&self) -> Option<Throughput> {
        let before = match self.probe.io_samples(&self.cfg.process_name) {
            Ok(s) if !s.is_empty() => s,
            Ok(_) => return None,
            Err(e) => {
                tracing::warn!(error = %e, "I/O counters unavailable");
                return None;
            }
        };
        self.clock.sleep(self.cfg.idle_sample);
        let after = match self.probe.io_samples(&self.cfg.process_name) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "I/O counters unavailable");
                return None;
            }
        };
        let secs = self.cfg.idle_sample.as_secs_f64();
        if secs <= 0.0 {
            return None;
        }
        let mut out: Option<Throughput> = None;
        for a in &after {
            let Some(b) = before.iter().find(|b| b.pid == a.pid) else {
                continue;
            };
            let read = a.read_bytes.saturating_sub(b.read_bytes) as f64 / MIB as f64 / secs;
            let write = a.written_bytes.saturating_sub(b.written_bytes) as f64 / MIB as f64 / secs;
            let t = out.get_or_insert(Throughput { read_mib_s: 0.0, write_mib_s: 0.0 });
            t.read_mib_s = t.read_mib_s.max(read);
            t.write_mib_s = t.write_mib_s.max(write);
        }
        out
    }

    pub fn sync_client_idle(&self) -> bool {
        self.measure_throughput().is_some_and(|t| t.is_below(self.cfg.idle_cutoff_mib_s))
    }

    pub fn evaluate(&self) -> GateVerdict {
        let found = self.process_count();
        if !found.is_some_and(|n| self.cfg.expected.accepts(n)) {
            return GateVerdict::SyncClientDown { found: found.unwrap_or(0) };
        }
        let free = self.free_bytes();
        if free < self.cfg.required_free {
            return GateVerdict::StorageLow { free, needed: self.cfg.required_free };
        }
        match self.measure_throughput() {
            Some(t) if t.is_below(self.cfg.idle_cutoff_mib_s) => GateVerdict::Open,
            t => {
                tracing::debug!(throughput = ?t, "sync client busy");
                GateVerdict::SyncClientBusy(t)
            }
        }
    }

    /// Evaluate, and block on the operator when the client is down or the disk
    /// is full.
    pub fn check(&self) -> Result<GateVerdict> {
        let verdict = self.evaluate();
        match &verdict {
            GateVerdict::SyncClientDown { found } => {
                self.log.event("Sync client not running");
                self.operator.acknowledge(&AckReason::SyncClientDown {
                    process: self.cfg.process_name.clone(),
                    found: *found,
                })?;
            }
            GateVerdict::StorageLow { free, needed } => {
                self.log.event("Disk full");
                self.operator.acknowledge(&AckReason::DiskFull { free: *free, needed: *needed })?;
            }
            _ => {}
        }
        Ok(verdict)
    }

    /// Loop until the gate opens. There is no iteration cap; operator prompts
    /// are the only way out other than an error.
    pub fn wait_until_open(&self) -> Result<()> {
        let mut busy_since: Option<Duration> = None;
        loop {
            match self.check()? {
                GateVerdict::Open => return Ok(()),
                GateVerdict::SyncClientBusy(_) => {
                    let now = self.clock.now();
                    let since = *busy_since.get_or_insert(now);
                    if let Some(limit) = self.cfg.busy_escalation {
                        let waited = now.saturating_sub(since);
                        if waited >= limit {
                            self.log.event("Sync client busy");
                            self.operator.acknowledge(&AckReason::SyncClientBusy {
                                waited_secs: waited.as_secs(),
                            })?;
                            busy_since = Some(self.clock.now());
                        }
                    }
                }
                _ => busy_since = None,
            }
        }
    }
}
