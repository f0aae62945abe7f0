use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;

/// What to do with a manifest row whose source path does not exist.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingSourcePolicy {
    #[default]
    Skip,
    Fail,
}

/// Accepted number of running sync-client processes.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessCount {
    pub min: usize,
    pub max: Option<usize>,
}

impl ProcessCount {
    pub fn accepts(&self, n: usize) -> bool {
        n >= self.min && self.max.map_or(true, |max| n <= max)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SyncClientConfig {
    pub process_name: String,
    pub expected: ProcessCount,
}

impl Default for SyncClientConfig {
    fn default() -> Self {
        // The desktop client runs as three processes on Windows.
        if cfg!(windows) {
            Self {
                process_name: "Dropbox.exe".into(),
                expected: ProcessCount { min: 3, max: Some(3) },
            }
        } else {
            Self { process_name: "dropbox".into(), expected: ProcessCount { min: 1, max: None } }
        }
    }
}

/// Run configuration. Sizes are bytes, intervals are seconds.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Local folder mirrored by the sync client.
    pub sync_root: PathBuf,
    pub batch_size: u64,
    pub file_size_limit: u64,
    pub split_read_chunk: u64,
    pub api_chunk: u64,
    pub api_max_attempts: u32,
    pub verify_interval_secs: u64,
    pub batch_time_limit_secs: u64,
    pub idle_sample_secs: u64,
    pub idle_cutoff_mib_s: f64,
    /// Ask the operator once the client has stayed busy this long.
    pub busy_escalation_secs: Option<u64>,
    pub missing_source: MissingSourcePolicy,
    pub sync_client: SyncClientConfig,
    /// Extra file-name globs excluded from directory walks.
    pub exclude: Vec<String>,
    pub log_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_root: PathBuf::new(),
            batch_size: 500 * GIB,
            file_size_limit: 100 * GIB,
            split_read_chunk: GIB,
            api_chunk: 128 * MIB,
            api_max_attempts: 3,
            verify_interval_secs: 30 * 60,
            batch_time_limit_secs: 12 * 60 * 60,
            idle_sample_secs: 120,
            idle_cutoff_mib_s: 0.5,
            busy_escalation_secs: None,
            missing_source: MissingSourcePolicy::Skip,
            sync_client: SyncClientConfig::default(),
            exclude: Vec::new(),
            log_dir: PathBuf::from("logs"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let f = File::open(path).with_context(|| format!("open config {:?}", path))?;
        let cfg: Config =
            serde_json::from_reader(f).with_context(|| format!("parse config {:?}", path))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be positive");
        }
        if self.file_size_limit == 0 || self.split_read_chunk == 0 {
            bail!("file_size_limit and split_read_chunk must be positive");
        }
        if self.split_read_chunk > usize::MAX as u64 || self.api_chunk > usize::MAX as u64 {
            bail!("chunk sizes must fit in memory");
        }
        if self.api_chunk == 0 {
            bail!("api_chunk must be positive");
        }
        if self.api_max_attempts == 0 {
            bail!("api_max_attempts must be at least 1");
        }
        if self.idle_sample_secs == 0 {
            bail!("idle_sample_secs must be positive");
        }
        if !(self.idle_cutoff_mib_s > 0.0) {
            bail!("idle_cutoff_mib_s must be positive");
        }
        Ok(())
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_secs(self.verify_interval_secs)
    }

    pub fn batch_time_limit(&self) -> Duration {
        Duration::from_secs(self.batch_time_limit_secs)
    }

    pub fn idle_sample(&self) -> Duration {
        Duration::from_secs(self.idle_sample_secs)
    }

    pub fn busy_escalation(&self) -> Option<Duration> {
        self.busy_escalation_secs.map(Duration::from_secs)
    }
}

/// Parse a byte size such as `512`, `64K`, `128M`, `4G` or `1T` (binary units).
pub fn parse_size(text: &str) -> Result<u64> {
    let s = text.trim().to_uppercase();
    let s = s.strip_suffix("IB").or_else(|| s.strip_suffix('B')).unwrap_or(s.as_str());
    let (num, mul) = if let Some(n) = s.strip_suffix('K') {
        (n, KIB)
    } else if let Some(n) = s.strip_suffix('M') {
        (n, MIB)
    } else if let Some(n) = s.strip_suffix('G') {
        (n, GIB)
    } else if let Some(n) = s.strip_suffix('T') {
        (n, GIB * 1024)
    } else {
        (s, 1)
    };
    let v: u64 = num.trim().parse().with_context(|| format!("bad size {:?}", text))?;
    v.checked_mul(mul).with_context(|| format!("size overflows: {:?}", text))
}
