use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use syncgate_core::api_upload::{ApiConfig, ApiUploader};
use syncgate_core::batch::BatchState;
use syncgate_core::batch_upload::{BatchUploader, UploadConfig};
use syncgate_core::clock::SystemClock;
use syncgate_core::config::{parse_size, Config, MissingSourcePolicy};
use syncgate_core::gate::{Fs2Space, GateConfig, GateVerdict, ResourceGate, SysinfoProbe};
use syncgate_core::localize::FluentLoc;
use syncgate_core::manifest::{read_manifest, Expander};
use syncgate_core::operator::{AckReason, Operator};
use syncgate_core::path_convention::PathConvention;
use syncgate_core::pipeline;
use syncgate_core::progress::Progress;
use syncgate_core::remote::RemoteStore;
use syncgate_core::runlog::{timestamp, FileSink, LineSink, NullSink, RunLog};
use syncgate_core::split::{join_parts, split_oversized, SplitConfig};

mod dropbox;

#[derive(Parser)]
#[command(
    name = "syncgate",
    version,
    about = "Batch uploads of large data trees through a cloud-sync folder"
)]
struct Cli {
    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print a progress heartbeat on stderr
    #[arg(long, global = true, default_value_t = false)]
    progress: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Args, Clone, Default)]
struct Overrides {
    #[arg(long)]
    sync_root: Option<PathBuf>,
    /// Batch size ceiling, e.g. 500G
    #[arg(long)]
    batch_size: Option<String>,
    /// Files above this size are split, e.g. 100G
    #[arg(long)]
    file_size_limit: Option<String>,
    /// Memory buffer for splitting, e.g. 1G
    #[arg(long)]
    read_chunk: Option<String>,
    /// Chunk size for API upload sessions, e.g. 128M
    #[arg(long)]
    api_chunk: Option<String>,
    /// Treat missing manifest sources as errors instead of skipping them
    #[arg(long, default_value_t = false)]
    fail_on_missing: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Expand and batch a manifest without touching any file
    Plan {
        manifest: PathBuf,
        #[command(flatten)]
        o: Overrides,
    },
    /// Split oversized files listed in a manifest
    Split {
        manifest: PathBuf,
        #[command(flatten)]
        o: Overrides,
    },
    /// Reassemble a split file from its *_split_0001 part
    Join {
        first_part: PathBuf,
        #[arg(long, default_value_t = false)]
        delete_parts: bool,
        #[arg(long, default_value = "64M")]
        read_chunk: String,
    },
    /// Move batches into the sync folder, gated on the sync client
    Sync {
        manifest: PathBuf,
        #[command(flatten)]
        o: Overrides,
        /// Access token for remote verification
        #[arg(long, env = "SYNCGATE_TOKEN", hide_env_values = true)]
        token: Option<String>,
        /// Consider a batch done as soon as it is moved
        #[arg(long, default_value_t = false)]
        no_verify: bool,
    },
    /// Upload directly through the remote API
    Upload {
        manifest: PathBuf,
        #[command(flatten)]
        o: Overrides,
        #[arg(long, env = "SYNCGATE_TOKEN", hide_env_values = true)]
        token: String,
    },
    /// Evaluate the resource gate once and print the verdict
    Gate {
        #[command(flatten)]
        o: Overrides,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let progress = Progress::new(cli.progress);
    match cli.cmd {
        Cmd::Plan { manifest, o } => plan(&load_config(cli.config.as_deref(), &o)?, &manifest)?,
        Cmd::Split { manifest, o } => {
            split(&load_config(cli.config.as_deref(), &o)?, &manifest, &progress)?
        }
        Cmd::Join { first_part, delete_parts, read_chunk } => {
            join(&first_part, delete_parts, &read_chunk, &progress)?
        }
        Cmd::Sync { manifest, o, token, no_verify } => {
            let cfg = load_config(cli.config.as_deref(), &o)?;
            sync(&cfg, &manifest, token, no_verify, &progress)?
        }
        Cmd::Upload { manifest, o, token } => {
            upload(&load_config(cli.config.as_deref(), &o)?, &manifest, token, &progress)?
        }
        Cmd::Gate { o } => gate(&load_config(cli.config.as_deref(), &o)?)?,
    }
    Ok(())
}

fn load_config(path: Option<&Path>, o: &Overrides) -> Result<Config> {
    let mut cfg = match path {
        Some(p) => Config::load(p)?,
        None => Config::default(),
    };
    if let Some(r) = &o.sync_root {
        cfg.sync_root = r.clone();
    }
    if let Some(s) = &o.batch_size {
        cfg.batch_size = parse_size(s)?;
    }
    if let Some(s) = &o.file_size_limit {
        cfg.file_size_limit = parse_size(s)?;
    }
    if let Some(s) = &o.read_chunk {
        cfg.split_read_chunk = parse_size(s)?;
    }
    if let Some(s) = &o.api_chunk {
        cfg.api_chunk = parse_size(s)?;
    }
    if o.fail_on_missing {
        cfg.missing_source = MissingSourcePolicy::Fail;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Stage log under the configured log directory, one file per run.
fn stage_log(cfg: &Config, stage: &str) -> Result<FileSink> {
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = cfg.log_dir.join(format!("{stage}-{stamp}.log"));
    FileSink::open(&path).with_context(|| format!("open log {:?}", path))
}

/// Operator prompts on the terminal; Enter resumes.
struct ConsoleOperator {
    loc: FluentLoc,
}

impl Operator for ConsoleOperator {
    fn acknowledge(&self, reason: &AckReason) -> Result<()> {
        let mut err = std::io::stderr();
        write!(err, "{}\t{} ", timestamp(), self.loc.prompt(reason))?;
        err.flush()?;
        let mut line = String::new();
        if std::io::stdin().read_line(&mut line)? == 0 {
            bail!("input closed while waiting for operator ({})", reason.code());
        }
        Ok(())
    }
}

fn plan(cfg: &Config, manifest: &Path) -> Result<()> {
    let rows = read_manifest(manifest)?;
    let expander = Expander::from_config(cfg, PathConvention::native())?;
    let expansion = expander.expand(&rows)?;
    let oversized =
        expansion.entries.iter().filter(|e| e.size_bytes > cfg.file_size_limit).count();
    if oversized > 0 {
        eprintln!("{} file(s) exceed the file size limit and will be split first", oversized);
    }
    let plan = pipeline::plan(expansion, cfg.batch_size);
    let files: usize = plan.batches.iter().map(|b| b.len()).sum();
    eprintln!("{} file(s), {} batch(es)", files, plan.batches.len());
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}

fn split(cfg: &Config, manifest: &Path, progress: &Progress) -> Result<()> {
    let sink = stage_log(cfg, "prepare")?;
    let log = RunLog::new(&sink);
    let rows = read_manifest(manifest)?;
    let expander = Expander::from_config(cfg, PathConvention::native())?;
    let expansion = expander.expand(&rows)?;
    progress.start();
    let reports =
        split_oversized(&expansion.entries, &SplitConfig::from_config(cfg), log, progress);
    progress.stop();
    for r in reports? {
        println!("{}\t{} part(s)\tblake3 {}", r.source.display(), r.parts.len(), r.blake3_hex);
    }
    Ok(())
}

fn join(
    first_part: &Path,
    delete_parts: bool,
    read_chunk: &str,
    progress: &Progress,
) -> Result<()> {
    let chunk = parse_size(read_chunk)? as usize;
    progress.start();
    let report = join_parts(first_part, delete_parts, chunk, progress);
    progress.stop();
    let report = report?;
    println!(
        "{}\t{} part(s)\tblake3 {}",
        report.output.display(),
        report.parts.len(),
        report.blake3_hex
    );
    Ok(())
}

fn sync(
    cfg: &Config,
    manifest: &Path,
    token: Option<String>,
    no_verify: bool,
    progress: &Progress,
) -> Result<()> {
    if cfg.sync_root.as_os_str().is_empty() {
        bail!("sync requires --sync-root (or sync_root in the config)");
    }
    let remote = match (token, no_verify) {
        (_, true) => None,
        (Some(t), false) => Some(dropbox::DropboxHttp::new(t)?),
        (None, false) => bail!("remote verification needs --token (or pass --no-verify)"),
    };
    let sink = stage_log(cfg, "sync")?;
    let log = RunLog::new(&sink);

    let rows = read_manifest(manifest)?;
    let expander = Expander::from_config(cfg, PathConvention::native())?;
    progress.start();
    let split_cfg = SplitConfig::from_config(cfg);
    let prepared = pipeline::prepare(&rows, &expander, &split_cfg, log, progress);
    progress.stop();
    let prepared = prepared?;

    let clock = SystemClock::new();
    let operator = ConsoleOperator { loc: FluentLoc::builtin("en-GB")? };
    let probe = SysinfoProbe;
    let space = Fs2Space;
    let gate =
        ResourceGate::new(GateConfig::from_config(cfg), &probe, &space, &clock, &operator, log);
    let remote_ref = remote.as_ref().map(|r| r as &dyn RemoteStore);
    let upload_cfg = UploadConfig::from_config(cfg);
    let uploader = BatchUploader::new(upload_cfg, &gate, remote_ref, &clock, &operator, log);
    let outcomes = pipeline::sync_folder(prepared.expansion, cfg.batch_size, &uploader, log)?;

    let timed_out = outcomes.iter().filter(|o| o.state == BatchState::TimedOut).count();
    println!("{} batch(es) processed, {} timed out", outcomes.len(), timed_out);
    println!("Log: {}", sink.path().display());
    Ok(())
}

fn upload(cfg: &Config, manifest: &Path, token: String, progress: &Progress) -> Result<()> {
    let remote = dropbox::DropboxHttp::new(token)?;
    let sink = stage_log(cfg, "upload")?;
    let log = RunLog::new(&sink);

    let rows = read_manifest(manifest)?;
    let expander = Expander::from_config(cfg, PathConvention::native())?;
    let split_cfg = SplitConfig::from_config(cfg);
    let uploader = ApiUploader::new(ApiConfig::from_config(cfg), &remote, log, progress);
    progress.start();
    let report = pipeline::prepare(&rows, &expander, &split_cfg, log, progress)
        .and_then(|prepared| pipeline::api_upload(prepared.expansion, &uploader, log));
    progress.stop();
    let report = report?;

    println!("Uploaded {} file(s), failed {}", report.uploaded.len(), report.failed.len());
    for f in &report.failed {
        println!("FAILED\t{}", f.display());
    }
    Ok(())
}

fn gate(cfg: &Config) -> Result<()> {
    let null = NullSink;
    let sink: &dyn LineSink = &null;
    let clock = SystemClock::new();
    let operator = ConsoleOperator { loc: FluentLoc::builtin("en-GB")? };
    let (probe, space) = (SysinfoProbe, Fs2Space);
    let log = RunLog::new(sink);
    let gate_cfg = GateConfig::from_config(cfg);
    let gate = ResourceGate::new(gate_cfg, &probe, &space, &clock, &operator, log);
    match gate.evaluate() {
        GateVerdict::Open => println!("Gate: OPEN"),
        GateVerdict::SyncClientDown { found } => {
            println!("Gate: BLOCKED (sync client not running, {} process(es) found)", found)
        }
        GateVerdict::StorageLow { free, needed } => {
            println!("Gate: BLOCKED (free {} bytes < needed {} bytes)", free, needed)
        }
        GateVerdict::SyncClientBusy(Some(t)) => println!(
            "Gate: BLOCKED (sync client busy: read {:.3} MiB/s, write {:.3} MiB/s)",
            t.read_mib_s, t.write_mib_s
        ),
        GateVerdict::SyncClientBusy(None) => {
            println!("Gate: BLOCKED (sync client I/O unavailable)")
        }
    }
    Ok(())
}
