use anyhow::{Context, Result};
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::batch::{Batch, BatchState};
use crate::clock::Clock;
use crate::config::Config;
use crate::gate::ResourceGate;
use crate::operator::{AckReason, Operator};
use crate::remote::RemoteStore;
use crate::runlog::{gib, RunLog};

#[derive(Clone, Copy, Debug)]
pub struct UploadConfig {
    pub verify_interval: Duration,
    pub batch_time_limit: Duration,
}

impl UploadConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self { verify_interval: cfg.verify_interval(), batch_time_limit: cfg.batch_time_limit() }
    }
}

#[derive(Serialize, Clone, Debug, PartialEq)]
pub struct BatchOutcome {
    pub index: usize,
    pub files: usize,
    pub bytes: u64,
    pub state: BatchState,
    /// Remote paths still unconfirmed when the batch was resolved.
    pub unconfirmed: Vec<String>,
}

/// Move `src` to `dst`, falling back to copy + delete when a rename is not
/// possible (different volumes).
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if let Err(rename_err) = fs::rename(src, dst) {
        tracing::debug!(error = %rename_err, "rename failed; copying");
        fs::copy(src, dst)
            .with_context(|| format!("move {:?} -> {:?} (rename: {})", src, dst, rename_err))?;
        fs::remove_file(src).with_context(|| format!("remove moved source {:?}", src))?;
    }
    Ok(())
}

/// Moves batches into the sync folder one at a time and confirms each one on
/// the remote side.
///
/// Confirmation of batch i-1 is deferred until batch i has passed the gate, so
/// remote propagation overlaps the gate's idle sampling. The last batch is
/// confirmed after the loop.
pub struct BatchUploader<'a> {
    cfg: UploadConfig,
    gate: &'a ResourceGate<'a>,
    remote: Option<&'a dyn RemoteStore>,
    clock: &'a dyn Clock,
    operator: &'a dyn Operator,
    log: RunLog<'a>,
}

impl<'a> BatchUploader<'a> {
    pub fn new(
        cfg: UploadConfig,
        gate: &'a ResourceGate<'a>,
        remote: Option<&'a dyn RemoteStore>,
        clock: &'a dyn Clock,
        operator: &'a dyn Operator,
        log: RunLog<'a>,
    ) -> Self {
        Self { cfg, gate, remote, clock, operator, log }
    }

    pub fn run(&self, batches: &[Batch]) -> Result<Vec<BatchOutcome>> {
        let total = batches.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut in_flight: Option<(&Batch, Duration)> = None;
        for batch in batches {
            self.gate.wait_until_open()?;
            if let Some((prev, started)) = in_flight.take() {
                outcomes.push(self.verify(prev, started, total)?);
            }
            let started = self.clock.now();
            self.move_batch(batch, total)?;
            in_flight = Some((batch, started));
        }
        if let Some((prev, started)) = in_flight.take() {
            outcomes.push(self.verify(prev, started, total)?);
        }
        Ok(outcomes)
    }

    fn move_batch(&self, batch: &Batch, total: usize) -> Result<()> {
        tracing::info!(batch = batch.index + 1, total, state = ?BatchState::Moving, "uploading batch");
        self.log.event(&format!("Uploading batch {}/{}", batch.index + 1, total));
        for e in &batch.entries {
            tracing::debug!(src = %e.source_path.display(), dst = %e.local_dest_path.display(), "moving");
            self.log.event(&format!(
                "{}\t{}\t{}",
                e.source_path.display(),
                e.local_dest_path.display(),
                gib(e.size_bytes)
            ));
            move_file(&e.source_path, &e.local_dest_path)?;
        }
        Ok(())
    }

    fn verify(&self, batch: &Batch, started: Duration, total: usize) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome {
            index: batch.index,
            files: batch.len(),
            bytes: batch.total_bytes(),
            state: BatchState::Verifying,
            unconfirmed: Vec::new(),
        };
        let Some(remote) = self.remote else {
            outcome.state = BatchState::Complete;
            return Ok(outcome);
        };

        let mut pending: Vec<&str> =
            batch.entries.iter().map(|e| e.remote_canonical_path.as_str()).collect();
        loop {
            pending.retain(|p| match remote.exists(p) {
                Ok(true) => {
                    tracing::info!(path = %p, "upload confirmed");
                    false
                }
                Ok(false) => true,
                Err(e) => {
                    tracing::warn!(path = %p, error = %e, "remote lookup failed");
                    true
                }
            });
            if pending.is_empty() {
                outcome.state = BatchState::Complete;
                self.log.event(&format!("Batch {}/{} uploaded", batch.index + 1, total));
                return Ok(outcome);
            }
            let elapsed = self.clock.now().saturating_sub(started);
            if elapsed >= self.cfg.batch_time_limit {
                tracing::warn!(batch = batch.index + 1, remaining = pending.len(), "batch timed out");
                self.log.event("Current batch upload incomplete");
                self.operator.acknowledge(&AckReason::BatchIncomplete {
                    batch: batch.index + 1,
                    total,
                    remaining: pending.len(),
                })?;
                outcome.state = BatchState::TimedOut;
                outcome.unconfirmed = pending.iter().map(|p| p.to_string()).collect();
                return Ok(outcome);
            }
            tracing::debug!(remaining = pending.len(), "upload ongoing");
            self.clock.sleep(self.cfg.verify_interval);
        }
    }
}
