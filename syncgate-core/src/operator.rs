use anyhow::Result;

/// Situations that pause the pipeline until a person intervenes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AckReason {
    SyncClientDown { process: String, found: usize },
    DiskFull { free: u64, needed: u64 },
    SyncClientBusy { waited_secs: u64 },
    BatchIncomplete { batch: usize, total: usize, remaining: usize },
}

impl AckReason {
    /// Message code in the Fluent resource.
    pub fn code(&self) -> &'static str {
        match self {
            AckReason::SyncClientDown { .. } => "prompt-sync-client-down",
            AckReason::DiskFull { .. } => "prompt-disk-full",
            AckReason::SyncClientBusy { .. } => "prompt-sync-client-busy",
            AckReason::BatchIncomplete { .. } => "prompt-batch-incomplete",
        }
    }

    pub fn args(&self) -> Vec<(&'static str, String)> {
        match self {
            AckReason::SyncClientDown { process, found } => {
                vec![("process", process.clone()), ("found", found.to_string())]
            }
            AckReason::DiskFull { free, needed } => {
                vec![("free", crate::runlog::gib(*free)), ("needed", crate::runlog::gib(*needed))]
            }
            AckReason::SyncClientBusy { waited_secs } => vec![("waited", waited_secs.to_string())],
            AckReason::BatchIncomplete { batch, total, remaining } => vec![
                ("batch", batch.to_string()),
                ("total", total.to_string()),
                ("remaining", remaining.to_string()),
            ],
        }
    }
}

/// Human-in-the-loop checkpoint supplied by the host application.
///
/// `acknowledge` blocks until the operator lets the run resume. An error
/// aborts the run (for example when the console input is closed).
pub trait Operator {
    fn acknowledge(&self, reason: &AckReason) -> Result<()>;
}
