use chrono::{DateTime, Utc};
use std::future::Future;
use thiserror::Error;

pub mod curl;

/// Why a probe process did not finish cleanly. Flattened to a string on the
/// persisted record.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to spawn probe: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("probe process failed: {0}")]
    Wait(std::io::Error),
    #[error("probe timed out after {0}s")]
    Timeout(u64),
    #[error("probe exited with {status}: {stderr}")]
    Exit { status: String, stderr: String },
}

/// Raw result of one probe invocation. Failure is data here, not control flow.
#[derive(Debug)]
pub struct ProbeOutput {
    pub stdout: String,
    pub error: Option<ProbeError>,
    pub completed_at: DateTime<Utc>,
}

impl ProbeOutput {
    pub fn new(stdout: String, error: Option<ProbeError>) -> Self {
        Self {
            stdout,
            error,
            completed_at: Utc::now(),
        }
    }
}

/// Something that can run one timed request against a URL and hand back
/// headers plus the metrics footer as text.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, url: &str) -> impl Future<Output = ProbeOutput> + Send;
}
