use thiserror::Error;

use crate::state_machine::JobState;
use crate::tier::Tier;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("{tier} model unavailable: {message}")]
    ModelUnavailable { tier: Tier, message: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("job {job_id} is not ready (state: {state})")]
    NotReady { job_id: String, state: JobState },

    #[error("cancelled")]
    Cancelled,

    #[error("chunk {index} failed at ceiling tier {tier}: {source}")]
    Chunk {
        index: usize,
        tier: Tier,
        source: Box<PipelineError>,
    },

    #[error("storage error: {0}")]
    Storage(String),

    /// A spawned pipeline task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    /// Chunk-level failures that are absorbed into an escalation decision
    /// instead of failing the job outright.
    pub fn is_escalatable(&self) -> bool {
        matches!(
            self,
            PipelineError::ModelUnavailable { .. } | PipelineError::Timeout { .. }
        )
    }

    pub fn timeout(operation: impl Into<String>, timeout: std::time::Duration) -> Self {
        PipelineError::Timeout {
            operation: operation.into(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}
