use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state::JobState;
use crate::error::PipelineError;
use crate::reduce::CarbonReport;
use crate::tier::Tier;

/// Requested trade-off between carbon cost and summary quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Eco,
    Balanced,
    Quality,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Eco => write!(f, "eco"),
            Strategy::Balanced => write!(f, "balanced"),
            Strategy::Quality => write!(f, "quality"),
        }
    }
}

impl FromStr for Strategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "eco" => Ok(Strategy::Eco),
            "balanced" => Ok(Strategy::Balanced),
            "quality" => Ok(Strategy::Quality),
            other => Err(PipelineError::InvalidInput(format!(
                "unknown strategy '{other}' (expected eco, balanced or quality)"
            ))),
        }
    }
}

/// An uploaded document as handed to `submit`.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    /// Original file name; triage uses its extension as a format hint.
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.iter().all(u8::is_ascii_whitespace)
    }
}

/// A contiguous span of a document's extracted text. Never mutated after triage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub byte_len: usize,
}

impl Chunk {
    pub fn new(index: usize, text: impl Into<String>) -> Self {
        let text = text.into();
        let byte_len = text.len();
        Self {
            index,
            text,
            byte_len,
        }
    }

    /// Stable identifier used for vector upserts and citations.
    pub fn id(&self, document_id: &str) -> String {
        format!("{document_id}_chunk_{}", self.index)
    }
}

/// Final outcome of summarizing one chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub summary: String,
    /// Tier that produced `summary`.
    pub tier: Tier,
    /// Tier the router picked before any escalation.
    pub initial_tier: Tier,
    pub escalations: u8,
    pub confidence: f64,
    /// Grams CO2e charged for the final tier.
    pub carbon_grams: f64,
    /// Source characters sent to the model, summed over every attempt.
    pub chars_processed: usize,
    /// Token estimate of the chunk's source text.
    pub source_tokens: u64,
}

/// Why and where a job stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub stage: JobState,
    pub cause: String,
}

impl fmt::Display for JobFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed during {}: {}", self.stage, self.cause)
    }
}

/// The reduced, order-preserving document summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub job_id: String,
    pub document_id: String,
    pub text: String,
}

/// A summarization job, owned by exactly one orchestrator task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub document_id: String,
    pub strategy: Strategy,
    pub state: JobState,
    pub state_history: Vec<JobState>,
    pub chunk_results: Vec<ChunkResult>,
    pub summary: Option<DocumentSummary>,
    pub report: Option<CarbonReport>,
    pub failure: Option<JobFailure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(document_id: String, strategy: Strategy) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            document_id,
            strategy,
            state: JobState::Queued,
            state_history: Vec::new(),
            chunk_results: Vec::new(),
            summary: None,
            report: None,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Point-in-time view of a job, as returned by `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatus {
    pub job_id: String,
    pub document_id: String,
    pub strategy: Strategy,
    pub state: JobState,
    /// Fraction of work done, in [0, 1].
    pub progress: f64,
    pub message: String,
    pub failure: Option<JobFailure>,
    /// States passed through before the current one.
    pub state_history: Vec<JobState>,
    pub updated_at: DateTime<Utc>,
}

impl JobStatus {
    pub fn queued(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            document_id: job.document_id.clone(),
            strategy: job.strategy,
            state: job.state,
            progress: 0.0,
            message: "Queued".to_string(),
            failure: None,
            state_history: job.state_history.clone(),
            updated_at: job.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_creation_defaults() {
        let job = Job::new("doc-1".into(), Strategy::Eco);
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.strategy, Strategy::Eco);
        assert!(job.state_history.is_empty());
        assert!(job.chunk_results.is_empty());
        assert!(job.failure.is_none());
        assert_eq!(job.created_at, job.updated_at);
    }

    #[test]
    fn strategy_parsing() {
        assert_eq!("eco".parse::<Strategy>().unwrap(), Strategy::Eco);
        assert_eq!(" Balanced ".parse::<Strategy>().unwrap(), Strategy::Balanced);
        assert_eq!("QUALITY".parse::<Strategy>().unwrap(), Strategy::Quality);

        let err = "turbo".parse::<Strategy>().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
        assert!(err.to_string().contains("turbo"));
    }

    #[test]
    fn chunk_records_byte_length() {
        let chunk = Chunk::new(3, "héllo");
        assert_eq!(chunk.byte_len, 6);
        assert_eq!(chunk.id("doc"), "doc_chunk_3");
    }

    #[test]
    fn whitespace_document_is_empty() {
        assert!(Document::new("a.txt", b"  \n\t ".to_vec()).is_empty());
        assert!(Document::new("a.txt", Vec::new()).is_empty());
        assert!(!Document::new("a.txt", b"text".to_vec()).is_empty());
    }

    #[test]
    fn failure_display() {
        let failure = JobFailure {
            stage: JobState::Mapping,
            cause: "cancelled".into(),
        };
        assert_eq!(failure.to_string(), "failed during mapping: cancelled");
    }

    #[test]
    fn job_serialization_roundtrip() {
        let job = Job::new("doc-9".into(), Strategy::Quality);
        let json = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.state, JobState::Queued);
        assert_eq!(parsed.strategy, Strategy::Quality);
    }
}
