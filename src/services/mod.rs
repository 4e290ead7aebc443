//! Contracts for the collaborators the pipeline consumes, plus local
//! implementations that let the pipeline run without external services.
//!
//! Model-facing calls (summarizer, checker, carbon signal) are async and return
//! a boxed [`ServiceFuture`] so they can be held as `Arc<dyn Trait>` and driven
//! from spawned tasks. Storage, vector search and embedding are synchronous.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::reduce::CarbonReport;
use crate::state_machine::{Chunk, Document, DocumentSummary};
use crate::tier::Tier;

pub mod checker;
pub mod embedder;
pub mod extractive;
pub mod file_store;
pub mod memory;
pub mod signal;
pub mod text;
pub mod triage;

pub use checker::OverlapChecker;
pub use embedder::HashingEmbedder;
pub use extractive::ExtractiveSummarizer;
pub use file_store::FileStore;
pub use memory::{MemoryResultStore, MemoryVectorStore};
pub use signal::StaticSignalSource;
pub use triage::PlainTextTriage;

pub type ServiceFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Turns an uploaded document into ordered text chunks.
pub trait Triage: Send + Sync {
    /// Fails with `UnsupportedFormat` or `Extraction`.
    fn extract(&self, document: &Document) -> Result<Vec<Chunk>>;
}

/// One tier's model backend.
pub trait Summarizer: Send + Sync {
    /// Fails with `ModelUnavailable` or `Timeout`.
    fn summarize<'a>(&'a self, text: &'a str) -> ServiceFuture<'a, String>;

    /// Answers `question` using only `context`.
    fn answer<'a>(&'a self, question: &'a str, context: &'a [String])
    -> ServiceFuture<'a, String>;
}

/// Scores how well `summary` is supported by `source`, in [0, 1].
pub trait QualityChecker: Send + Sync {
    fn score<'a>(&'a self, source: &'a str, summary: &'a str) -> ServiceFuture<'a, f64>;
}

/// Current grid carbon intensity (gCO2/kWh) for a compute location.
pub trait CarbonSignalSource: Send + Sync {
    fn current_intensity<'a>(&'a self, location: &'a str) -> ServiceFuture<'a, f64>;
}

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;
    fn dimension(&self) -> usize;
}

/// A stored chunk returned by similarity search, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedChunk {
    pub chunk_id: String,
    pub text: String,
    pub score: f32,
}

/// One chunk's embedding, ready to index.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkVector {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub text: String,
}

pub trait VectorStore: Send + Sync {
    fn upsert(
        &self,
        document_id: &str,
        chunk_id: &str,
        embedding: Vec<f32>,
        text: &str,
    ) -> Result<()>;

    /// Indexes a whole document's chunks. Stores that persist per document
    /// override this to write once.
    fn upsert_many(&self, document_id: &str, vectors: Vec<ChunkVector>) -> Result<()> {
        for v in vectors {
            self.upsert(document_id, &v.chunk_id, v.embedding, &v.text)?;
        }
        Ok(())
    }

    fn top_k(&self, document_id: &str, query: &[f32], k: usize) -> Result<Vec<RankedChunk>>;

    /// Drops every vector of a document. Unknown documents are not an error.
    fn remove_document(&self, document_id: &str) -> Result<()>;
}

/// Everything a completed job leaves behind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    pub summary: DocumentSummary,
    pub report: CarbonReport,
    pub stored_at: DateTime<Utc>,
}

/// One row of the processed-documents listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub job_id: String,
    pub document_id: String,
    pub total_chunks: usize,
    pub carbon_saved_grams: f64,
    pub efficiency: f64,
    pub stored_at: DateTime<Utc>,
}

impl From<&JobOutput> for DocumentRecord {
    fn from(output: &JobOutput) -> Self {
        Self {
            job_id: output.summary.job_id.clone(),
            document_id: output.summary.document_id.clone(),
            total_chunks: output.report.total_chunks,
            carbon_saved_grams: output.report.savings_grams,
            efficiency: output.report.efficiency,
            stored_at: output.stored_at,
        }
    }
}

/// Aggregate numbers across every stored job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    pub documents: usize,
    pub chunks: usize,
    pub carbon_saved_grams: f64,
    pub mean_efficiency: f64,
}

pub trait ResultStore: Send + Sync {
    fn persist_result(&self, summary: &DocumentSummary, report: &CarbonReport) -> Result<()>;

    fn load_result(&self, job_id: &str) -> Result<Option<JobOutput>>;

    /// Deletes a persisted result. Unknown jobs are not an error.
    fn remove_result(&self, job_id: &str) -> Result<()>;

    /// Stored documents, most recent first.
    fn list_documents(&self) -> Result<Vec<DocumentRecord>>;

    fn dashboard_stats(&self) -> Result<DashboardStats> {
        let records = self.list_documents()?;
        if records.is_empty() {
            return Ok(DashboardStats::default());
        }
        let documents = records.len();
        let chunks = records.iter().map(|r| r.total_chunks).sum();
        let carbon_saved_grams = records.iter().map(|r| r.carbon_saved_grams).sum();
        let mean_efficiency =
            records.iter().map(|r| r.efficiency).sum::<f64>() / documents as f64;
        Ok(DashboardStats {
            documents,
            chunks,
            carbon_saved_grams,
            mean_efficiency,
        })
    }
}

/// The three tier backends, indexed by [`Tier`].
#[derive(Clone)]
pub struct TierModels {
    light: Arc<dyn Summarizer>,
    medium: Arc<dyn Summarizer>,
    large: Arc<dyn Summarizer>,
}

impl TierModels {
    pub fn new(
        light: Arc<dyn Summarizer>,
        medium: Arc<dyn Summarizer>,
        large: Arc<dyn Summarizer>,
    ) -> Self {
        Self {
            light,
            medium,
            large,
        }
    }

    /// Builds every tier from one constructor.
    pub fn from_fn(mut make: impl FnMut(Tier) -> Arc<dyn Summarizer>) -> Self {
        Self::new(make(Tier::Light), make(Tier::Medium), make(Tier::Large))
    }

    pub fn get(&self, tier: Tier) -> &Arc<dyn Summarizer> {
        match tier {
            Tier::Light => &self.light,
            Tier::Medium => &self.medium,
            Tier::Large => &self.large,
        }
    }
}
