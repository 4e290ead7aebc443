//! In-process stores for tests and library embedding.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::embedder::cosine_similarity;
use super::{DocumentRecord, JobOutput, RankedChunk, ResultStore, VectorStore};
use crate::error::{PipelineError, Result};
use crate::reduce::CarbonReport;
use crate::state_machine::DocumentSummary;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredVector {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    pub text: String,
}

/// Replaces an entry with the same chunk id, otherwise appends.
pub(crate) fn upsert_entry(entries: &mut Vec<StoredVector>, entry: StoredVector) {
    match entries.iter_mut().find(|e| e.chunk_id == entry.chunk_id) {
        Some(existing) => *existing = entry,
        None => entries.push(entry),
    }
}

/// Top `k` entries by cosine similarity; ties keep insertion order.
pub(crate) fn rank(entries: &[StoredVector], query: &[f32], k: usize) -> Vec<RankedChunk> {
    let mut ranked: Vec<RankedChunk> = entries
        .iter()
        .map(|e| RankedChunk {
            chunk_id: e.chunk_id.clone(),
            text: e.text.clone(),
            score: cosine_similarity(&e.embedding, query),
        })
        .collect();
    ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
    ranked.truncate(k);
    ranked
}

fn poisoned() -> PipelineError {
    PipelineError::Storage("store lock poisoned".to_string())
}

#[derive(Default)]
pub struct MemoryVectorStore {
    documents: RwLock<HashMap<String, Vec<StoredVector>>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorStore for MemoryVectorStore {
    fn upsert(
        &self,
        document_id: &str,
        chunk_id: &str,
        embedding: Vec<f32>,
        text: &str,
    ) -> Result<()> {
        let mut documents = self.documents.write().map_err(|_| poisoned())?;
        let entries = documents.entry(document_id.to_string()).or_default();
        upsert_entry(
            entries,
            StoredVector {
                chunk_id: chunk_id.to_string(),
                embedding,
                text: text.to_string(),
            },
        );
        Ok(())
    }

    fn top_k(&self, document_id: &str, query: &[f32], k: usize) -> Result<Vec<RankedChunk>> {
        let documents = self.documents.read().map_err(|_| poisoned())?;
        Ok(documents
            .get(document_id)
            .map(|entries| rank(entries, query, k))
            .unwrap_or_default())
    }

    fn remove_document(&self, document_id: &str) -> Result<()> {
        self.documents
            .write()
            .map_err(|_| poisoned())?
            .remove(document_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryResultStore {
    results: RwLock<HashMap<String, JobOutput>>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultStore for MemoryResultStore {
    fn persist_result(&self, summary: &DocumentSummary, report: &CarbonReport) -> Result<()> {
        let output = JobOutput {
            summary: summary.clone(),
            report: report.clone(),
            stored_at: Utc::now(),
        };
        self.results
            .write()
            .map_err(|_| poisoned())?
            .insert(summary.job_id.clone(), output);
        Ok(())
    }

    fn load_result(&self, job_id: &str) -> Result<Option<JobOutput>> {
        Ok(self
            .results
            .read()
            .map_err(|_| poisoned())?
            .get(job_id)
            .cloned())
    }

    fn remove_result(&self, job_id: &str) -> Result<()> {
        self.results.write().map_err(|_| poisoned())?.remove(job_id);
        Ok(())
    }

    fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let results = self.results.read().map_err(|_| poisoned())?;
        let mut records: Vec<DocumentRecord> = results.values().map(DocumentRecord::from).collect();
        records.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
        Ok(records)
    }
}
