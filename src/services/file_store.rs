//! JSON-on-disk storage under the configured storage directory.
//!
//! ```text
//! <root>/results/<job_id>.json      JobOutput
//! <root>/vectors/<document_id>.json [StoredVector]
//! ```
//!
//! Writes go through a temp file and rename so a crash never leaves a
//! half-written record behind.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};

use super::memory::{StoredVector, rank, upsert_entry};
use super::{ChunkVector, DocumentRecord, JobOutput, RankedChunk, ResultStore, VectorStore};
use crate::error::{PipelineError, Result};
use crate::reduce::CarbonReport;
use crate::state_machine::DocumentSummary;

pub struct FileStore {
    root: PathBuf,
    // Serializes read-modify-write of vector files.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("results"))?;
        fs::create_dir_all(root.join("vectors"))?;
        debug!(root = %root.display(), "opened file store");
        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn result_path(&self, job_id: &str) -> Result<PathBuf> {
        Ok(self.root.join("results").join(file_name(job_id)?))
    }

    fn vector_path(&self, document_id: &str) -> Result<PathBuf> {
        Ok(self.root.join("vectors").join(file_name(document_id)?))
    }

    fn read_vectors(&self, document_id: &str) -> Result<Vec<StoredVector>> {
        let path = self.vector_path(document_id)?;
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Ids become file names, so anything that could escape the directory is refused.
fn file_name(id: &str) -> Result<String> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        return Err(PipelineError::Storage(format!("invalid record id '{id}'")));
    }
    Ok(format!("{id}.json"))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

impl VectorStore for FileStore {
    fn upsert(
        &self,
        document_id: &str,
        chunk_id: &str,
        embedding: Vec<f32>,
        text: &str,
    ) -> Result<()> {
        self.upsert_many(
            document_id,
            vec![ChunkVector {
                chunk_id: chunk_id.to_string(),
                embedding,
                text: text.to_string(),
            }],
        )
    }

    /// One read and one write of the document's vector file per batch.
    fn upsert_many(&self, document_id: &str, vectors: Vec<ChunkVector>) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| PipelineError::Storage("store lock poisoned".to_string()))?;
        let mut entries = self.read_vectors(document_id)?;
        for v in vectors {
            upsert_entry(
                &mut entries,
                StoredVector {
                    chunk_id: v.chunk_id,
                    embedding: v.embedding,
                    text: v.text,
                },
            );
        }
        write_json(&self.vector_path(document_id)?, &entries)
    }

    fn top_k(&self, document_id: &str, query: &[f32], k: usize) -> Result<Vec<RankedChunk>> {
        let entries = self.read_vectors(document_id)?;
        Ok(rank(&entries, query, k))
    }

    fn remove_document(&self, document_id: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| PipelineError::Storage("store lock poisoned".to_string()))?;
        remove_if_present(&self.vector_path(document_id)?)
    }
}

impl ResultStore for FileStore {
    fn persist_result(&self, summary: &DocumentSummary, report: &CarbonReport) -> Result<()> {
        let output = JobOutput {
            summary: summary.clone(),
            report: report.clone(),
            stored_at: Utc::now(),
        };
        write_json(&self.result_path(&summary.job_id)?, &output)?;
        debug!(job_id = %summary.job_id, "persisted job result");
        Ok(())
    }

    fn load_result(&self, job_id: &str) -> Result<Option<JobOutput>> {
        let path = self.result_path(job_id)?;
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&raw)?))
    }

    fn remove_result(&self, job_id: &str) -> Result<()> {
        remove_if_present(&self.result_path(job_id)?)?;
        debug!(job_id, "removed job result");
        Ok(())
    }

    fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let mut records = Vec::new();
        for entry in fs::read_dir(self.root.join("results"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(PipelineError::from)
                .and_then(|raw| Ok(serde_json::from_str::<JobOutput>(&raw)?));
            match parsed {
                Ok(output) => records.push(DocumentRecord::from(&output)),
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable result"),
            }
        }
        records.sort_by(|a, b| b.stored_at.cmp(&a.stored_at));
        Ok(records)
    }
}
