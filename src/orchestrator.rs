use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::config::{EcorouteConfig, RouterConfig};
use crate::error::{PipelineError, Result};
use crate::mapper::ChunkMapper;
use crate::reduce::{CarbonReport, ReduceAggregator, log_job_metrics};
use crate::router::{CarbonRouter, CarbonSignal};
use crate::services::{
    CarbonSignalSource, ChunkVector, Embedder, JobOutput, QualityChecker, ResultStore,
    TierModels, Triage, VectorStore,
};
use crate::state_machine::{
    Chunk, ChunkResult, Document, DocumentSummary, Job, JobState, JobStatus, StateMachine,
    Strategy, Transition,
};

/// The external services a job talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub triage: Arc<dyn Triage>,
    pub models: TierModels,
    pub checker: Arc<dyn QualityChecker>,
    pub signal: Arc<dyn CarbonSignalSource>,
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<dyn VectorStore>,
    pub results: Arc<dyn ResultStore>,
}

/// Limits and routing knobs applied to every job.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub router: RouterConfig,
    pub max_concurrent_chunks: usize,
    pub model_timeout: Duration,
    pub stage_timeout: Duration,
    /// Compute location whose grid intensity drives routing.
    pub location: String,
    pub reference_intensity: f64,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from_config(&EcorouteConfig::default())
    }
}

impl OrchestratorSettings {
    pub fn from_config(config: &EcorouteConfig) -> Self {
        Self {
            router: config.router.clone(),
            max_concurrent_chunks: config.pipeline.max_concurrent_chunks,
            model_timeout: config.pipeline.model_timeout(),
            stage_timeout: config.pipeline.stage_timeout(),
            location: config.carbon.location.clone(),
            reference_intensity: config.carbon.reference_intensity,
        }
    }
}

/// Registry entry. Only the job's own task writes `status`.
struct JobHandle {
    status: Arc<watch::Sender<JobStatus>>,
    cancel: Arc<AtomicBool>,
}

struct Inner {
    triage: Arc<dyn Triage>,
    mapper: Arc<ChunkMapper>,
    signal: Arc<dyn CarbonSignalSource>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    results: Arc<dyn ResultStore>,
    settings: OrchestratorSettings,
    registry: DashMap<String, JobHandle>,
}

/// Drives jobs through the state machine, one task per job.
///
/// Cloning is cheap and every clone shares the same registry.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

impl JobOrchestrator {
    pub fn new(collaborators: Collaborators, settings: OrchestratorSettings) -> Self {
        let mapper = ChunkMapper::new(
            collaborators.models,
            collaborators.checker,
            CarbonRouter::new(settings.router.clone()),
            settings.model_timeout,
            settings.max_concurrent_chunks,
        );
        Self {
            inner: Arc::new(Inner {
                triage: collaborators.triage,
                mapper: Arc::new(mapper),
                signal: collaborators.signal,
                embedder: collaborators.embedder,
                vectors: collaborators.vectors,
                results: collaborators.results,
                settings,
                registry: DashMap::new(),
            }),
        }
    }

    /// Queues a document and returns its job id immediately.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn submit(&self, document: Document, strategy: Strategy) -> Result<String> {
        if document.is_empty() {
            return Err(PipelineError::InvalidInput(format!(
                "document '{}' is empty",
                document.name
            )));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PipelineError::Task(format!("no async runtime: {e}")))?;

        let job = Job::new(document.id.clone(), strategy);
        let job_id = job.id.clone();
        let (status, _) = watch::channel(JobStatus::queued(&job));
        let status = Arc::new(status);
        let cancel = Arc::new(AtomicBool::new(false));
        self.inner.registry.insert(
            job_id.clone(),
            JobHandle {
                status: Arc::clone(&status),
                cancel: Arc::clone(&cancel),
            },
        );
        info!(job_id = %job_id, document = %document.name, %strategy, "job queued");

        let run = JobRun {
            job,
            status,
            cancel,
        };
        let inner = Arc::clone(&self.inner);
        let span = info_span!("job", job_id = %job_id);
        runtime.spawn(inner.run_job(run, document).instrument(span));
        Ok(job_id)
    }

    /// Like [`submit`](Self::submit), with the strategy given by name.
    pub fn submit_named(&self, document: Document, strategy: &str) -> Result<String> {
        self.submit(document, strategy.parse()?)
    }

    /// Current snapshot of a job. Never blocks on the job's task.
    pub fn status(&self, job_id: &str) -> Result<JobStatus> {
        let handle = self.handle(job_id)?;
        let snapshot = handle.status.borrow().clone();
        Ok(snapshot)
    }

    pub fn result(&self, job_id: &str) -> Result<JobOutput> {
        let status = self.status(job_id)?;
        if status.state != JobState::Complete {
            return Err(PipelineError::NotReady {
                job_id: job_id.to_string(),
                state: status.state,
            });
        }
        self.inner
            .results
            .load_result(job_id)?
            .ok_or_else(|| PipelineError::NotFound(format!("stored result for job {job_id}")))
    }

    /// Requests cancellation. Honoured at the next chunk or stage boundary.
    ///
    /// The last check happens on entering `storing`; a request that arrives
    /// while outputs are being written is ignored and the job completes.
    pub fn cancel(&self, job_id: &str) -> Result<()> {
        let handle = self.handle(job_id)?;
        handle.cancel.store(true, Ordering::SeqCst);
        info!(job_id, "cancellation requested");
        Ok(())
    }

    /// Resolves once the job reaches `complete` or `error`.
    pub async fn wait(&self, job_id: &str) -> Result<JobStatus> {
        let mut rx = self.handle(job_id)?.status.subscribe();
        let status = rx
            .wait_for(|s| s.state.is_terminal())
            .await
            .map_err(|e| PipelineError::Task(e.to_string()))?
            .clone();
        Ok(status)
    }

    /// Drops a finished job from the registry and returns its final status.
    ///
    /// Persisted outputs stay in the result store. Jobs still running are
    /// kept and reported as `NotReady`.
    pub fn forget(&self, job_id: &str) -> Result<JobStatus> {
        let removed = self
            .inner
            .registry
            .remove_if(job_id, |_, handle| handle.status.borrow().state.is_terminal());
        match removed {
            Some((_, handle)) => {
                debug!(job_id, "job forgotten");
                let status = handle.status.borrow().clone();
                Ok(status)
            }
            None => {
                let status = self.status(job_id)?;
                Err(PipelineError::NotReady {
                    job_id: job_id.to_string(),
                    state: status.state,
                })
            }
        }
    }

    /// Jobs currently held in the registry.
    pub fn tracked_jobs(&self) -> usize {
        self.inner.registry.len()
    }

    /// Receiver that observes every status change of a job.
    pub fn watch(&self, job_id: &str) -> Result<watch::Receiver<JobStatus>> {
        Ok(self.handle(job_id)?.status.subscribe())
    }

    fn handle(
        &self,
        job_id: &str,
    ) -> Result<dashmap::mapref::one::Ref<'_, String, JobHandle>> {
        self.inner
            .registry
            .get(job_id)
            .ok_or_else(|| PipelineError::NotFound(format!("job {job_id}")))
    }
}

/// A job plus the channels its task reports through.
struct JobRun {
    job: Job,
    status: Arc<watch::Sender<JobStatus>>,
    cancel: Arc<AtomicBool>,
}

impl JobRun {
    fn publish(&self, progress: f64, message: impl Into<String>) {
        let job = &self.job;
        let message = message.into();
        self.status.send_modify(|s| {
            s.state = job.state;
            s.progress = progress.clamp(0.0, 1.0);
            s.message = message;
            s.failure = job.failure.clone();
            s.state_history = job.state_history.clone();
            s.updated_at = job.updated_at;
        });
    }

    fn advance(&mut self, message: &str) -> Result<()> {
        match StateMachine::advance(&mut self.job) {
            Transition::Next(state) => {
                debug!(%state, "entered stage");
                self.publish(state.entry_progress(), message);
                Ok(())
            }
            other => Err(PipelineError::Task(format!(
                "unexpected transition from {}: {other:?}",
                self.job.state
            ))),
        }
    }

    fn ensure_not_cancelled(&self) -> Result<()> {
        if self.cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn fail(&mut self, err: &PipelineError) {
        let progress = self.status.borrow().progress;
        if let Transition::Failed(failure) = StateMachine::fail(&mut self.job, err) {
            error!(stage = %failure.stage, cause = %failure.cause, "job failed");
            self.publish(progress, failure.to_string());
        }
    }
}

impl Inner {
    async fn run_job(self: Arc<Self>, mut run: JobRun, document: Document) {
        match self.drive(&mut run, document).await {
            Ok(report) => {
                log_job_metrics(&run.job.id, &report);
                info!("job complete");
            }
            Err(e) => run.fail(&e),
        }
    }

    async fn drive(&self, run: &mut JobRun, document: Document) -> Result<CarbonReport> {
        run.ensure_not_cancelled()?;
        run.advance("Step 1/4: Analyzing document (triage)")?;
        let chunks = self.triage(document).await?;
        debug!(chunks = chunks.len(), "triage complete");

        run.ensure_not_cancelled()?;
        run.advance("Step 2/4: Summarizing chunks")?;
        let signal = self.observe_signal().await;
        let results = self
            .within_stage(JobState::Mapping, self.map(run, chunks.clone(), signal.clone()))
            .await?;
        run.job.chunk_results = results;

        run.ensure_not_cancelled()?;
        run.advance("Step 3/4: Combining chunk summaries")?;
        let (summary, report) = ReduceAggregator::reduce(
            &run.job.id,
            &run.job.document_id,
            &run.job.chunk_results,
            &signal,
        )?;
        run.job.summary = Some(summary.clone());
        run.job.report = Some(report.clone());

        run.ensure_not_cancelled()?;
        run.advance("Step 4/4: Indexing and storing results")?;
        self.store(&run.job.document_id, chunks, summary, report.clone())
            .await?;

        run.advance("Job complete")?;
        Ok(report)
    }

    async fn within_stage<T>(
        &self,
        stage: JobState,
        work: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        let limit = self.settings.stage_timeout;
        timeout(limit, work)
            .await
            .map_err(|_| PipelineError::timeout(format!("{stage} stage"), limit))?
    }

    async fn triage(&self, document: Document) -> Result<Vec<Chunk>> {
        let triage = Arc::clone(&self.triage);
        let work = async move {
            tokio::task::spawn_blocking(move || triage.extract(&document))
                .await
                .map_err(|e| PipelineError::Task(e.to_string()))?
        };
        self.within_stage(JobState::Triaging, work).await
    }

    /// Reads the grid intensity once for the whole job.
    async fn observe_signal(&self) -> CarbonSignal {
        let location = &self.settings.location;
        let reference = self.settings.reference_intensity;
        let reading = timeout(
            self.settings.model_timeout,
            self.signal.current_intensity(location),
        )
        .await;
        let intensity = match reading {
            Ok(Ok(intensity)) => intensity,
            Ok(Err(e)) => {
                warn!(location = %location, error = %e, "carbon signal unavailable, using reference intensity");
                reference
            }
            Err(_) => {
                warn!(location = %location, "carbon signal timed out, using reference intensity");
                reference
            }
        };
        debug!(location = %location, intensity, "carbon signal observed");
        CarbonSignal::new(location.clone(), intensity, reference)
    }

    async fn map(
        &self,
        run: &JobRun,
        chunks: Vec<Chunk>,
        signal: CarbonSignal,
    ) -> Result<Vec<ChunkResult>> {
        let status = Arc::clone(&run.status);
        let start = JobState::Mapping.entry_progress();
        // Mapping fills the band up to 0.80; reducing starts at 0.85.
        let width = 0.80 - start;
        self.mapper
            .map_all(
                chunks,
                run.job.strategy,
                signal,
                Arc::clone(&run.cancel),
                move |done, total| {
                    let progress = start + width * done as f64 / total.max(1) as f64;
                    status.send_modify(|s| {
                        s.progress = progress;
                        s.message = format!("Step 2/4: Summarizing chunks ({done}/{total})");
                        s.updated_at = Utc::now();
                    });
                },
            )
            .await
    }

    /// Indexes chunk embeddings for later queries, then persists the outputs.
    ///
    /// The blocking writer and the stage timeout race on `gate`: whichever
    /// moves it out of `STORE_PENDING` first decides the outcome. A writer that
    /// loses removes what it wrote, so a timed-out job leaves nothing behind.
    async fn store(
        &self,
        document_id: &str,
        chunks: Vec<Chunk>,
        summary: DocumentSummary,
        report: CarbonReport,
    ) -> Result<()> {
        let embedder = Arc::clone(&self.embedder);
        let vectors = Arc::clone(&self.vectors);
        let results = Arc::clone(&self.results);
        let document_id = document_id.to_string();
        let gate = Arc::new(AtomicU8::new(STORE_PENDING));
        let writer_gate = Arc::clone(&gate);

        let writer = tokio::task::spawn_blocking(move || {
            let written = write_outputs(
                embedder.as_ref(),
                vectors.as_ref(),
                results.as_ref(),
                &document_id,
                &chunks,
                &summary,
                &report,
            );
            let committed = written.is_ok()
                && writer_gate
                    .compare_exchange(
                        STORE_PENDING,
                        STORE_COMMITTED,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok();
            if !committed {
                roll_back(vectors.as_ref(), results.as_ref(), &document_id, &summary.job_id);
            }
            written
        });

        let limit = self.settings.stage_timeout;
        match timeout(limit, writer).await {
            Ok(joined) => joined.map_err(|e| PipelineError::Task(e.to_string()))?,
            Err(_) => {
                let abandoned = gate
                    .compare_exchange(
                        STORE_PENDING,
                        STORE_ABANDONED,
                        Ordering::SeqCst,
                        Ordering::SeqCst,
                    )
                    .is_ok();
                if abandoned {
                    Err(PipelineError::timeout(
                        format!("{} stage", JobState::Storing),
                        limit,
                    ))
                } else {
                    // Committed just as the deadline passed.
                    Ok(())
                }
            }
        }
    }
}

const STORE_PENDING: u8 = 0;
const STORE_COMMITTED: u8 = 1;
const STORE_ABANDONED: u8 = 2;

fn write_outputs(
    embedder: &dyn Embedder,
    vectors: &dyn VectorStore,
    results: &dyn ResultStore,
    document_id: &str,
    chunks: &[Chunk],
    summary: &DocumentSummary,
    report: &CarbonReport,
) -> Result<()> {
    let batch = chunks
        .iter()
        .map(|chunk| ChunkVector {
            chunk_id: chunk.id(document_id),
            embedding: embedder.embed(&chunk.text),
            text: chunk.text.clone(),
        })
        .collect();
    vectors.upsert_many(document_id, batch)?;
    results.persist_result(summary, report)
}

fn roll_back(
    vectors: &dyn VectorStore,
    results: &dyn ResultStore,
    document_id: &str,
    job_id: &str,
) {
    if let Err(e) = results.remove_result(job_id) {
        warn!(job_id, error = %e, "could not remove result of failed store");
    }
    if let Err(e) = vectors.remove_document(document_id) {
        warn!(document_id, error = %e, "could not remove vectors of failed store");
    }
}
