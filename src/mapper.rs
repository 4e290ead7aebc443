//! Per-chunk summarization with tier escalation, fanned out over a bounded
//! worker pool.
//!
//! Each chunk is independent: the router picks a starting tier, the tier's
//! summarizer drafts, the checker scores, and low confidence climbs one tier
//! at a time up to the strategy's ceiling. A failed or timed-out model call
//! scores as zero. Failing at the ceiling fails the chunk, and with it the job.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::router::{CarbonRouter, CarbonSignal, EscalationPolicy};
use crate::services::{QualityChecker, TierModels};
use crate::state_machine::{Chunk, ChunkResult, Strategy};
use crate::tier::{Tier, token_count};

pub struct ChunkMapper {
    models: TierModels,
    checker: Arc<dyn QualityChecker>,
    router: CarbonRouter,
    model_timeout: Duration,
    max_concurrency: usize,
}

/// Next tier up, unless `tier` is already the policy ceiling.
fn escalate(tier: Tier, policy: &EscalationPolicy) -> Option<Tier> {
    if tier < policy.max_tier {
        tier.next()
    } else {
        None
    }
}

impl ChunkMapper {
    pub fn new(
        models: TierModels,
        checker: Arc<dyn QualityChecker>,
        router: CarbonRouter,
        model_timeout: Duration,
        max_concurrency: usize,
    ) -> Self {
        Self {
            models,
            checker,
            router,
            model_timeout,
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn router(&self) -> &CarbonRouter {
        &self.router
    }

    async fn summarize_at(&self, tier: Tier, text: &str) -> Result<String> {
        match timeout(self.model_timeout, self.models.get(tier).summarize(text)).await {
            Ok(result) => result,
            Err(_) => Err(PipelineError::timeout(
                format!("{tier} summarize"),
                self.model_timeout,
            )),
        }
    }

    /// Checker failures count as zero confidence rather than failing the chunk.
    async fn confidence(&self, source: &str, summary: &str) -> f64 {
        match timeout(self.model_timeout, self.checker.score(source, summary)).await {
            Ok(Ok(score)) => score.clamp(0.0, 1.0),
            Ok(Err(e)) => {
                warn!(error = %e, "quality check failed, scoring 0");
                0.0
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.model_timeout.as_millis() as u64,
                    "quality check timed out, scoring 0"
                );
                0.0
            }
        }
    }

    /// Runs one chunk through routing, summarization and escalation.
    pub async fn map_chunk(
        &self,
        chunk: &Chunk,
        strategy: Strategy,
        signal: &CarbonSignal,
    ) -> Result<ChunkResult> {
        let policy = self.router.escalation_policy(strategy);
        let initial_tier = self.router.select_initial_tier(strategy, signal);
        let chunk_chars = chunk.text.chars().count();

        let mut tier = initial_tier;
        let mut escalations: u8 = 0;
        let mut chars_processed = 0;

        loop {
            chars_processed += chunk_chars;
            let outcome = self.summarize_at(tier, &chunk.text).await;

            let (summary, confidence) = match outcome {
                Ok(summary) => {
                    let confidence = self.confidence(&chunk.text, &summary).await;
                    (summary, confidence)
                }
                Err(e) => match escalate(tier, &policy) {
                    Some(next) => {
                        warn!(chunk = chunk.index, %tier, error = %e, "summarizer failed, escalating");
                        tier = next;
                        escalations += 1;
                        continue;
                    }
                    None => {
                        return Err(PipelineError::Chunk {
                            index: chunk.index,
                            tier,
                            source: Box::new(e),
                        });
                    }
                },
            };

            if policy.should_escalate(tier, confidence) {
                if let Some(next) = escalate(tier, &policy) {
                    debug!(
                        chunk = chunk.index,
                        %tier,
                        confidence,
                        threshold = policy.confidence_threshold,
                        "low confidence, escalating"
                    );
                    tier = next;
                    escalations += 1;
                    continue;
                }
            }

            let source_tokens = token_count(&chunk.text);
            let carbon_grams =
                tier.cost_per_token() * source_tokens as f64 * signal.normalized_factor();
            debug!(chunk = chunk.index, %tier, confidence, carbon_grams, "chunk mapped");

            return Ok(ChunkResult {
                chunk_index: chunk.index,
                summary,
                tier,
                initial_tier,
                escalations,
                confidence,
                carbon_grams,
                chars_processed,
                source_tokens,
            });
        }
    }

    /// Maps every chunk with at most `max_concurrency` in flight.
    ///
    /// Results come back in chunk-index order. `cancel` is checked before each
    /// chunk starts; chunks already talking to a model are allowed to finish.
    /// The first chunk failure stops any chunk that has not started yet.
    pub async fn map_all<F>(
        self: &Arc<Self>,
        chunks: Vec<Chunk>,
        strategy: Strategy,
        signal: CarbonSignal,
        cancel: Arc<AtomicBool>,
        on_progress: F,
    ) -> Result<Vec<ChunkResult>>
    where
        F: Fn(usize, usize) + Send + Sync,
    {
        let total = chunks.len();
        let permits = Arc::new(Semaphore::new(self.max_concurrency));
        let halt = Arc::new(AtomicBool::new(false));
        let signal = Arc::new(signal);

        let mut tasks = JoinSet::new();
        for chunk in chunks {
            let mapper = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let halt = Arc::clone(&halt);
            let cancel = Arc::clone(&cancel);
            let signal = Arc::clone(&signal);
            tasks.spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|e| PipelineError::Task(e.to_string()))?;
                if cancel.load(Ordering::SeqCst) || halt.load(Ordering::SeqCst) {
                    return Err(PipelineError::Cancelled);
                }
                let result = mapper.map_chunk(&chunk, strategy, &signal).await;
                if result.is_err() {
                    halt.store(true, Ordering::SeqCst);
                }
                result
            });
        }

        let mut results = Vec::with_capacity(total);
        let mut first_error = None;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(result)) => {
                    results.push(result);
                    on_progress(results.len(), total);
                }
                // Chunks skipped after a halt or cancel are not failures of their own.
                Ok(Err(PipelineError::Cancelled)) => {}
                Ok(Err(e)) => {
                    halt.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(e);
                }
                Err(e) => {
                    halt.store(true, Ordering::SeqCst);
                    first_error.get_or_insert(PipelineError::Task(e.to_string()));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if cancel.load(Ordering::SeqCst) {
            return Err(PipelineError::Cancelled);
        }
        results.sort_by_key(|r| r.chunk_index);
        Ok(results)
    }
}
