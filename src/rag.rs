//! Draft-verify question answering over a processed document.
//!
//! A query moves through at most three steps:
//!
//! 1. `Draft`: the Medium tier answers from the single best chunk.
//! 2. `Verify`: the checker scores the draft against the retrieved chunks the
//!    draft did not see. With nothing left to check against, support is 0.
//! 3. `Escalate`: only if the draft failed or was weakly supported, the Large
//!    tier answers from all retrieved chunks.
//!
//! Each step has one model call and one timeout, like the ingest pipeline.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::RagConfig;
use crate::error::{PipelineError, Result};
use crate::services::text::truncate_chars;
use crate::services::{Embedder, QualityChecker, RankedChunk, TierModels, VectorStore};
use crate::tier::Tier;

/// A supporting excerpt shown with an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub excerpt: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagAnswer {
    pub document_id: String,
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    /// Tier that produced `answer`.
    pub tier: Tier,
    /// Support of `answer` by the retrieved chunks, in [0, 1].
    pub confidence: f64,
}

enum Step {
    Draft,
    Verify { draft: String },
    Escalate,
}

pub struct RagQueryEngine {
    embedder: Arc<dyn Embedder>,
    vectors: Arc<dyn VectorStore>,
    models: TierModels,
    checker: Arc<dyn QualityChecker>,
    config: RagConfig,
    model_timeout: Duration,
}

impl RagQueryEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        vectors: Arc<dyn VectorStore>,
        models: TierModels,
        checker: Arc<dyn QualityChecker>,
        config: RagConfig,
        model_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            vectors,
            models,
            checker,
            config,
            model_timeout,
        }
    }

    pub async fn query(&self, document_id: &str, question: &str) -> Result<RagAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(PipelineError::InvalidInput("question is empty".to_string()));
        }

        let embedding = self.embedder.embed(question);
        let ranked = self
            .vectors
            .top_k(document_id, &embedding, self.config.top_k.max(1))?;
        if ranked.is_empty() {
            return Err(PipelineError::NotFound(format!(
                "no indexed chunks for document {document_id}"
            )));
        }
        let texts: Vec<String> = ranked.iter().map(|c| c.text.clone()).collect();
        debug!(document_id, retrieved = ranked.len(), "retrieved chunks");

        let mut step = Step::Draft;
        loop {
            step = match step {
                Step::Draft => match self.ask(Tier::Medium, question, &texts[..1]).await {
                    Ok(draft) => Step::Verify { draft },
                    Err(e) => {
                        warn!(document_id, error = %e, "draft failed, escalating");
                        Step::Escalate
                    }
                },
                Step::Verify { draft } => {
                    let others = &texts[1..];
                    let support = if others.is_empty() {
                        debug!(document_id, "no other chunks to verify the draft against");
                        0.0
                    } else {
                        self.support(others, &draft).await
                    };
                    if support >= self.config.support_threshold {
                        info!(document_id, support, "draft accepted");
                        return Ok(self.answer(
                            document_id,
                            question,
                            draft,
                            &ranked[..1],
                            Tier::Medium,
                            support,
                        ));
                    }
                    debug!(
                        document_id,
                        support,
                        threshold = self.config.support_threshold,
                        "draft weakly supported, escalating"
                    );
                    Step::Escalate
                }
                Step::Escalate => {
                    let answer = self.ask(Tier::Large, question, &texts).await?;
                    let support = self.support(&texts, &answer).await;
                    info!(document_id, support, "answered with full context");
                    return Ok(self.answer(
                        document_id,
                        question,
                        answer,
                        &ranked,
                        Tier::Large,
                        support,
                    ));
                }
            };
        }
    }

    async fn ask(&self, tier: Tier, question: &str, context: &[String]) -> Result<String> {
        match timeout(self.model_timeout, self.models.get(tier).answer(question, context)).await {
            Ok(answer) => answer,
            Err(_) => Err(PipelineError::timeout(
                format!("{tier} answer"),
                self.model_timeout,
            )),
        }
    }

    /// How well `answer` is supported by `texts`. Failures score 0.
    async fn support(&self, texts: &[String], answer: &str) -> f64 {
        let source = texts.join("\n\n");
        match timeout(self.model_timeout, self.checker.score(&source, answer)).await {
            Ok(Ok(score)) => score.clamp(0.0, 1.0),
            Ok(Err(e)) => {
                warn!(error = %e, "support check failed");
                0.0
            }
            Err(_) => {
                warn!("support check timed out");
                0.0
            }
        }
    }

    fn answer(
        &self,
        document_id: &str,
        question: &str,
        answer: String,
        cited: &[RankedChunk],
        tier: Tier,
        confidence: f64,
    ) -> RagAnswer {
        let citations = cited
            .iter()
            .map(|c| Citation {
                chunk_id: c.chunk_id.clone(),
                excerpt: truncate_chars(&c.text, self.config.citation_chars),
            })
            .collect();
        RagAnswer {
            document_id: document_id.to_string(),
            question: question.to_string(),
            answer,
            citations,
            tier,
            confidence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::Ordering;

    use crate::mapper::tests::{EchoSummarizer, TierScoreChecker};
    use crate::services::{HashingEmbedder, MemoryVectorStore, ServiceFuture};

    struct Fixture {
        engine: RagQueryEngine,
        medium: Arc<EchoSummarizer>,
        large: Arc<EchoSummarizer>,
    }

    fn fixture(medium: EchoSummarizer, scores: &[(Tier, f64)], chunks: &[&str]) -> Fixture {
        fixture_with(medium, Arc::new(TierScoreChecker::new(scores)), chunks)
    }

    fn fixture_with(
        medium: EchoSummarizer,
        checker: Arc<dyn QualityChecker>,
        chunks: &[&str],
    ) -> Fixture {
        let embedder = Arc::new(HashingEmbedder::default());
        let vectors = Arc::new(MemoryVectorStore::new());
        for (i, text) in chunks.iter().enumerate() {
            vectors
                .upsert("doc", &format!("doc_chunk_{i}"), embedder.embed(text), text)
                .unwrap();
        }
        let medium = Arc::new(medium);
        let large = Arc::new(EchoSummarizer::new(Tier::Large));
        let models = TierModels::new(
            Arc::new(EchoSummarizer::new(Tier::Light)),
            medium.clone(),
            large.clone(),
        );
        let engine = RagQueryEngine::new(
            embedder,
            vectors,
            models,
            checker,
            RagConfig::default(),
            Duration::from_secs(5),
        );
        Fixture {
            engine,
            medium,
            large,
        }
    }

    const CHUNKS: &[&str] = &[
        "Battery storage discharged during the evening demand peak.",
        "Wind turbines supplied most overnight electricity.",
    ];

    #[tokio::test]
    async fn supported_draft_is_returned_with_one_citation() {
        let f = fixture(EchoSummarizer::new(Tier::Medium), &[(Tier::Medium, 0.9)], CHUNKS);
        let answer = f
            .engine
            .query("doc", "What did wind turbines supply overnight?")
            .await
            .unwrap();

        assert_eq!(answer.tier, Tier::Medium);
        assert_eq!(answer.citations.len(), 1);
        assert_eq!(answer.citations[0].chunk_id, "doc_chunk_1");
        assert_eq!(f.large.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn weak_draft_escalates_to_large() {
        let long = "x".repeat(400);
        let chunks = [CHUNKS[0], CHUNKS[1], long.as_str()];
        let f = fixture(
            EchoSummarizer::new(Tier::Medium),
            &[(Tier::Medium, 0.2), (Tier::Large, 0.8)],
            &chunks,
        );
        let answer = f.engine.query("doc", "wind storage").await.unwrap();

        assert_eq!(answer.tier, Tier::Large);
        assert_eq!(answer.citations.len(), 3);
        assert!(answer.citations.iter().all(|c| c.excerpt.chars().count() <= 150));
        assert_eq!(answer.confidence, 0.8);
        assert_eq!(f.medium.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.large.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_draft_escalates() {
        let f = fixture(EchoSummarizer::failing(Tier::Medium), &[], CHUNKS);
        let answer = f.engine.query("doc", "battery").await.unwrap();
        assert_eq!(answer.tier, Tier::Large);
    }

    #[tokio::test]
    async fn empty_question_is_invalid() {
        let f = fixture(EchoSummarizer::new(Tier::Medium), &[], CHUNKS);
        let err = f.engine.query("doc", "   ").await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let f = fixture(EchoSummarizer::new(Tier::Medium), &[], CHUNKS);
        let err = f.engine.query("other", "battery").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(_)));
    }

    /// Scores everything 0.9 and keeps every source it was asked about.
    #[derive(Default)]
    struct RecordingChecker {
        sources: Mutex<Vec<String>>,
    }

    impl QualityChecker for RecordingChecker {
        fn score<'a>(&'a self, source: &'a str, _summary: &'a str) -> ServiceFuture<'a, f64> {
            self.sources.lock().unwrap().push(source.to_string());
            Box::pin(async { Ok(0.9) })
        }
    }

    #[tokio::test]
    async fn draft_is_verified_against_the_chunks_it_did_not_see() {
        let chunks = [
            CHUNKS[0],
            CHUNKS[1],
            "Solar farms curtailed output at midday.",
        ];
        let checker = Arc::new(RecordingChecker::default());
        let f = fixture_with(EchoSummarizer::new(Tier::Medium), checker.clone(), &chunks);
        let answer = f
            .engine
            .query("doc", "What did wind turbines supply overnight?")
            .await
            .unwrap();

        assert_eq!(answer.tier, Tier::Medium);
        assert_eq!(answer.citations[0].chunk_id, "doc_chunk_1");
        let sources = checker.sources.lock().unwrap();
        assert_eq!(sources.len(), 1);
        assert!(!sources[0].contains(CHUNKS[1]));
        assert!(sources[0].contains(CHUNKS[0]));
        assert!(sources[0].contains(chunks[2]));
    }

    #[tokio::test]
    async fn single_retrieved_chunk_cannot_verify_and_escalates() {
        let checker = Arc::new(RecordingChecker::default());
        let f = fixture_with(EchoSummarizer::new(Tier::Medium), checker.clone(), &CHUNKS[..1]);
        let answer = f.engine.query("doc", "battery").await.unwrap();

        assert_eq!(answer.tier, Tier::Large);
        assert_eq!(answer.confidence, 0.9);
        assert_eq!(f.medium.calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.large.calls.load(Ordering::SeqCst), 1);
        // Only the escalated answer was scored, against the one chunk.
        assert_eq!(*checker.sources.lock().unwrap(), vec![CHUNKS[0].to_string()]);
    }
}
