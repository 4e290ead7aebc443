//! End-to-end runs of the ingest pipeline and the query engine through the
//! public API, with scripted model tiers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use ecoroute::config::RagConfig;
use ecoroute::services::{
    HashingEmbedder, MemoryResultStore, MemoryVectorStore, QualityChecker,
    ServiceFuture, StaticSignalSource, Summarizer, TierModels, Triage,
};
use ecoroute::state_machine::Chunk;
use ecoroute::{
    Collaborators, Document, JobOrchestrator, JobState, OrchestratorSettings, PipelineError,
    RagQueryEngine, Strategy, Tier,
};

/// One chunk per blank-line separated paragraph.
struct ParagraphTriage;

impl Triage for ParagraphTriage {
    fn extract(&self, document: &Document) -> ecoroute::Result<Vec<Chunk>> {
        let text = String::from_utf8_lossy(&document.bytes);
        Ok(text
            .split("\n\n")
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .enumerate()
            .map(|(i, p)| Chunk::new(i, p))
            .collect())
    }
}

/// Prefixes every output with its tier name, or fails when told to.
struct ScriptedTier {
    tier: Tier,
    fail: bool,
    summaries: AtomicUsize,
    answers: AtomicUsize,
}

impl ScriptedTier {
    fn new(tier: Tier) -> Arc<Self> {
        Self::with(tier, false)
    }

    fn broken(tier: Tier) -> Arc<Self> {
        Self::with(tier, true)
    }

    fn with(tier: Tier, fail: bool) -> Arc<Self> {
        Arc::new(Self {
            tier,
            fail,
            summaries: AtomicUsize::new(0),
            answers: AtomicUsize::new(0),
        })
    }

    fn unavailable(&self) -> PipelineError {
        PipelineError::ModelUnavailable {
            tier: self.tier,
            message: "503 service unavailable".into(),
        }
    }
}

impl Summarizer for ScriptedTier {
    fn summarize<'a>(&'a self, text: &'a str) -> ServiceFuture<'a, String> {
        Box::pin(async move {
            self.summaries.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(self.unavailable());
            }
            Ok(format!("{}|{text}", self.tier))
        })
    }

    fn answer<'a>(
        &'a self,
        question: &'a str,
        context: &'a [String],
    ) -> ServiceFuture<'a, String> {
        Box::pin(async move {
            self.answers.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(self.unavailable());
            }
            Ok(format!(
                "{}|{question} ({} passages)",
                self.tier,
                context.len()
            ))
        })
    }
}

struct FnChecker<F>(F);

impl<F> QualityChecker for FnChecker<F>
where
    F: Fn(&str) -> f64 + Send + Sync,
{
    fn score<'a>(&'a self, _source: &'a str, summary: &'a str) -> ServiceFuture<'a, f64> {
        let score = (self.0)(summary);
        Box::pin(async move { Ok(score) })
    }
}

struct Harness {
    orchestrator: JobOrchestrator,
    light: Arc<ScriptedTier>,
    medium: Arc<ScriptedTier>,
    large: Arc<ScriptedTier>,
    checker: Arc<dyn QualityChecker>,
    embedder: Arc<HashingEmbedder>,
    vectors: Arc<MemoryVectorStore>,
}

impl Harness {
    fn new(
        light: Arc<ScriptedTier>,
        medium: Arc<ScriptedTier>,
        large: Arc<ScriptedTier>,
        checker: Arc<dyn QualityChecker>,
        intensity: f64,
    ) -> Self {
        let embedder = Arc::new(HashingEmbedder::default());
        let vectors = Arc::new(MemoryVectorStore::new());
        let collaborators = Collaborators {
            triage: Arc::new(ParagraphTriage),
            models: TierModels::new(light.clone(), medium.clone(), large.clone()),
            checker: checker.clone(),
            signal: Arc::new(StaticSignalSource::fixed(intensity)),
            embedder: embedder.clone(),
            vectors: vectors.clone(),
            results: Arc::new(MemoryResultStore::new()),
        };
        let settings = OrchestratorSettings {
            model_timeout: Duration::from_secs(5),
            stage_timeout: Duration::from_secs(30),
            ..OrchestratorSettings::default()
        };
        Self {
            orchestrator: JobOrchestrator::new(collaborators, settings),
            light,
            medium,
            large,
            checker,
            embedder,
            vectors,
        }
    }

    fn query_engine(&self) -> RagQueryEngine {
        RagQueryEngine::new(
            self.embedder.clone(),
            self.vectors.clone(),
            TierModels::new(self.light.clone(), self.medium.clone(), self.large.clone()),
            self.checker.clone(),
            RagConfig::default(),
            Duration::from_secs(5),
        )
    }
}

const THREE_PARAGRAPHS: &str = "Solar output peaked at noon across the southern grid.\n\n\
    The HARD case: overnight demand was met by gas peakers and imported hydro.\n\n\
    Battery storage shifted the surplus into the evening ramp.";

#[tokio::test]
async fn balanced_low_carbon_job_escalates_only_weak_chunks() {
    let checker = Arc::new(FnChecker(|summary: &str| {
        if summary.starts_with("medium|") && summary.contains("HARD") {
            0.3
        } else {
            0.9
        }
    }));
    let h = Harness::new(
        ScriptedTier::new(Tier::Light),
        ScriptedTier::new(Tier::Medium),
        ScriptedTier::new(Tier::Large),
        checker,
        300.0,
    );

    let job_id = h
        .orchestrator
        .submit(Document::new("grid.txt", THREE_PARAGRAPHS), Strategy::Balanced)
        .unwrap();
    let status = h.orchestrator.wait(&job_id).await.unwrap();

    assert_eq!(status.state, JobState::Complete);
    assert_eq!(
        status.state_history,
        vec![
            JobState::Queued,
            JobState::Triaging,
            JobState::Mapping,
            JobState::Reducing,
            JobState::Storing,
        ]
    );
    assert_eq!(status.progress, 1.0);

    // Every chunk starts at Medium; only the weak one reaches Large.
    assert_eq!(h.light.summaries.load(Ordering::SeqCst), 0);
    assert_eq!(h.medium.summaries.load(Ordering::SeqCst), 3);
    assert_eq!(h.large.summaries.load(Ordering::SeqCst), 1);

    let output = h.orchestrator.result(&job_id).unwrap();
    let report = &output.report;
    assert_eq!(report.total_chunks, 3);
    assert_eq!(report.chunks_escalated, 1);
    assert_eq!(report.tier_counts.medium, 2);
    assert_eq!(report.tier_counts.large, 1);
    assert!(report.efficiency > 0.0);
    assert!(report.actual_grams <= report.baseline_grams);

    let paragraphs: Vec<&str> = output.summary.text.split("\n\n").collect();
    assert_eq!(paragraphs.len(), 3);
    assert!(paragraphs[0].starts_with("medium|Solar"));
    assert!(paragraphs[1].starts_with("large|The HARD case"));
    assert!(paragraphs[2].starts_with("medium|Battery"));
}

#[tokio::test]
async fn eco_job_escalates_past_a_failed_light_tier() {
    let h = Harness::new(
        ScriptedTier::broken(Tier::Light),
        ScriptedTier::new(Tier::Medium),
        ScriptedTier::new(Tier::Large),
        Arc::new(FnChecker(|_: &str| 0.9)),
        300.0,
    );

    let job_id = h
        .orchestrator
        .submit(Document::new("one.txt", "A single paragraph about wind."), Strategy::Eco)
        .unwrap();
    let status = h.orchestrator.wait(&job_id).await.unwrap();

    assert_eq!(status.state, JobState::Complete);
    let report = h.orchestrator.result(&job_id).unwrap().report;
    assert_eq!(report.tier_counts.medium, 1);
    assert_eq!(report.chunks_escalated, 1);
    assert_eq!(h.large.summaries.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn eco_job_fails_in_mapping_when_its_ceiling_fails() {
    let h = Harness::new(
        ScriptedTier::broken(Tier::Light),
        ScriptedTier::broken(Tier::Medium),
        ScriptedTier::new(Tier::Large),
        Arc::new(FnChecker(|_: &str| 0.9)),
        300.0,
    );

    let job_id = h
        .orchestrator
        .submit(Document::new("one.txt", "A single paragraph about wind."), Strategy::Eco)
        .unwrap();
    let status = h.orchestrator.wait(&job_id).await.unwrap();

    assert_eq!(status.state, JobState::Error);
    let failure = status.failure.expect("failure recorded");
    assert_eq!(failure.stage, JobState::Mapping);
    assert!(failure.cause.contains("medium"), "cause: {}", failure.cause);
    assert_eq!(h.large.summaries.load(Ordering::SeqCst), 0);
    assert!(matches!(
        h.orchestrator.result(&job_id),
        Err(PipelineError::NotReady { .. })
    ));
}

async fn processed(h: &Harness) -> String {
    let job_id = h
        .orchestrator
        .submit(Document::new("grid.txt", THREE_PARAGRAPHS), Strategy::Balanced)
        .unwrap();
    let status = h.orchestrator.wait(&job_id).await.unwrap();
    assert_eq!(status.state, JobState::Complete);
    status.document_id
}

#[tokio::test]
async fn well_supported_draft_answers_with_one_citation() {
    let h = Harness::new(
        ScriptedTier::new(Tier::Light),
        ScriptedTier::new(Tier::Medium),
        ScriptedTier::new(Tier::Large),
        Arc::new(FnChecker(|_: &str| 0.9)),
        300.0,
    );
    let document_id = processed(&h).await;

    let answer = h
        .query_engine()
        .query(&document_id, "What shifted the surplus into the evening?")
        .await
        .unwrap();

    assert_eq!(answer.tier, Tier::Medium);
    assert_eq!(answer.citations.len(), 1);
    assert!(answer.answer.ends_with("(1 passages)"));
    assert_eq!(h.large.answers.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn weak_draft_answers_from_full_context_via_large() {
    let h = Harness::new(
        ScriptedTier::new(Tier::Light),
        ScriptedTier::new(Tier::Medium),
        ScriptedTier::new(Tier::Large),
        Arc::new(FnChecker(|text: &str| {
            if text.starts_with("medium|") { 0.2 } else { 0.9 }
        })),
        300.0,
    );
    let long_paragraph = "Interconnector flows ".repeat(20);
    let document = format!("{THREE_PARAGRAPHS}\n\n{long_paragraph}");
    let job_id = h
        .orchestrator
        .submit(Document::new("grid.txt", document), Strategy::Balanced)
        .unwrap();
    let document_id = h.orchestrator.wait(&job_id).await.unwrap().document_id;

    let answer = h
        .query_engine()
        .query(&document_id, "How was overnight demand met?")
        .await
        .unwrap();

    let top_k = RagConfig::default().top_k;
    assert_eq!(answer.tier, Tier::Large);
    assert_eq!(answer.citations.len(), 4.min(top_k));
    assert!(answer.citations.iter().all(|c| c.excerpt.chars().count() <= 150));
    assert!(
        answer
            .citations
            .iter()
            .any(|c| c.excerpt.starts_with("Interconnector") && c.excerpt.chars().count() == 150)
    );
    assert_eq!(h.medium.answers.load(Ordering::SeqCst), 1);
    assert_eq!(h.large.answers.load(Ordering::SeqCst), 1);
}
