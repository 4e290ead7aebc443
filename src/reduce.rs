//! Reduce stage: fold finished chunk results into the document summary and
//! its carbon report.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::router::CarbonSignal;
use crate::state_machine::{ChunkResult, DocumentSummary};
use crate::tier::Tier;

/// Chunks (or characters) attributed to each final tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierCounts {
    pub light: usize,
    pub medium: usize,
    pub large: usize,
}

impl TierCounts {
    pub fn add(&mut self, tier: Tier, amount: usize) {
        match tier {
            Tier::Light => self.light += amount,
            Tier::Medium => self.medium += amount,
            Tier::Large => self.large += amount,
        }
    }

    pub fn get(&self, tier: Tier) -> usize {
        match tier {
            Tier::Light => self.light,
            Tier::Medium => self.medium,
            Tier::Large => self.large,
        }
    }
}

/// Carbon accounting for one job. Built once at reduce time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarbonReport {
    /// Cost had every chunk gone straight to the Large tier.
    pub baseline_grams: f64,
    pub actual_grams: f64,
    pub savings_grams: f64,
    /// `savings / baseline`, 0 when the baseline is 0.
    pub efficiency: f64,
    pub location: String,
    pub intensity: f64,
    pub total_chunks: usize,
    pub chunks_escalated: usize,
    pub tier_counts: TierCounts,
    /// Source characters sent to models, grouped by the chunk's final tier.
    pub chars_by_tier: TierCounts,
    pub message: String,
}

impl CarbonReport {
    pub fn efficiency_percent(&self) -> f64 {
        self.efficiency * 100.0
    }
}

pub struct ReduceAggregator;

impl ReduceAggregator {
    /// Joins chunk summaries in index order, one paragraph per chunk, and
    /// computes the carbon report. `results` may arrive in any order.
    pub fn reduce(
        job_id: &str,
        document_id: &str,
        results: &[ChunkResult],
        signal: &CarbonSignal,
    ) -> Result<(DocumentSummary, CarbonReport)> {
        if results.is_empty() {
            return Err(PipelineError::InvalidInput(
                "document produced no chunks to summarize".to_string(),
            ));
        }

        let mut ordered: Vec<&ChunkResult> = results.iter().collect();
        ordered.sort_by_key(|r| r.chunk_index);

        let text = ordered
            .iter()
            .map(|r| r.summary.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let summary = DocumentSummary {
            job_id: job_id.to_string(),
            document_id: document_id.to_string(),
            text,
        };
        Ok((summary, Self::carbon_report(&ordered, signal)))
    }

    fn carbon_report(results: &[&ChunkResult], signal: &CarbonSignal) -> CarbonReport {
        let factor = signal.normalized_factor();
        let mut baseline_grams = 0.0;
        let mut actual_grams = 0.0;
        let mut tier_counts = TierCounts::default();
        let mut chars_by_tier = TierCounts::default();
        let mut chunks_escalated = 0;

        for r in results {
            baseline_grams += Tier::Large.cost_per_token() * r.source_tokens as f64 * factor;
            actual_grams += r.carbon_grams;
            tier_counts.add(r.tier, 1);
            chars_by_tier.add(r.tier, r.chars_processed);
            if r.escalations > 0 {
                chunks_escalated += 1;
            }
        }

        let savings_grams = baseline_grams - actual_grams;
        let efficiency = if baseline_grams > 0.0 {
            savings_grams / baseline_grams
        } else {
            0.0
        };
        let message = format!(
            "Saved {savings_grams:.4} g CO2e ({:.0}% vs always-large) at {:.0} gCO2/kWh in {}",
            efficiency * 100.0,
            signal.intensity,
            signal.location
        );

        CarbonReport {
            baseline_grams,
            actual_grams,
            savings_grams,
            efficiency,
            location: signal.location.clone(),
            intensity: signal.intensity,
            total_chunks: results.len(),
            chunks_escalated,
            tier_counts,
            chars_by_tier,
            message,
        }
    }
}

/// Emits the end-of-job metrics line.
pub fn log_job_metrics(job_id: &str, report: &CarbonReport) {
    info!(
        job_id,
        saved_grams = %format_args!("{:.4}", report.savings_grams),
        baseline_grams = %format_args!("{:.4}", report.baseline_grams),
        actual_grams = %format_args!("{:.4}", report.actual_grams),
        efficiency_pct = %format_args!("{:.0}", report.efficiency_percent()),
        intensity = report.intensity,
        location = %report.location,
        chunks = report.total_chunks,
        escalated = report.chunks_escalated,
        light_chars = report.chars_by_tier.light,
        medium_chars = report.chars_by_tier.medium,
        large_chars = report.chars_by_tier.large,
        "job metrics"
    );
}
