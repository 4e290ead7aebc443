//! Lexical quality check: how much of a summary is grounded in its source,
//! and how much of the source it covers.

use super::text::content_word_set;
use super::{QualityChecker, ServiceFuture};

/// Share of the source vocabulary a summary is expected to touch.
const TARGET_COVERAGE: f64 = 0.3;

pub struct OverlapChecker {
    support_weight: f64,
}

impl Default for OverlapChecker {
    fn default() -> Self {
        Self {
            support_weight: 0.6,
        }
    }
}

impl OverlapChecker {
    pub fn new(support_weight: f64) -> Self {
        Self {
            support_weight: support_weight.clamp(0.0, 1.0),
        }
    }

    pub fn score_sync(&self, source: &str, summary: &str) -> f64 {
        let summary_words = content_word_set(summary);
        if summary_words.is_empty() {
            return 0.0;
        }
        let source_words = content_word_set(source);
        if source_words.is_empty() {
            return 0.0;
        }

        let shared = summary_words.intersection(&source_words).count() as f64;
        let support = shared / summary_words.len() as f64;
        let coverage =
            (shared / (TARGET_COVERAGE * source_words.len() as f64)).min(1.0);

        let score = self.support_weight * support + (1.0 - self.support_weight) * coverage;
        score.clamp(0.0, 1.0)
    }
}

impl QualityChecker for OverlapChecker {
    fn score<'a>(&'a self, source: &'a str, summary: &'a str) -> ServiceFuture<'a, f64> {
        Box::pin(async move { Ok(self.score_sync(source, summary)) })
    }
}
