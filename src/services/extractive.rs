//! Offline summarizer used when no model API key is configured.
//!
//! Each tier keeps more leading sentences than the one below it, so
//! escalation still buys a fuller summary.

use std::collections::HashSet;

use super::text::{content_word_set, split_sentences};
use super::{ServiceFuture, Summarizer};
use crate::tier::Tier;

pub struct ExtractiveSummarizer {
    tier: Tier,
}

impl ExtractiveSummarizer {
    pub fn new(tier: Tier) -> Self {
        Self { tier }
    }

    fn sentence_budget(&self) -> usize {
        self.tier.profile().extractive_sentences
    }

    fn lead(&self, text: &str) -> String {
        split_sentences(text)
            .into_iter()
            .take(self.sentence_budget())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Context sentences sharing the most content words with the question,
    /// returned in document order.
    fn best_sentences(&self, question: &str, context: &[String]) -> String {
        let wanted = content_word_set(question);
        let sentences: Vec<&str> = context.iter().flat_map(|c| split_sentences(c)).collect();

        let mut scored: Vec<(usize, usize)> = sentences
            .iter()
            .enumerate()
            .map(|(i, s)| (i, overlap(&wanted, s)))
            .filter(|&(_, score)| score > 0)
            .collect();
        if scored.is_empty() {
            return sentences.first().map(|s| s.to_string()).unwrap_or_default();
        }

        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(self.sentence_budget());
        scored.sort_by_key(|&(i, _)| i);
        scored
            .into_iter()
            .map(|(i, _)| sentences[i])
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn overlap(wanted: &HashSet<String>, sentence: &str) -> usize {
    content_word_set(sentence).intersection(wanted).count()
}

impl Summarizer for ExtractiveSummarizer {
    fn summarize<'a>(&'a self, text: &'a str) -> ServiceFuture<'a, String> {
        Box::pin(async move { Ok(self.lead(text)) })
    }

    fn answer<'a>(
        &'a self,
        question: &'a str,
        context: &'a [String],
    ) -> ServiceFuture<'a, String> {
        Box::pin(async move {
            if context.is_empty() {
                return Ok("No relevant context was found for this question.".to_string());
            }
            Ok(self.best_sentences(question, context))
        })
    }
}
