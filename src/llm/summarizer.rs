//! [`Summarizer`] backed by a hosted model, one instance per tier.

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use super::client::MessageSender;
use super::error::LlmError;
use super::types::MessagesRequest;
use crate::error::Result;
use crate::services::{ServiceFuture, Summarizer};
use crate::tier::Tier;

const SUMMARY_SYSTEM: &str = "You are an expert summarization model. Provide a concise, \
    factual summary of the text you are given. Do not add any preamble, introduction, \
    or conversational fluff.";

const ANSWER_SYSTEM: &str = "You are an expert Q&A assistant. Answer the user's question \
    only from the provided context. Be concise and factual. If the context does not \
    contain the answer, say so.";

pub struct LlmSummarizer<C> {
    client: Arc<C>,
    tier: Tier,
    model: String,
    max_tokens: u32,
    request_timeout: Duration,
}

impl<C: MessageSender> LlmSummarizer<C> {
    pub fn new(
        client: Arc<C>,
        tier: Tier,
        model: impl Into<String>,
        max_tokens: u32,
        request_timeout: Duration,
    ) -> Self {
        Self {
            client,
            tier,
            model: model.into(),
            max_tokens,
            request_timeout,
        }
    }

    async fn complete(&self, system: &str, content: String) -> Result<String> {
        let req = MessagesRequest::single_turn(&self.model, self.max_tokens, system, content);
        let response = self
            .client
            .send_message(&req)
            .await
            .map_err(|e| e.into_pipeline(self.tier, self.request_timeout))?;
        debug!(
            tier = %self.tier,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "model call complete"
        );

        let text = response.text().trim().to_string();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse.into_pipeline(self.tier, self.request_timeout));
        }
        Ok(text)
    }
}

fn answer_prompt(question: &str, context: &[String]) -> String {
    let context = context
        .iter()
        .enumerate()
        .map(|(i, c)| format!("[{}] {c}", i + 1))
        .collect::<Vec<_>>()
        .join("\n\n");
    format!("CONTEXT:\n{context}\n\nQUESTION:\n{question}\n\nANSWER:")
}

impl<C: MessageSender + 'static> Summarizer for LlmSummarizer<C> {
    fn summarize<'a>(&'a self, text: &'a str) -> ServiceFuture<'a, String> {
        Box::pin(self.complete(SUMMARY_SYSTEM, format!("TEXT:\n{text}\n\nSUMMARY:")))
    }

    fn answer<'a>(
        &'a self,
        question: &'a str,
        context: &'a [String],
    ) -> ServiceFuture<'a, String> {
        Box::pin(self.complete(ANSWER_SYSTEM, answer_prompt(question, context)))
    }
}
