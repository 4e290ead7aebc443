pub mod client;
pub mod error;
pub mod summarizer;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

pub use client::{LlmClient, MessageSender};
pub use error::LlmError;
pub use summarizer::LlmSummarizer;
pub use types::{Message, MessagesRequest, MessagesResponse, Usage};

use crate::config::ModelsConfig;
use crate::services::{Summarizer, TierModels};

/// One shared HTTP client, one summarizer per configured tier model.
pub fn tier_models(config: &ModelsConfig, request_timeout: Duration) -> Result<TierModels, LlmError> {
    let client = Arc::new(LlmClient::with_base_url(
        config.api_key.clone(),
        config.base_url.clone(),
        request_timeout,
    )?);
    Ok(TierModels::from_fn(|tier| {
        Arc::new(LlmSummarizer::new(
            client.clone(),
            tier,
            config.model_for(tier),
            config.max_tokens,
            request_timeout,
        )) as Arc<dyn Summarizer>
    }))
}
