//! Tipos de erro para o cliente da API de modelos.
//!
//! [`LlmError`] cobre rate limiting, erros HTTP, falhas de rede e respostas
//! vazias. [`LlmError::into_pipeline`] converte para o erro do pipeline,
//! marcando o tier que falhou para que o mapper possa escalar.

use std::time::Duration;

use thiserror::Error;

use crate::error::PipelineError;
use crate::tier::Tier;

#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP 429. `retry_after_ms` vem do cabeçalho `retry-after`.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Qualquer outro status não-2xx.
    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// 2xx sem nenhum bloco de texto.
    #[error("response contained no text")]
    EmptyResponse,
}

impl LlmError {
    pub fn into_pipeline(self, tier: Tier, request_timeout: Duration) -> PipelineError {
        match self {
            LlmError::NetworkError(e) if e.is_timeout() => {
                PipelineError::timeout(format!("{tier} model request"), request_timeout)
            }
            other => PipelineError::ModelUnavailable {
                tier,
                message: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display() {
        let err = LlmError::RateLimited {
            retry_after_ms: 5000,
        };
        assert_eq!(err.to_string(), "rate limited, retry after 5000ms");
    }

    #[test]
    fn api_error_display() {
        let err = LlmError::ApiError {
            status: 401,
            message: "Invalid API key".into(),
        };
        assert_eq!(err.to_string(), "API error (status 401): Invalid API key");
    }

    #[test]
    fn api_errors_become_model_unavailable() {
        let err = LlmError::ApiError {
            status: 503,
            message: "overloaded".into(),
        }
        .into_pipeline(Tier::Medium, Duration::from_secs(60));
        assert!(err.is_escalatable());
        match err {
            PipelineError::ModelUnavailable { tier, message } => {
                assert_eq!(tier, Tier::Medium);
                assert!(message.contains("503"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LlmError>();
    }
}
