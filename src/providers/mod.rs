// HTTP clients for LLM vendors
//
// The Brain only needs single-shot completions: a system prompt plus one
// user message in, text out. Each turn re-sends the full snapshot, so no
// conversation state lives here.

mod anthropic;
mod openai;
mod retry;

pub use anthropic::AnthropicProvider;
pub use openai::OpenAiProvider;
pub use retry::with_retry;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{ProviderEntry, ProviderKind};
use crate::errors::BrainError;

/// One single-shot completion request.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub model: String,
    pub max_tokens: u32,
    pub system: String,
    pub user: String,
}

#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Complete one request, classifying failures as transient or fatal.
    async fn complete(&self, request: &ProviderRequest) -> Result<String, BrainError>;
}

/// Build the configured provider.
pub fn create_provider(entry: &ProviderEntry) -> Result<Arc<dyn LlmProvider>> {
    let Some(api_key) = entry.api_key.clone() else {
        bail!("provider has no API key configured");
    };
    Ok(match entry.kind {
        ProviderKind::Anthropic => {
            Arc::new(AnthropicProvider::new(api_key, entry.base_url.clone())?)
        }
        ProviderKind::Openai => Arc::new(OpenAiProvider::new(api_key, entry.base_url.clone())?),
    })
}

/// Map an HTTP status to the Brain error classification.
pub(crate) fn classify_status(status: u16, body: &str) -> BrainError {
    match status {
        408 | 429 => BrainError::Transient(format!("HTTP {status}: {body}")),
        s if s >= 500 => BrainError::Transient(format!("HTTP {status}: {body}")),
        _ => BrainError::Fatal(format!("HTTP {status}: {body}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_and_server_errors_are_transient() {
        assert!(classify_status(429, "").is_transient());
        assert!(classify_status(500, "").is_transient());
        assert!(classify_status(503, "").is_transient());
    }

    #[test]
    fn test_auth_errors_are_fatal() {
        assert!(!classify_status(401, "").is_transient());
        assert!(!classify_status(403, "").is_transient());
        assert!(!classify_status(400, "").is_transient());
    }

    #[test]
    fn test_create_provider_requires_key() {
        let entry = ProviderEntry::anthropic();
        assert!(create_provider(&entry).is_err());
    }
}
