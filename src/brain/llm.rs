// Provider-backed Brain

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::prompt::{render_input, SYSTEM_PROMPT};
use super::{parse_action, Action, Brain, BrainInput, HostExtraction};
use crate::config::constants::{BRAIN_TIMEOUT_SECS, DEFAULT_MAX_TOKENS};
use crate::errors::BrainError;
use crate::providers::{with_retry, LlmProvider, ProviderRequest};

const EXTRACT_SYSTEM_PROMPT: &str = r#"Extract the assessment target from the operator's message.
Reply with exactly one JSON object: {"host":"<ip or domain>","instruction":"<the rest of the request, may be empty>"}.
If no host is present, use an empty string for "host"."#;

pub struct LlmBrain {
    provider: Arc<dyn LlmProvider>,
    model: String,
    max_tokens: u32,
    timeout: Duration,
}

impl LlmBrain {
    pub fn new(provider: Arc<dyn LlmProvider>, model: String) -> Self {
        Self {
            provider,
            model,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout: Duration::from_secs(BRAIN_TIMEOUT_SECS),
        }
    }

    async fn complete(&self, system: &str, user: String) -> Result<String, BrainError> {
        let request = ProviderRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            system: system.to_string(),
            user,
        };
        let call = || async {
            tokio::time::timeout(self.timeout, self.provider.complete(&request))
                .await
                .map_err(|_| BrainError::Transient("brain call timed out".to_string()))?
        };
        with_retry(call).await
    }
}

#[async_trait]
impl Brain for LlmBrain {
    async fn think(&self, input: &BrainInput) -> Result<Action, BrainError> {
        let reply = self.complete(SYSTEM_PROMPT, render_input(input)).await?;
        parse_action(&reply)
    }

    async fn extract_target(&self, text: &str) -> Result<HostExtraction, BrainError> {
        let reply = self
            .complete(EXTRACT_SYSTEM_PROMPT, text.to_string())
            .await?;

        #[derive(serde::Deserialize)]
        struct Extraction {
            #[serde(default)]
            host: String,
            #[serde(default)]
            instruction: String,
        }

        let start = reply.find('{');
        let end = reply.rfind('}');
        let sliced = match (start, end) {
            (Some(s), Some(e)) if e >= s => &reply[s..=e],
            _ => {
                return Err(BrainError::MalformedAction(
                    "no JSON object in extraction reply".to_string(),
                ))
            }
        };
        let parsed: Extraction = serde_json::from_str(sliced)
            .map_err(|e| BrainError::MalformedAction(e.to_string()))?;
        Ok(HostExtraction {
            host: parsed.host,
            instruction: parsed.instruction,
        })
    }
}
