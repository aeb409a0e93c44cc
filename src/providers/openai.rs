// OpenAI-compatible chat completions client
//
// Also covers local gateways that speak the same wire format via the
// base_url override.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::{classify_status, LlmProvider, ProviderRequest};
use crate::errors::BrainError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const REQUEST_TIMEOUT_SECS: u64 = 300;

pub struct OpenAiProvider {
    client: Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

impl OpenAiProvider {
    pub fn new(api_key: String, base_url: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, request: &ProviderRequest) -> Result<String, BrainError> {
        let body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": [
                {"role": "system", "content": request.system},
                {"role": "user", "content": request.user},
            ],
        });

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrainError::Transient(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &body));
        }

        let decoded: ChatResponse = response
            .json()
            .await
            .map_err(|e| BrainError::Fatal(format!("undecodable response: {e}")))?;

        let text = decoded
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(BrainError::Fatal("response carried no text".to_string()));
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ProviderRequest {
        ProviderRequest {
            model: "gpt-4o".into(),
            max_tokens: 128,
            system: "s".into(),
            user: "u".into(),
        }
    }

    #[tokio::test]
    async fn test_complete_reads_first_choice() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"{\"action\":\"complete\"}"}}]}"#)
            .create_async()
            .await;

        let provider = OpenAiProvider::new("k".into(), Some(server.url())).unwrap();
        let text = provider.complete(&request()).await.unwrap();
        assert!(text.contains("complete"));
    }

    #[tokio::test]
    async fn test_server_error_is_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(502)
            .create_async()
            .await;

        let provider = OpenAiProvider::new("k".into(), Some(server.url())).unwrap();
        assert!(provider.complete(&request()).await.unwrap_err().is_transient());
    }
}
