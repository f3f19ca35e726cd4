use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, Generator, truncate_body};
use crate::config::LlmConfig;
use crate::error::{RelayError, RelayResult};

/// OpenAI-compatible chat-completions client (DeepSeek by default).
pub struct LlmClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient {
    pub fn new(config: &LlmConfig) -> RelayResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| RelayError::collaborator("llm", e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Generator for LlmClient {
    async fn generate(&self, history: &[ChatMessage]) -> RelayResult<String> {
        if self.api_key.is_empty() {
            return Err(RelayError::collaborator("llm", "api key is not configured"));
        }

        let request = ChatRequest {
            model: &self.model,
            messages: history,
            temperature: self.temperature,
        };
        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RelayError::collaborator("llm", format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RelayError::collaborator(
                "llm",
                format!("HTTP {}: {}", status, truncate_body(&body, 400)),
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| RelayError::collaborator("llm", format!("JSON parse error: {}", e)))?;
        let reply = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        Ok(reply.trim().to_string())
    }
}
