use crate::error::{AssistantError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Hosted completion endpoint. Non-deterministic and allowed to fail.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32) -> Result<String>;

    /// Cheap connectivity check used to gate the assistant at start-up.
    async fn probe(&self) -> Result<()>;

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String> {
        let messages = [ChatMessage::system(system_prompt), ChatMessage::user(user_prompt)];
        self.chat(&messages, temperature, max_tokens).await
    }

    fn model(&self) -> &str {
        "unknown"
    }
}

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl LlmClient {
    pub fn new(api_key: String, model: String, base_url: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AssistantError::Llm(format!("Failed to build HTTP client: {}", e)))?;
        Ok(self)
    }
}

#[async_trait]
impl CompletionService for LlmClient {
    async fn chat(&self, messages: &[ChatMessage], temperature: f32, max_tokens: u32) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
            "max_tokens": max_tokens
        });

        debug!("LLM request: model={}, messages={}, temperature={}", self.model, messages.len(), temperature);

        let response = self.http
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("LLM API call failed: {}", e)))?;

        let status = response.status();
        let response_json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AssistantError::Llm(format!("Failed to parse LLM response: {}", e)))?;

        if !status.is_success() {
            let message = response_json["error"]["message"].as_str().unwrap_or("unknown error");
            return Err(AssistantError::Llm(format!("LLM API returned {}: {}", status, message)));
        }

        let content = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| AssistantError::Llm("No content in LLM response".to_string()))?;

        Ok(content.to_string())
    }

    async fn probe(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            return Err(AssistantError::Llm("No API key configured".to_string()));
        }

        let response = self.http
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| AssistantError::Llm(format!("LLM probe failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AssistantError::Llm(format!("LLM probe returned {}", response.status())));
        }
        Ok(())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_message_serializes_openai_shape() {
        let json = serde_json::to_value(ChatMessage::assistant("SELECT 1")).unwrap();
        assert_eq!(json, serde_json::json!({"role": "assistant", "content": "SELECT 1"}));
    }

    #[test]
    fn test_base_url_trailing_slash_is_dropped() {
        let client = LlmClient::new("k".to_string(), "m".to_string(), "http://localhost:8000/v1/".to_string());
        assert_eq!(client.base_url, "http://localhost:8000/v1");
        assert_eq!(client.model(), "m");
    }
}
