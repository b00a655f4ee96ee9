//! Conversation responder over an OpenAI-compatible completion endpoint

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::{Error, Result};

/// Produces one reply from a system prompt and a user message
///
/// Stateless per call; no conversation history is carried between calls.
#[async_trait]
pub trait Responder: Send + Sync {
    /// # Errors
    ///
    /// Returns `GenerationFailed` when the model answers badly or times out,
    /// or `Http` when the endpoint cannot be reached
    async fn respond(&self, system_prompt: &str, user_text: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
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
    content: Option<String>,
}

/// Responder calling `<base_url>/chat/completions`
#[derive(Debug, Clone)]
pub struct ChatCompletionsResponder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    timeout: Duration,
}

impl ChatCompletionsResponder {
    /// Create a responder with fixed sampling parameters
    ///
    /// # Errors
    ///
    /// Returns error if the token is empty
    pub fn new(config: &LlmConfig, api_key: &str) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "completion endpoint token required".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            top_p: config.top_p,
            timeout: config.timeout,
        })
    }

    async fn complete(&self, system_prompt: &str, user_text: &str) -> Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_text,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            top_p: self.top_p,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::GenerationFailed(format!(
                "completion API error {status}: {body}"
            )));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| Error::GenerationFailed(format!("malformed completion response: {e}")))?;

        extract_reply(parsed)
    }
}

fn extract_reply(response: ChatResponse) -> Result<String> {
    let content = response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .ok_or_else(|| Error::GenerationFailed("completion returned no choices".to_string()))?;

    let reply = content.trim();
    if reply.is_empty() {
        return Err(Error::GenerationFailed("completion was empty".to_string()));
    }
    Ok(reply.to_string())
}

#[async_trait]
impl Responder for ChatCompletionsResponder {
    async fn respond(&self, system_prompt: &str, user_text: &str) -> Result<String> {
        tracing::debug!(model = %self.model, chars = user_text.len(), "requesting completion");

        let reply = tokio::time::timeout(self.timeout, self.complete(system_prompt, user_text))
            .await
            .map_err(|_| {
                Error::GenerationFailed(format!(
                    "completion timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        tracing::debug!(chars = reply.len(), "completion received");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> ChatResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_request_shape() {
        let request = ChatRequest {
            model: "m",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "sys",
                },
                ChatMessage {
                    role: "user",
                    content: "hi",
                },
            ],
            max_tokens: 1200,
            temperature: 0.75,
            top_p: 0.9,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][1]["content"], "hi");
        assert_eq!(value["max_tokens"], 1200);
    }

    #[test]
    fn test_reply_is_trimmed() {
        let response = parse(r#"{"choices":[{"message":{"content":"  Diversify.\n"}}]}"#);
        assert_eq!(extract_reply(response).unwrap(), "Diversify.");
    }

    #[test]
    fn test_empty_choices_fail() {
        let response = parse(r#"{"choices":[]}"#);
        assert!(matches!(
            extract_reply(response),
            Err(Error::GenerationFailed(_))
        ));
    }

    #[test]
    fn test_blank_content_fails() {
        let response = parse(r#"{"choices":[{"message":{"content":"   "}}]}"#);
        assert!(matches!(
            extract_reply(response),
            Err(Error::GenerationFailed(_))
        ));
        let response = parse(r#"{"choices":[{"message":{"content":null}}]}"#);
        assert!(extract_reply(response).is_err());
    }

    #[test]
    fn test_empty_token_rejected() {
        assert!(ChatCompletionsResponder::new(&LlmConfig::default(), "").is_err());
    }
}
