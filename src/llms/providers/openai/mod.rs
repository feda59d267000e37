//! OpenAI-compatible chat-completions provider.
//!
//! Works against any endpoint implementing `POST {base_url}/chat/completions`
//! with function calling.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::capabilities::LlmDescription;
use crate::chat::message::{Message, ToolSelection};
use crate::llms::base_llm::{CompletionProvider, CompletionResponse, TokenUsage};
use crate::utilities::config::CompletionConfig;
use crate::utilities::errors::{body_preview, SclError};

const PROVIDER: &str = "openai";

/// Chat-completions client.
#[derive(Debug, Clone)]
pub struct OpenAICompletion {
    pub api_key: Option<String>,
    pub base_url: String,
    pub temperature: Option<f64>,
    /// Retries on transport errors, 429 and 5xx.
    pub max_retries: u32,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolSelection>>,
}

impl OpenAICompletion {
    pub fn new(config: &CompletionConfig, timeout: Duration) -> Result<Self, SclError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SclError::upstream(PROVIDER, e.to_string()))?;
        Ok(Self {
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            temperature: None,
            max_retries: 2,
            client,
        })
    }

    /// Build the request body for the Chat Completions API.
    pub fn build_request_body(
        &self,
        model: &str,
        turns: &[Message],
        tools: Option<&[LlmDescription]>,
    ) -> Value {
        let mut body = serde_json::json!({
            "model": model,
            "messages": turns,
        });
        if let Some(temp) = self.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(tools) = tools {
            if !tools.is_empty() {
                body["tools"] = serde_json::json!(tools);
                body["tool_choice"] = serde_json::json!("auto");
            }
        }
        body
    }

    /// Parse a Chat Completions API response body.
    pub fn parse_response(body: &str) -> Result<CompletionResponse, SclError> {
        let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
            SclError::upstream(
                PROVIDER,
                format!("malformed response: {} - body: {}", e, body_preview(body, 500)),
            )
        })?;
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| SclError::upstream(PROVIDER, "no choices in response"))?;

        if let Some(usage) = &parsed.usage {
            log::debug!(
                "OpenAI token usage: prompt={}, completion={}, total={}",
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens
            );
        }

        Ok(CompletionResponse {
            content: choice.message.content,
            tool_selections: choice.message.tool_calls.unwrap_or_default(),
            usage: parsed.usage,
        })
    }
}

#[async_trait]
impl CompletionProvider for OpenAICompletion {
    fn provider_name(&self) -> &str {
        PROVIDER
    }

    async fn complete(
        &self,
        model: &str,
        turns: &[Message],
        tools: Option<&[LlmDescription]>,
    ) -> Result<CompletionResponse, SclError> {
        log::debug!(
            "OpenAICompletion.complete: model={}, turns={}, tools={:?}",
            model,
            turns.len(),
            tools.map(|t| t.len())
        );

        let body = self.build_request_body(model, turns, tools);
        let endpoint = format!("{}/chat/completions", self.base_url);

        let mut last_error = String::new();
        let mut retry_delay = Duration::from_millis(500);

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                log::warn!(
                    "OpenAI API retry attempt {} after {:?}: {}",
                    attempt,
                    retry_delay,
                    last_error
                );
                tokio::time::sleep(retry_delay).await;
                retry_delay *= 2;
            }

            let mut request = self.client.post(&endpoint).json(&body);
            if let Some(key) = &self.api_key {
                request = request.bearer_auth(key);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            let status = response.status();
            if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                last_error = format!("HTTP {}", status);
                continue;
            }

            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            if status.is_client_error() {
                return Err(SclError::upstream(
                    PROVIDER,
                    format!("HTTP {}: {}", status, body_preview(&text, 500)),
                ));
            }

            return Self::parse_response(&text);
        }

        Err(SclError::upstream(
            PROVIDER,
            format!("giving up after {} attempts: {}", self.max_retries + 1, last_error),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAICompletion {
        OpenAICompletion::new(&CompletionConfig::default(), Duration::from_secs(5)).unwrap()
    }

    fn add_tool() -> LlmDescription {
        LlmDescription::new("add", "sum", serde_json::json!({"type": "object"}))
    }

    #[test]
    fn test_api_key_comes_from_config_only() {
        assert!(provider().api_key.is_none());
        let config = CompletionConfig {
            api_key: Some("sk-test".to_string()),
            ..Default::default()
        };
        let keyed = OpenAICompletion::new(&config, Duration::from_secs(5)).unwrap();
        assert_eq!(keyed.api_key.as_deref(), Some("sk-test"));
    }

    #[test]
    fn test_request_body_with_tools() {
        let tools = vec![add_tool()];
        let body = provider().build_request_body("gpt-4o-mini", &[Message::user("5+3?")], Some(&tools));
        assert_eq!(body["tools"][0]["function"]["name"], "add");
        assert_eq!(body["tool_choice"], "auto");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn test_request_body_omits_empty_or_absent_tools() {
        let p = provider();
        let turns = [Message::user("hello")];
        let none = p.build_request_body("m", &turns, None);
        assert!(none.get("tools").is_none());
        assert!(none.get("tool_choice").is_none());
        let empty = p.build_request_body("m", &turns, Some(&[]));
        assert!(empty.get("tools").is_none());
    }

    #[test]
    fn test_parse_text_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"hi"}}],
            "usage":{"prompt_tokens":3,"completion_tokens":1,"total_tokens":4}}"#;
        let response = OpenAICompletion::parse_response(body).unwrap();
        assert_eq!(response.content.as_deref(), Some("hi"));
        assert!(!response.has_tool_selections());
        assert_eq!(response.usage.unwrap().total_tokens, 4);
    }

    #[test]
    fn test_parse_tool_call_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,
            "tool_calls":[{"id":"call_1","type":"function",
            "function":{"name":"add","arguments":"{\"a\":5,\"b\":3}"}}]}}]}"#;
        let response = OpenAICompletion::parse_response(body).unwrap();
        assert!(response.content.is_none());
        assert_eq!(response.tool_selections[0].id, "call_1");
        assert_eq!(response.tool_selections[0].name(), "add");
    }

    #[test]
    fn test_parse_rejects_missing_choices() {
        let err = OpenAICompletion::parse_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, SclError::UpstreamUnavailable { .. }));
    }
}
