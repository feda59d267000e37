//! Completion provider abstraction.
//!
//! A completion provider takes the conversation turns and an optional tool
//! list, and returns either text or a set of tool selections. The tools
//! argument distinguishes the two request phases of the protocol: `Some`
//! on the first request, `None` on the follow-up after tool execution.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capabilities::LlmDescription;
use crate::chat::message::{Message, ToolSelection};
use crate::utilities::errors::SclError;

/// Token accounting reported by the provider, when present.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenUsage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

/// One completion result: text, tool selections, or both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_selections: Vec<ToolSelection>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl CompletionResponse {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn tool_calls(selections: Vec<ToolSelection>) -> Self {
        Self {
            tool_selections: selections,
            ..Default::default()
        }
    }

    pub fn has_tool_selections(&self) -> bool {
        !self.tool_selections.is_empty()
    }
}

/// Chat-completion collaborator.
#[async_trait]
pub trait CompletionProvider: Send + Sync + fmt::Debug {
    /// Short provider identifier used in logs and errors.
    fn provider_name(&self) -> &str;

    /// Request a completion.
    ///
    /// Implementations must omit the tool list from the wire request when
    /// `tools` is `None` or empty.
    async fn complete(
        &self,
        model: &str,
        turns: &[Message],
        tools: Option<&[LlmDescription]>,
    ) -> Result<CompletionResponse, SclError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_constructors() {
        let text = CompletionResponse::text("hi");
        assert_eq!(text.content.as_deref(), Some("hi"));
        assert!(!text.has_tool_selections());

        let calls = CompletionResponse::tool_calls(vec![ToolSelection::new("c1", "add", "{}")]);
        assert!(calls.content.is_none());
        assert!(calls.has_tool_selections());
    }
}
