//! The tool-calling conversation protocol.
//!
//! ```text
//! INIT -> RETRIEVE -> REQUEST_WITH_TOOLS -> DONE
//!                                        \-> EXECUTE -> APPEND_RESULTS
//!                                              -> REQUEST_WITHOUT_TOOLS -> DONE
//! ```
//!
//! At most one tool round runs per user turn. If the follow-up response
//! selects tools again, the selections are logged and its text is returned
//! as the answer.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::message::{Message, ToolSelection};
use super::state::ConversationState;
use crate::capabilities::{
    CapabilityMap, CapabilityRegistry, MergeReport, RetrievalHint, RetrievalParams,
};
use crate::llms::base_llm::{CompletionProvider, CompletionResponse};
use crate::rag::core::EmbeddingProvider;
use crate::tools::function_table::Arguments;
use crate::utilities::config::{SclConfig, TimeoutConfig};
use crate::utilities::errors::SclError;

/// States of the conversation protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProtocolState {
    Init,
    Retrieve,
    RequestWithTools,
    Execute,
    AppendResults,
    RequestWithoutTools,
    Done,
}

/// One user turn to run through the protocol.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    /// Capabilities to offer regardless of similarity.
    #[serde(default)]
    pub tool_names: Vec<String>,
    #[serde(default)]
    pub hint: Option<RetrievalHint>,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn with_tool_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_names = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_hint(mut self, hint: RetrievalHint) -> Self {
        self.hint = Some(hint);
        self
    }
}

/// One executed tool selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub call_id: String,
    pub capability: String,
    pub arguments: Value,
    pub output: Value,
}

/// Result of a completed turn.
#[derive(Debug, Clone)]
pub struct ChatOutcome {
    /// Text of the last response.
    pub content: String,
    pub state: ConversationState,
    pub transitions: Vec<ProtocolState>,
    pub merge_report: MergeReport,
    pub executions: Vec<ToolExecution>,
}

/// Drives one conversation turn against the injected collaborators.
#[derive(Debug, Clone)]
pub struct ConversationLoop {
    registry: CapabilityRegistry,
    embedder: Arc<dyn EmbeddingProvider>,
    llm: Arc<dyn CompletionProvider>,
    model: String,
    retrieval: RetrievalParams,
    timeouts: TimeoutConfig,
}

/// Await an upstream call, turning a timeout into `UpstreamUnavailable`.
async fn bounded_upstream<T, F>(provider: &str, limit: Duration, fut: F) -> Result<T, SclError>
where
    F: Future<Output = Result<T, SclError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| SclError::upstream(provider, format!("timed out after {:?}", limit)))?
}

/// Decode the model's argument string. An empty string means no arguments.
fn parse_arguments(selection: &ToolSelection) -> Result<Arguments, SclError> {
    let raw = selection.arguments().trim();
    if raw.is_empty() {
        return Ok(Arguments::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(SclError::invocation(
            selection.name(),
            format!("arguments must be a JSON object, got {}", other),
        )),
        Err(e) => Err(SclError::invocation(
            selection.name(),
            format!("arguments are not valid JSON: {}", e),
        )),
    }
}

/// Text sent back to the model for a tool output.
fn render_output(output: &Value) -> String {
    match output {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl ConversationLoop {
    pub fn new(
        registry: CapabilityRegistry,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn CompletionProvider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            embedder,
            llm,
            model: model.into(),
            retrieval: RetrievalParams::default(),
            timeouts: TimeoutConfig::default(),
        }
    }

    /// Build a loop with model, retrieval bounds and timeouts from `config`.
    pub fn from_config(
        registry: CapabilityRegistry,
        embedder: Arc<dyn EmbeddingProvider>,
        llm: Arc<dyn CompletionProvider>,
        config: &SclConfig,
    ) -> Self {
        Self::new(
            registry.with_store_timeout(config.timeouts.store()),
            embedder,
            llm,
            config.completion.model.clone(),
        )
        .with_retrieval(config.retrieval)
        .with_timeouts(config.timeouts.clone())
    }

    pub fn with_retrieval(mut self, retrieval: RetrievalParams) -> Self {
        self.retrieval = retrieval;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        state: &ConversationState,
        tools: Option<&[crate::capabilities::LlmDescription]>,
    ) -> Result<CompletionResponse, SclError> {
        bounded_upstream(
            self.llm.provider_name(),
            self.timeouts.completion(),
            self.llm.complete(&self.model, state.turns(), tools),
        )
        .await
    }

    /// Run one user turn to completion.
    pub async fn run(&self, request: ChatRequest) -> Result<ChatOutcome, SclError> {
        let mut transitions = vec![ProtocolState::Init];
        let embedder = &*self.embedder;
        let mut state = bounded_upstream(
            embedder.provider_name(),
            self.timeouts.embedding(),
            ConversationState::new(Message::user(request.message), embedder),
        )
        .await?;
        log::debug!("Conversation {} started", state.id());

        transitions.push(ProtocolState::Retrieve);
        let params = match &request.hint {
            Some(hint) => self.retrieval.with_hint(hint),
            None => self.retrieval,
        };
        let merged = self
            .registry
            .retrieve(&state, &request.tool_names, &params)
            .await;
        let merge_report = merged.report;

        transitions.push(ProtocolState::RequestWithTools);
        let offered_tools = CapabilityRegistry::offered_tools(&merged.capabilities);
        let tools = CapabilityRegistry::tool_list(&offered_tools);
        log::info!(
            "Conversation {}: offering {} tools ({} capabilities retrieved)",
            state.id(),
            tools.len(),
            merged.len()
        );
        let offered = if tools.is_empty() { None } else { Some(tools.as_slice()) };
        let response = self.complete(&state, offered).await?;

        if !response.has_tool_selections() {
            transitions.push(ProtocolState::Done);
            let content = response.content.unwrap_or_default();
            state.append(Message::assistant(content.clone()));
            return Ok(ChatOutcome {
                content,
                state,
                transitions,
                merge_report,
                executions: Vec::new(),
            });
        }

        transitions.push(ProtocolState::Execute);
        let selections = response.tool_selections;
        let executions = self
            .execute(&mut state, &offered_tools, response.content, selections)
            .await?;
        transitions.push(ProtocolState::AppendResults);

        transitions.push(ProtocolState::RequestWithoutTools);
        let follow_up = self.complete(&state, None).await?;
        if follow_up.has_tool_selections() {
            let names: Vec<&str> = follow_up.tool_selections.iter().map(ToolSelection::name).collect();
            log::warn!(
                "Conversation {}: model requested further tools {:?}; only one tool round is supported",
                state.id(),
                names
            );
        }

        transitions.push(ProtocolState::Done);
        let content = follow_up.content.unwrap_or_default();
        state.append(Message::assistant(content.clone()));
        Ok(ChatOutcome {
            content,
            state,
            transitions,
            merge_report,
            executions,
        })
    }

    /// Execute selections in response order and append the assistant turn
    /// followed by one tool result per selection. `offered` is keyed by the
    /// tool names the model saw.
    async fn execute(
        &self,
        state: &mut ConversationState,
        offered: &CapabilityMap,
        content: Option<String>,
        selections: Vec<ToolSelection>,
    ) -> Result<Vec<ToolExecution>, SclError> {
        let mut executions = Vec::with_capacity(selections.len());
        let mut results = Vec::with_capacity(selections.len());

        for selection in &selections {
            let arguments = parse_arguments(selection)?;
            let capability = self
                .registry
                .resolve(selection.name(), offered)
                .await
                .ok_or_else(|| {
                    SclError::invocation(selection.name(), "model selected an unknown capability")
                })?;

            log::info!(
                "Conversation {}: executing '{}' (call {})",
                state.id(),
                capability.name(),
                selection.id
            );
            let output = self.registry.invoke(&capability, &arguments).await?;
            self.registry.record(state, &capability).await;

            results.push((selection.id.clone(), render_output(&output)));
            executions.push(ToolExecution {
                call_id: selection.id.clone(),
                capability: capability.name().to_string(),
                arguments: Value::Object(arguments),
                output,
            });
        }

        state.append(Message::assistant_with_tool_calls(content, selections));
        for (call_id, text) in results {
            state.append_tool_result(call_id, text);
        }
        Ok(executions)
    }
}
