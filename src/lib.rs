//! # scl - Structured Context Layer
//!
//! Capability retrieval and dispatch for LLM tool calling. For each user
//! turn the crate retrieves relevant capabilities (explicit names, semantic
//! similarity and usage history), offers the invocable ones to a chat
//! model as tools, executes the model's selections through a function
//! table, and feeds the results back for a final answer.
//!
//! - [`capabilities`] - Capability entity, registry and merge
//! - [`chat`] - Messages, conversation state and the protocol loop
//! - [`storage`] - Capability store port and backends
//! - [`tools`] - Function table and built-in functions
//! - [`llms`] / [`rag`] - Completion and embedding providers
//! - [`server`] - HTTP surface

pub mod capabilities;
pub mod chat;
pub mod llms;
pub mod rag;
pub mod server;
pub mod storage;
pub mod tools;
pub mod utilities;

pub use capabilities::{Capability, CapabilityRegistry, CapabilityType, LlmDescription};
pub use chat::{ChatOutcome, ChatRequest, ConversationLoop, ConversationState, Message};
pub use llms::base_llm::CompletionProvider;
pub use rag::core::EmbeddingProvider;
pub use storage::CapabilityStore;
pub use tools::FunctionTable;
pub use utilities::config::SclConfig;
pub use utilities::errors::{SclError, StoreError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
