//! In-flight conversation state.

use uuid::Uuid;

use super::message::{Message, Role};
use crate::rag::core::{Embedding, EmbeddingProvider};
use crate::utilities::errors::SclError;

/// The message sequence of one conversation plus the query vector of its
/// opening user turn.
///
/// The query embedding is computed once, at construction, from the first
/// turn only. Appended turns never affect it: retrieval stays anchored to
/// the opening request.
#[derive(Debug, Clone)]
pub struct ConversationState {
    id: Uuid,
    turns: Vec<Message>,
    query_embedding: Embedding,
}

impl ConversationState {
    /// Start a conversation from its opening turn, embedding its content.
    pub async fn new(first: Message, embedder: &dyn EmbeddingProvider) -> Result<Self, SclError> {
        let query_embedding = embedder.embed(first.content_str()).await?;
        Ok(Self::with_embedding(first, query_embedding))
    }

    /// Start a conversation with an already computed query vector.
    pub fn with_embedding(first: Message, query_embedding: Embedding) -> Self {
        if first.role != Role::User {
            log::warn!("Conversation opened with a {:?} turn instead of a user turn", first.role);
        }
        Self {
            id: Uuid::new_v4(),
            turns: vec![first],
            query_embedding,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn query_embedding(&self) -> &[f32] {
        &self.query_embedding
    }

    /// Content of the opening turn.
    pub fn query(&self) -> &str {
        self.turns.first().map(Message::content_str).unwrap_or("")
    }

    pub fn append(&mut self, message: Message) {
        self.turns.push(message);
    }

    /// Append the result of a tool execution.
    pub fn append_tool_result(&mut self, tool_call_id: impl Into<String>, content: impl Into<String>) {
        self.turns.push(Message::tool_result(tool_call_id, content));
    }

    pub fn into_turns(self) -> Vec<Message> {
        self.turns
    }
}
