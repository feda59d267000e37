//! Conversation state and the tool-calling protocol.
//!
//! ```text
//! User message
//!   → Embed first turn
//!   → Retrieve capabilities (names ∪ similarity ∪ history)
//!   → Request with tools
//!   → Execute selections, append results
//!   → Request without tools
//!   → Final answer
//! ```

pub mod conversation_loop;
pub mod message;
pub mod state;

pub use conversation_loop::{ChatOutcome, ChatRequest, ConversationLoop, ProtocolState, ToolExecution};
pub use message::{Message, Role, ToolSelection};
pub use state::ConversationState;
