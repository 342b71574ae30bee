//! Model collaborators: chat, tool-calling decisions, and embeddings.

pub mod error;
pub mod http;
#[cfg(feature = "mock")]
pub mod mock;
pub mod ollama;
pub mod provider;

pub use error::LlmError;
pub use provider::{
    ChatResponse, EmbedFn, EmbedFuture, LlmProvider, Message, MessagePart, Role, ToolDefinition,
    ToolUseRequest, embed_fn,
};
