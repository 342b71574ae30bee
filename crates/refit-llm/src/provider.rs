use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Boxed future returned by type-erased embedding functions.
pub type EmbedFuture = Pin<Box<dyn Future<Output = Result<Vec<f32>, LlmError>> + Send>>;

/// Type-erased embedding function shared between the index and its callers.
pub type EmbedFn = Arc<dyn Fn(&str) -> EmbedFuture + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    /// Carries the outcome of one tool call back to the model.
    Tool,
}

impl Role {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "tool" => Ok(Self::Tool),
            other => Err(LlmError::Other(format!("unknown message role: {other}"))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessagePart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

impl Message {
    #[must_use]
    pub fn from_legacy(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            parts: vec![],
        }
    }

    /// Build a message from structured parts; `content` becomes the flattened text.
    #[must_use]
    pub fn from_parts(role: Role, parts: Vec<MessagePart>) -> Self {
        let content = flatten_parts(&parts);
        Self {
            role,
            content,
            parts,
        }
    }

    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self::from_legacy(Role::System, content)
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self::from_legacy(Role::User, content)
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::from_legacy(Role::Assistant, content)
    }

    /// Tool calls requested by this message. Empty for anything but assistant messages.
    #[must_use]
    pub fn tool_calls(&self) -> Vec<ToolUseRequest> {
        self.parts
            .iter()
            .filter_map(|p| match p {
                MessagePart::ToolUse { id, name, input } => Some(ToolUseRequest {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
                _ => None,
            })
            .collect()
    }
}

fn flatten_parts(parts: &[MessagePart]) -> String {
    let mut out = String::new();
    for part in parts {
        let piece = match part {
            MessagePart::Text { text } => text.clone(),
            MessagePart::ToolUse { name, input, .. } => format!("[tool_use: {name}({input})]"),
            MessagePart::ToolResult {
                content, is_error, ..
            } => {
                if *is_error {
                    format!("[tool_error] {content}")
                } else {
                    content.clone()
                }
            }
        };
        if piece.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&piece);
    }
    out
}

/// A single tool invocation requested by the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolUseRequest {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Tool description handed to the model alongside the conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema of the tool's arguments.
    pub parameters: serde_json::Value,
}

/// Model decision: either a final answer or a batch of tool calls.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatResponse {
    Text(String),
    ToolUse {
        text: Option<String>,
        tool_calls: Vec<ToolUseRequest>,
    },
}

pub trait LlmProvider: Send + Sync {
    /// Send messages to the model and return the assistant response.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider fails to communicate or the response is invalid.
    fn chat(&self, messages: &[Message]) -> impl Future<Output = Result<String, LlmError>> + Send;

    /// Ask the model to either answer or request tool calls.
    ///
    /// The default falls back to plain chat for providers without native tool support.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying request fails.
    fn chat_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> impl Future<Output = Result<ChatResponse, LlmError>> + Send {
        async move { Ok(ChatResponse::Text(self.chat(messages).await?)) }
    }

    /// Chat with an explicit sampling temperature. Providers that ignore
    /// temperature fall back to [`LlmProvider::chat`].
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying request fails.
    fn chat_with_temperature(
        &self,
        messages: &[Message],
        _temperature: f32,
    ) -> impl Future<Output = Result<String, LlmError>> + Send {
        self.chat(messages)
    }

    /// Compute an embedding vector for `text`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider does not support embeddings or the request fails.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>, LlmError>> + Send;

    fn supports_embeddings(&self) -> bool {
        false
    }

    fn supports_tool_use(&self) -> bool {
        false
    }

    fn name(&self) -> &str;
}

/// Wrap a provider's `embed` into a shareable, type-erased function.
pub fn embed_fn<P>(provider: P) -> EmbedFn
where
    P: LlmProvider + Clone + 'static,
{
    Arc::new(move |text: &str| -> EmbedFuture {
        let provider = provider.clone();
        let owned = text.to_owned();
        Box::pin(async move { provider.embed(&owned).await })
    })
}
