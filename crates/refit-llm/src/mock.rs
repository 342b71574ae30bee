//! Test-only scripted model provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::LlmError;
use crate::provider::{ChatResponse, LlmProvider, Message, ToolDefinition, ToolUseRequest};

/// Dimensionality of the hashed embeddings produced by [`MockProvider`].
pub const MOCK_EMBEDDING_DIMS: usize = 64;

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Arc<Mutex<Vec<String>>>,
    decisions: Arc<Mutex<VecDeque<ChatResponse>>>,
    recorded: Arc<Mutex<Vec<Vec<Message>>>>,
    decision_calls: Arc<AtomicUsize>,
    embed_calls: Arc<AtomicUsize>,
    pub default_response: String,
    /// Returned once `decisions` is drained; `None` means answer with `default_response`.
    pub default_decision: Option<ChatResponse>,
    /// Fixed embedding; `None` derives a deterministic vector from the text.
    pub embedding: Option<Vec<f32>>,
    pub fail_chat: bool,
    pub fail_embed: bool,
    /// Milliseconds to sleep before returning a response.
    pub delay_ms: u64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            responses: Arc::new(Mutex::new(Vec::new())),
            decisions: Arc::new(Mutex::new(VecDeque::new())),
            recorded: Arc::new(Mutex::new(Vec::new())),
            decision_calls: Arc::new(AtomicUsize::new(0)),
            embed_calls: Arc::new(AtomicUsize::new(0)),
            default_response: "mock response".into(),
            default_decision: None,
            embedding: None,
            fail_chat: false,
            fail_embed: false,
            delay_ms: 0,
        }
    }
}

impl MockProvider {
    #[must_use]
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_decisions(decisions: Vec<ChatResponse>) -> Self {
        Self {
            decisions: Arc::new(Mutex::new(decisions.into())),
            ..Self::default()
        }
    }

    /// A provider whose every decision requests the same tool call.
    #[must_use]
    pub fn always_calling(tool: &str, input: serde_json::Value) -> Self {
        Self {
            default_decision: Some(tool_call(tool, input)),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn failing() -> Self {
        Self {
            fail_chat: true,
            fail_embed: true,
            ..Self::default()
        }
    }

    /// Return `embedding` from every `embed` call instead of trigram vectors.
    #[must_use]
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    #[must_use]
    pub fn with_delay(mut self, ms: u64) -> Self {
        self.delay_ms = ms;
        self
    }

    /// Message batches seen by `chat`, `chat_with_temperature`, and `chat_with_tools`.
    #[must_use]
    pub fn recorded(&self) -> Vec<Vec<Message>> {
        self.recorded.lock().unwrap().clone()
    }

    #[must_use]
    pub fn decision_calls(&self) -> usize {
        self.decision_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn embed_calls(&self) -> usize {
        self.embed_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
    }
}

/// Build a single-call `ChatResponse::ToolUse`.
#[must_use]
pub fn tool_call(tool: &str, input: serde_json::Value) -> ChatResponse {
    ChatResponse::ToolUse {
        text: None,
        tool_calls: vec![ToolUseRequest {
            id: String::new(),
            name: tool.to_owned(),
            input,
        }],
    }
}

/// Deterministic character-trigram embedding; identical text yields identical vectors.
#[must_use]
pub fn hashed_embedding(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; MOCK_EMBEDDING_DIMS];
    let chars: Vec<char> = text.chars().collect();
    for window in chars.windows(3.min(chars.len().max(1))) {
        let mut h: u64 = 0xcbf2_9ce4_8422_2325;
        for c in window {
            h ^= u64::from(u32::from(*c));
            h = h.wrapping_mul(0x0100_0000_01b3);
        }
        let slot = usize::try_from(h % MOCK_EMBEDDING_DIMS as u64).unwrap_or(0);
        vector[slot] += 1.0;
    }
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut vector {
            *x /= norm;
        }
    }
    vector
}

impl LlmProvider for MockProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        self.pause().await;
        self.recorded.lock().unwrap().push(messages.to_vec());
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            Ok(self.default_response.clone())
        } else {
            Ok(responses.remove(0))
        }
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        _tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        self.pause().await;
        let n = self.decision_calls.fetch_add(1, Ordering::SeqCst);
        self.recorded.lock().unwrap().push(messages.to_vec());
        if self.fail_chat {
            return Err(LlmError::Other("mock LLM error".into()));
        }
        let next = self.decisions.lock().unwrap().pop_front();
        let decision = next
            .or_else(|| self.default_decision.clone())
            .unwrap_or_else(|| ChatResponse::Text(self.default_response.clone()));
        Ok(match decision {
            ChatResponse::ToolUse { text, tool_calls } => ChatResponse::ToolUse {
                text,
                tool_calls: tool_calls
                    .into_iter()
                    .enumerate()
                    .map(|(i, mut call)| {
                        if call.id.is_empty() {
                            call.id = format!("mock_call_{n}_{i}");
                        }
                        call
                    })
                    .collect(),
            },
            text @ ChatResponse::Text(_) => text,
        })
    }

    async fn chat_with_temperature(
        &self,
        messages: &[Message],
        _temperature: f32,
    ) -> Result<String, LlmError> {
        self.chat(messages).await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_embed {
            return Err(LlmError::EmbedUnsupported {
                provider: "mock".into(),
            });
        }
        Ok(self
            .embedding
            .clone()
            .unwrap_or_else(|| hashed_embedding(text)))
    }

    fn supports_embeddings(&self) -> bool {
        !self.fail_embed
    }

    fn supports_tool_use(&self) -> bool {
        true
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "mock"
    }
}
