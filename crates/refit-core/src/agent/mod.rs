pub mod error;
pub mod prompt;

use std::sync::Arc;
use std::time::Duration;

use refit_llm::{ChatResponse, LlmProvider, Message, MessagePart, Role, ToolDefinition, ToolUseRequest};
use refit_memory::{SessionGuard, SessionId, SessionStore};
use refit_tools::{ToolCall, ToolExecutor, ToolRegistry};
use tracing::Instrument;

use error::AgentError;

pub const DEFAULT_MAX_TOOL_ITERATIONS: usize = 10;
pub const DEFAULT_LLM_TIMEOUT: Duration = Duration::from_secs(120);

/// Where a turn stands between model decisions and tool dispatch.
#[derive(Debug)]
enum TurnState {
    AwaitingDecision,
    Dispatching {
        text: Option<String>,
        calls: Vec<ToolUseRequest>,
    },
    Done(String),
}

/// Drives one conversational turn: model decisions, tool dispatch, history writes.
///
/// The orchestrator is the only writer of session history. A turn appends the
/// user message, then alternates between asking the model and dispatching the
/// tools it requests until the model answers or the round cap is hit.
pub struct Orchestrator<P, E> {
    provider: P,
    registry: ToolRegistry<E>,
    sessions: Arc<SessionStore>,
    system_prompt: String,
    tool_defs: Vec<ToolDefinition>,
    max_tool_iterations: usize,
    llm_timeout: Duration,
}

impl<P: LlmProvider, E: ToolExecutor> Orchestrator<P, E> {
    #[must_use]
    pub fn new(provider: P, registry: ToolRegistry<E>, sessions: Arc<SessionStore>) -> Self {
        let system_prompt = prompt::build_system_prompt(&registry.format_for_prompt());
        let tool_defs = registry.definitions();
        Self {
            provider,
            registry,
            sessions,
            system_prompt,
            tool_defs,
            max_tool_iterations: DEFAULT_MAX_TOOL_ITERATIONS,
            llm_timeout: DEFAULT_LLM_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_max_tool_iterations(mut self, cap: usize) -> Self {
        self.max_tool_iterations = cap;
        self
    }

    #[must_use]
    pub fn with_llm_timeout(mut self, timeout: Duration) -> Self {
        self.llm_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    #[must_use]
    pub fn registry(&self) -> &ToolRegistry<E> {
        &self.registry
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Run one turn for `session_id` and return the model's final answer.
    ///
    /// The session is locked for the whole turn, so concurrent turns on the
    /// same session run one after another while other sessions proceed.
    ///
    /// # Errors
    ///
    /// Returns `EmptyInput` for blank input, `IterationCapExceeded` when the
    /// model keeps requesting tools past the cap, and model, timeout, or
    /// persistence errors as they occur. Tool failures never abort the turn.
    pub async fn advance(&self, session_id: &SessionId, user_text: &str) -> Result<String, AgentError> {
        if user_text.trim().is_empty() {
            return Err(AgentError::EmptyInput);
        }

        let mut session = self.sessions.lock(session_id).await?;
        session.append(Message::user(user_text)).await?;

        let cap = self.max_tool_iterations;
        let mut rounds = 0usize;
        let mut state = TurnState::AwaitingDecision;
        loop {
            state = match state {
                TurnState::AwaitingDecision => match self.decide(session.messages()).await? {
                    ChatResponse::Text(answer) => TurnState::Done(answer),
                    ChatResponse::ToolUse { text, tool_calls } if tool_calls.is_empty() => {
                        TurnState::Done(text.unwrap_or_default())
                    }
                    ChatResponse::ToolUse { tool_calls, .. } if rounds >= cap => {
                        tracing::warn!(
                            cap,
                            pending = tool_calls.len(),
                            "tool round cap reached, aborting turn"
                        );
                        return Err(AgentError::IterationCapExceeded { cap });
                    }
                    ChatResponse::ToolUse { text, tool_calls } => TurnState::Dispatching {
                        text,
                        calls: tool_calls,
                    },
                },
                TurnState::Dispatching { text, calls } => {
                    tracing::debug!(round = rounds, calls = calls.len(), "dispatching tool calls");
                    self.dispatch_round(&mut session, rounds, text, calls).await?;
                    rounds += 1;
                    TurnState::AwaitingDecision
                }
                TurnState::Done(answer) => {
                    session.append(Message::assistant(answer.as_str())).await?;
                    tracing::info!(session = %session_id, rounds, "turn complete");
                    return Ok(answer);
                }
            };
        }
    }

    async fn decide(&self, history: &[Message]) -> Result<ChatResponse, AgentError> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::system(self.system_prompt.as_str()));
        messages.extend_from_slice(history);

        let llm_span = tracing::info_span!("llm_call", provider = self.provider.name());
        let chat_fut = tokio::time::timeout(
            self.llm_timeout,
            self.provider
                .chat_with_tools(&messages, &self.tool_defs)
                .instrument(llm_span),
        );
        let Ok(result) = chat_fut.await else {
            tracing::warn!(timeout_secs = self.llm_timeout.as_secs(), "model call timed out");
            return Err(AgentError::LlmTimeout {
                timeout_secs: self.llm_timeout.as_secs(),
            });
        };
        Ok(result?)
    }

    /// Record the model's request, run every call in order, and record each result.
    async fn dispatch_round(
        &self,
        session: &mut SessionGuard,
        round: usize,
        text: Option<String>,
        calls: Vec<ToolUseRequest>,
    ) -> Result<(), AgentError> {
        let calls: Vec<ToolUseRequest> = calls
            .into_iter()
            .enumerate()
            .map(|(i, mut call)| {
                if call.id.is_empty() {
                    call.id = format!("call_{round}_{i}");
                }
                call
            })
            .collect();

        let mut parts = Vec::with_capacity(calls.len() + 1);
        if let Some(t) = text
            && !t.is_empty()
        {
            parts.push(MessagePart::Text { text: t });
        }
        parts.extend(calls.iter().map(|c| MessagePart::ToolUse {
            id: c.id.clone(),
            name: c.name.clone(),
            input: c.input.clone(),
        }));
        session
            .append(Message::from_parts(Role::Assistant, parts))
            .await?;

        for request in &calls {
            let result = self.registry.dispatch(&ToolCall::from_request(request)).await;
            let is_error = result.is_error();
            let part = MessagePart::ToolResult {
                tool_use_id: result.tool_use_id,
                content: result.payload,
                is_error,
            };
            session
                .append(Message::from_parts(Role::Tool, vec![part]))
                .await?;
        }
        Ok(())
    }
}
