//! Retrieval-augmented `refactor` tool.

use std::time::Duration;

use refit_index::{CodeRetriever, format_as_exemplars};
use refit_llm::{LlmProvider, Message};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::executor::{ToolCall, ToolError, ToolExecutor, ToolOutput, deserialize_params};
use crate::registry::ToolDef;

pub const REFACTOR_SYSTEM_PROMPT: &str = "You are an expert Python developer. Refactor the provided code to \
improve readability, follow PEP 8, use idiomatic Python, and apply type hints where appropriate.\n\n\
Return ONLY the refactored Python code: no explanation, no markdown fences, no commentary.";

const DEFAULT_TEMPERATURE: f32 = 0.2;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RefactorParams {
    /// The Python code to refactor
    pub code: String,
    /// Optional specific refactoring instructions (e.g. "use dataclasses", "split into smaller functions")
    #[serde(default)]
    pub instructions: Option<String>,
}

#[derive(Debug, Serialize, JsonSchema)]
pub struct RefactorResult {
    pub code: String,
    /// Number of indexed snippets shown to the model.
    pub exemplars: usize,
}

/// Build the user prompt for a refactor request.
#[must_use]
pub fn build_refactor_prompt(code: &str, instructions: Option<&str>, exemplars: &str) -> String {
    let mut prompt = format!("Code to refactor:\n```python\n{code}\n```");
    if let Some(instructions) = instructions.map(str::trim).filter(|i| !i.is_empty()) {
        prompt.push_str("\n\nSpecific instructions: ");
        prompt.push_str(instructions);
    }
    if !exemplars.is_empty() {
        prompt.push_str("\n\nSimilar code patterns for reference:\n```python\n");
        prompt.push_str(exemplars);
        prompt.push_str("\n```");
    }
    prompt
}

/// Remove a surrounding markdown fence, if the model added one anyway.
///
/// Leading blank lines and trailing whitespace go; indentation of the first code line stays.
#[must_use]
pub fn strip_code_fences(reply: &str) -> &str {
    let Some(rest) = reply.trim_start().strip_prefix("```") else {
        return trim_blank_edges(reply);
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    let body = body.trim_end();
    trim_blank_edges(body.strip_suffix("```").unwrap_or(body))
}

fn trim_blank_edges(text: &str) -> &str {
    let text = text.trim_end();
    let first_visible = text.find(|c: char| !c.is_whitespace()).unwrap_or(text.len());
    let line_start = text[..first_visible].rfind('\n').map_or(0, |i| i + 1);
    &text[line_start..]
}

/// Rewrites code with the model, using similar indexed code as few-shot context.
pub struct RefactorExecutor<P> {
    provider: P,
    retriever: CodeRetriever,
    temperature: f32,
    timeout: Duration,
}

impl<P: LlmProvider> RefactorExecutor<P> {
    #[must_use]
    pub fn new(provider: P, retriever: CodeRetriever) -> Self {
        Self {
            provider,
            retriever,
            temperature: DEFAULT_TEMPERATURE,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn refactor(&self, params: &RefactorParams) -> Result<ToolOutput, ToolError> {
        if params.code.trim().is_empty() {
            return Err(ToolError::InvalidParams {
                message: "`code` must not be empty".into(),
            });
        }

        self.retriever
            .index()
            .get()
            .await
            .map_err(|e| ToolError::IndexUnavailable(e.to_string()))?;
        let hits = match self.retriever.retrieve(&params.code).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("retrieval failed, refactoring without exemplars: {e}");
                Vec::new()
            }
        };
        tracing::debug!(exemplars = hits.len(), "retrieved refactor context");

        let prompt = build_refactor_prompt(
            &params.code,
            params.instructions.as_deref(),
            &format_as_exemplars(&hits),
        );
        let messages = [Message::system(REFACTOR_SYSTEM_PROMPT), Message::user(prompt)];

        let span = tracing::info_span!("llm_call", provider = self.provider.name(), purpose = "refactor");
        let reply = tokio::time::timeout(
            self.timeout,
            self.provider
                .chat_with_temperature(&messages, self.temperature)
                .instrument(span),
        )
        .await
        .map_err(|_| ToolError::Timeout {
            timeout_secs: self.timeout.as_secs(),
        })?
        .map_err(|e| ToolError::Execution(format!("refactor model call failed: {e}")))?;

        let code = strip_code_fences(&reply);
        if code.is_empty() {
            return Err(ToolError::Execution("model returned no code".into()));
        }
        let code = code.to_owned();
        Ok(ToolOutput::text("refactor", code.clone()).with_data(&RefactorResult {
            code,
            exemplars: hits.len(),
        }))
    }
}

impl<P: LlmProvider> ToolExecutor for RefactorExecutor<P> {
    fn tool_definitions(&self) -> Vec<ToolDef> {
        vec![ToolDef {
            id: "refactor",
            description: "Refactor Python code to improve readability, style, and idioms, \
                          guided by similar code from indexed repositories",
            schema: schemars::schema_for!(RefactorParams),
            result_schema: schemars::schema_for!(RefactorResult),
        }]
    }

    async fn execute_tool_call(&self, call: &ToolCall) -> Result<Option<ToolOutput>, ToolError> {
        if call.tool_id != "refactor" {
            return Ok(None);
        }
        let params: RefactorParams = deserialize_params(&call.params)?;
        self.refactor(&params).await.map(Some)
    }
}
