use std::fmt;

/// Structured tool invocation requested by the model.
#[derive(Debug, Clone, Default)]
pub struct ToolCall {
    /// Correlation id of the model's request, echoed on the result.
    pub id: String,
    pub tool_id: String,
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl ToolCall {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        tool_id: impl Into<String>,
        params: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            tool_id: tool_id.into(),
            params,
        }
    }

    /// Build a call from a model request; non-object input becomes empty params.
    #[must_use]
    pub fn from_request(request: &refit_llm::ToolUseRequest) -> Self {
        let params = match &request.input {
            serde_json::Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        Self::new(request.id.clone(), request.name.clone(), params)
    }
}

/// Structured result from tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub tool_name: String,
    /// Text shown to the model.
    pub summary: String,
    /// Machine-readable result matching the tool's result schema.
    pub data: Option<serde_json::Value>,
}

impl ToolOutput {
    #[must_use]
    pub fn text(tool_name: &str, summary: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.to_owned(),
            summary: summary.into(),
            data: None,
        }
    }

    /// Attach a structured result. Serialization failures leave `data` empty.
    #[must_use]
    pub fn with_data(mut self, data: &impl serde::Serialize) -> Self {
        self.data = serde_json::to_value(data).ok();
        self
    }
}

impl fmt::Display for ToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary)
    }
}

pub const MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// Truncate tool output that exceeds `MAX_TOOL_OUTPUT_CHARS` using head+tail split.
#[must_use]
pub fn truncate_tool_output(output: &str) -> String {
    if output.len() <= MAX_TOOL_OUTPUT_CHARS {
        return output.to_string();
    }

    let half = MAX_TOOL_OUTPUT_CHARS / 2;
    let mut head_end = half;
    while !output.is_char_boundary(head_end) {
        head_end -= 1;
    }
    let mut tail_start = output.len() - half;
    while !output.is_char_boundary(tail_start) {
        tail_start += 1;
    }
    let head = &output[..head_end];
    let tail = &output[tail_start..];
    let truncated = tail_start - head_end;

    format!(
        "{head}\n\n... [truncated {truncated} chars, showing first and last ~{half} chars] ...\n\n{tail}"
    )
}

/// Errors that can occur during tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid tool parameters: {message}")]
    InvalidParams { message: String },

    #[error("unknown tool: {tool_id}")]
    UnknownTool { tool_id: String },

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("command timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("embedding index unavailable: {0}")]
    IndexUnavailable(String),
}

impl From<std::io::Error> for ToolError {
    fn from(e: std::io::Error) -> Self {
        Self::Execution(e.to_string())
    }
}

/// Deserialize tool call params into a typed struct.
///
/// # Errors
///
/// Returns `ToolError::InvalidParams` when deserialization fails.
pub fn deserialize_params<T: serde::de::DeserializeOwned>(
    params: &serde_json::Map<String, serde_json::Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(serde_json::Value::Object(params.clone())).map_err(|e| {
        ToolError::InvalidParams {
            message: e.to_string(),
        }
    })
}

/// Async trait for tool execution backends.
pub trait ToolExecutor: Send + Sync {
    /// Return tool definitions this executor can handle.
    fn tool_definitions(&self) -> Vec<crate::registry::ToolDef>;

    /// Execute a structured tool call. Returns `None` if `tool_id` is not handled.
    fn execute_tool_call(
        &self,
        call: &ToolCall,
    ) -> impl Future<Output = Result<Option<ToolOutput>, ToolError>> + Send;
}
