use std::fmt::Write;

use serde_json::{Map, Value};
use tracing::Instrument;

use crate::executor::{ToolCall, ToolError, ToolExecutor, truncate_tool_output};

#[derive(Debug, Clone)]
pub struct ToolDef {
    pub id: &'static str,
    pub description: &'static str,
    /// JSON Schema of the arguments.
    pub schema: schemars::Schema,
    /// JSON Schema of the structured result.
    pub result_schema: schemars::Schema,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    Success,
    Failure,
}

/// Outcome of one dispatched call, correlated to the request by `tool_use_id`.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub tool_use_id: String,
    pub tool_name: String,
    pub status: ToolStatus,
    /// Tool output on success, the error explanation on failure.
    pub payload: String,
    pub data: Option<Value>,
}

impl ToolResult {
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Failure
    }

    fn failure(call: &ToolCall, error: &ToolError) -> Self {
        Self {
            tool_use_id: call.id.clone(),
            tool_name: call.tool_id.clone(),
            status: ToolStatus::Failure,
            payload: format!("[error] {error}"),
            data: None,
        }
    }
}

/// Fixed catalog of tools backed by an executor, with argument checking.
#[derive(Debug)]
pub struct ToolRegistry<E> {
    executor: E,
    tools: Vec<ToolDef>,
}

impl<E: ToolExecutor> ToolRegistry<E> {
    #[must_use]
    pub fn new(executor: E) -> Self {
        let tools = executor.tool_definitions();
        Self { executor, tools }
    }

    #[must_use]
    pub fn tools(&self) -> &[ToolDef] {
        &self.tools
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&ToolDef> {
        self.tools.iter().find(|t| t.id == id)
    }

    /// Tool descriptions in the shape the model expects.
    #[must_use]
    pub fn definitions(&self) -> Vec<refit_llm::ToolDefinition> {
        self.tools.iter().map(tool_def_to_definition).collect()
    }

    /// Validate and execute one call. Never fails: every error becomes a failure result.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolResult {
        let span = tracing::info_span!("tool_exec", tool_name = %call.tool_id, id = %call.id);
        async {
            let Some(def) = self.find(&call.tool_id) else {
                let err = ToolError::UnknownTool {
                    tool_id: call.tool_id.clone(),
                };
                tracing::warn!("{err}");
                return ToolResult::failure(call, &err);
            };
            if let Err(err) = validate_params(&def.schema, &call.params) {
                tracing::warn!("{err}");
                return ToolResult::failure(call, &err);
            }

            let start = std::time::Instant::now();
            let outcome = self.executor.execute_tool_call(call).await;
            let elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
            match outcome {
                Ok(Some(output)) => {
                    tracing::debug!(elapsed_ms, "tool succeeded");
                    ToolResult {
                        tool_use_id: call.id.clone(),
                        tool_name: call.tool_id.clone(),
                        status: ToolStatus::Success,
                        payload: truncate_tool_output(&output.summary),
                        data: output.data,
                    }
                }
                Ok(None) => {
                    let err = ToolError::UnknownTool {
                        tool_id: call.tool_id.clone(),
                    };
                    tracing::warn!("{err}");
                    ToolResult::failure(call, &err)
                }
                Err(err) => {
                    tracing::warn!(elapsed_ms, "tool failed: {err}");
                    ToolResult::failure(call, &err)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Human-readable catalog for system prompts.
    #[must_use]
    pub fn format_for_prompt(&self) -> String {
        let mut out = String::new();
        for tool in &self.tools {
            format_tool(&mut out, tool);
        }
        out
    }
}

fn tool_def_to_definition(def: &ToolDef) -> refit_llm::ToolDefinition {
    let mut params = serde_json::to_value(&def.schema).unwrap_or_default();
    if let Value::Object(ref mut map) = params {
        map.remove("$schema");
        map.remove("title");
    }
    refit_llm::ToolDefinition {
        name: def.id.to_string(),
        description: def.description.to_string(),
        parameters: params,
    }
}

fn format_tool(out: &mut String, tool: &ToolDef) {
    let _ = writeln!(out, "- {}: {}", tool.id, tool.description);
    format_schema_params(out, &tool.schema);
    if let Some(Value::Object(props)) = tool
        .result_schema
        .as_object()
        .and_then(|o| o.get("properties"))
        && !props.is_empty()
    {
        let fields: Vec<&str> = props.keys().map(String::as_str).collect();
        let _ = writeln!(out, "  Returns: {}", fields.join(", "));
    }
}

/// Extract the primary type when schemars renders `Option<T>` as `"type": ["T", "null"]`
/// or `"anyOf": [{"type": "T"}, {"type": "null"}]`.
fn extract_non_null_type(obj: &Map<String, Value>) -> Option<&str> {
    if let Some(arr) = obj.get("type").and_then(|v| v.as_array()) {
        return arr.iter().filter_map(|v| v.as_str()).find(|t| *t != "null");
    }
    obj.get("anyOf")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_object())
        .filter_map(|o| o.get("type")?.as_str())
        .find(|t| *t != "null")
}

fn required_fields(obj: &Map<String, Value>) -> Vec<&str> {
    obj.get("required")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default()
}

fn format_schema_params(out: &mut String, schema: &schemars::Schema) {
    let Some(obj) = schema.as_object() else {
        return;
    };
    let Some(Value::Object(props)) = obj.get("properties") else {
        return;
    };
    if props.is_empty() {
        return;
    }

    let required = required_fields(obj);
    for (name, prop) in props {
        let prop_obj = prop.as_object();
        let ty = prop_obj
            .and_then(|o| {
                o.get("type")
                    .and_then(|v| v.as_str())
                    .or_else(|| extract_non_null_type(o))
            })
            .unwrap_or("string");
        let desc = prop_obj
            .and_then(|o| o.get("description"))
            .and_then(|v| v.as_str())
            .unwrap_or("");
        let req = if required.contains(&name.as_str()) {
            "required"
        } else {
            "optional"
        };
        let _ = writeln!(out, "  - {name}: {desc} ({ty}, {req})");
    }
}

/// Every JSON type a property accepts; empty means unconstrained.
fn declared_types(prop: &Map<String, Value>) -> Vec<&str> {
    match prop.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ => prop
            .get("anyOf")
            .and_then(Value::as_array)
            .map(|alts| {
                alts.iter()
                    .filter_map(|alt| alt.get("type")?.as_str())
                    .collect()
            })
            .unwrap_or_default(),
    }
}

fn type_matches(ty: &str, value: &Value) -> bool {
    match ty {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check `params` against the top-level shape of `schema`: required fields
/// present and non-null, declared property types respected, and no unknown
/// fields when the schema forbids them.
///
/// # Errors
///
/// Returns `ToolError::InvalidParams` describing the first mismatch.
pub fn validate_params(schema: &schemars::Schema, params: &Map<String, Value>) -> Result<(), ToolError> {
    let Some(obj) = schema.as_object() else {
        return Ok(());
    };
    let invalid = |message: String| Err(ToolError::InvalidParams { message });

    for name in required_fields(obj) {
        if params.get(name).is_none_or(Value::is_null) {
            return invalid(format!("missing required parameter `{name}`"));
        }
    }

    let props = obj.get("properties").and_then(Value::as_object);
    let closed = obj.get("additionalProperties") == Some(&Value::Bool(false));
    for (name, value) in params {
        let Some(prop) = props.and_then(|p| p.get(name)).and_then(Value::as_object) else {
            if closed {
                return invalid(format!("unexpected parameter `{name}`"));
            }
            continue;
        };
        let types = declared_types(prop);
        if value.is_null() && !types.contains(&"null") {
            // Absent and null optional values mean the same thing to serde defaults.
            continue;
        }
        if !types.is_empty() && !types.iter().any(|t| type_matches(t, value)) {
            return invalid(format!(
                "parameter `{name}` must be {}, got {}",
                types.join(" or "),
                json_type_name(value)
            ));
        }
    }
    Ok(())
}
