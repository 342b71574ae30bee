use std::collections::HashMap;
use std::time::Duration;

use ollama_rs::Ollama;
use ollama_rs::generation::chat::ChatMessage;
use ollama_rs::generation::chat::request::ChatMessageRequest;
use ollama_rs::generation::embeddings::request::{EmbeddingsInput, GenerateEmbeddingsRequest};
use serde::{Deserialize, Serialize};

use crate::error::LlmError;
use crate::provider::{
    ChatResponse, LlmProvider, Message, MessagePart, Role, ToolDefinition, ToolUseRequest,
};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Ollama,
    http: reqwest::Client,
    base_url: String,
    model: String,
    embedding_model: String,
}

impl OllamaProvider {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, model: String, embedding_model: String) -> Result<Self, LlmError> {
        let (host, port) = parse_host_port(base_url);
        Ok(Self {
            client: Ollama::new(host, port),
            http: crate::http::build_client(DEFAULT_REQUEST_TIMEOUT)?,
            base_url: base_url.trim_end_matches('/').to_owned(),
            model,
            embedding_model,
        })
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Check if Ollama is reachable.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection to Ollama fails.
    pub async fn health_check(&self) -> Result<(), LlmError> {
        self.client.list_local_models().await.map_err(|e| {
            LlmError::Other(format!("failed to connect to Ollama, is it running? {e}"))
        })?;
        Ok(())
    }

    async fn post_chat(&self, body: &ApiChatRequest<'_>) -> Result<ApiChatMessage, LlmError> {
        let response = self
            .http
            .post(format!("{}/api/chat", self.base_url))
            .json(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(LlmError::RateLimited);
        }
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            return Err(LlmError::Unavailable);
        }
        if !status.is_success() {
            tracing::error!("Ollama API error {status}: {text}");
            return Err(LlmError::Other(format!(
                "Ollama chat request failed (status {status})"
            )));
        }

        let resp: ApiChatResponse = serde_json::from_str(&text)?;
        resp.message.ok_or(LlmError::EmptyResponse {
            provider: "ollama".into(),
        })
    }
}

impl LlmProvider for OllamaProvider {
    async fn chat(&self, messages: &[Message]) -> Result<String, LlmError> {
        let ollama_messages: Vec<ChatMessage> = messages.iter().map(convert_message).collect();
        let request = ChatMessageRequest::new(self.model.clone(), ollama_messages);

        let response = self
            .client
            .send_chat_messages(request)
            .await
            .map_err(|e| LlmError::Other(format!("Ollama chat request failed: {e}")))?;

        Ok(response.message.content)
    }

    async fn chat_with_tools(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ChatResponse, LlmError> {
        let api_messages = convert_messages_structured(messages);
        let api_tools: Vec<ApiTool<'_>> = tools
            .iter()
            .map(|t| ApiTool {
                r#type: "function",
                function: ApiFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect();

        let body = ApiChatRequest {
            model: &self.model,
            messages: &api_messages,
            tools: &api_tools,
            stream: false,
            options: None,
        };
        let message = self.post_chat(&body).await?;
        Ok(into_chat_response(message))
    }

    async fn chat_with_temperature(
        &self,
        messages: &[Message],
        temperature: f32,
    ) -> Result<String, LlmError> {
        let api_messages = convert_messages_structured(messages);
        let body = ApiChatRequest {
            model: &self.model,
            messages: &api_messages,
            tools: &[],
            stream: false,
            options: Some(ApiOptions { temperature }),
        };
        Ok(self.post_chat(&body).await?.content)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let request = GenerateEmbeddingsRequest::new(
            self.embedding_model.clone(),
            EmbeddingsInput::from(text),
        );

        let response = self
            .client
            .generate_embeddings(request)
            .await
            .map_err(|e| LlmError::Other(format!("Ollama embedding request failed: {e}")))?;

        response
            .embeddings
            .into_iter()
            .next()
            .ok_or(LlmError::EmptyResponse {
                provider: "ollama".into(),
            })
    }

    fn supports_embeddings(&self) -> bool {
        true
    }

    fn supports_tool_use(&self) -> bool {
        true
    }

    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "ollama"
    }
}

#[derive(Serialize)]
struct ApiChatRequest<'a> {
    model: &'a str,
    messages: &'a [ApiChatMessage],
    #[serde(skip_serializing_if = "is_empty_slice")]
    tools: &'a [ApiTool<'a>],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<ApiOptions>,
}

fn is_empty_slice<T>(items: &&[T]) -> bool {
    items.is_empty()
}

#[derive(Serialize)]
struct ApiOptions {
    temperature: f32,
}

#[derive(Serialize)]
struct ApiTool<'a> {
    r#type: &'a str,
    function: ApiFunction<'a>,
}

#[derive(Serialize)]
struct ApiFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiChatMessage {
    role: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCall {
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

#[derive(Deserialize)]
struct ApiChatResponse {
    message: Option<ApiChatMessage>,
}

fn into_chat_response(message: ApiChatMessage) -> ChatResponse {
    if message.tool_calls.is_empty() {
        return ChatResponse::Text(message.content);
    }
    let text = if message.content.trim().is_empty() {
        None
    } else {
        Some(message.content)
    };
    // Ollama does not assign call ids, so correlation ids are minted here.
    let tool_calls = message
        .tool_calls
        .into_iter()
        .map(|tc| ToolUseRequest {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: tc.function.name,
            input: match tc.function.arguments {
                serde_json::Value::Object(map) => serde_json::Value::Object(map),
                serde_json::Value::String(raw) => serde_json::from_str(&raw)
                    .unwrap_or(serde_json::Value::Object(serde_json::Map::new())),
                _ => serde_json::Value::Object(serde_json::Map::new()),
            },
        })
        .collect();
    ChatResponse::ToolUse { text, tool_calls }
}

fn convert_messages_structured(messages: &[Message]) -> Vec<ApiChatMessage> {
    let mut names_by_id: HashMap<&str, &str> = HashMap::new();
    let mut result = Vec::with_capacity(messages.len());

    for msg in messages {
        match msg.role {
            Role::Assistant => {
                let mut text = String::new();
                let mut tool_calls = Vec::new();
                for part in &msg.parts {
                    match part {
                        MessagePart::Text { text: t } => text.push_str(t),
                        MessagePart::ToolUse { id, name, input } => {
                            names_by_id.insert(id, name);
                            tool_calls.push(ApiToolCall {
                                function: ApiFunctionCall {
                                    name: name.clone(),
                                    arguments: input.clone(),
                                },
                            });
                        }
                        MessagePart::ToolResult { .. } => {}
                    }
                }
                if msg.parts.is_empty() {
                    text.clone_from(&msg.content);
                }
                result.push(ApiChatMessage {
                    role: "assistant".to_owned(),
                    content: text,
                    tool_calls,
                    tool_name: None,
                });
            }
            Role::Tool => {
                for part in &msg.parts {
                    if let MessagePart::ToolResult {
                        tool_use_id,
                        content,
                        ..
                    } = part
                    {
                        result.push(ApiChatMessage {
                            role: "tool".to_owned(),
                            content: content.clone(),
                            tool_calls: Vec::new(),
                            tool_name: names_by_id
                                .get(tool_use_id.as_str())
                                .map(|n| (*n).to_owned()),
                        });
                    }
                }
                if msg.parts.is_empty() {
                    result.push(ApiChatMessage {
                        role: "tool".to_owned(),
                        content: msg.content.clone(),
                        tool_calls: Vec::new(),
                        tool_name: None,
                    });
                }
            }
            Role::System | Role::User => result.push(ApiChatMessage {
                role: msg.role.as_str().to_owned(),
                content: msg.content.clone(),
                tool_calls: Vec::new(),
                tool_name: None,
            }),
        }
    }
    result
}

fn convert_message(msg: &Message) -> ChatMessage {
    let text = msg.content.clone();
    match msg.role {
        Role::System => ChatMessage::system(text),
        Role::Assistant => ChatMessage::assistant(text),
        Role::User => ChatMessage::user(text),
        Role::Tool => ChatMessage::user(format!("[tool result]\n{text}")),
    }
}

fn parse_host_port(url: &str) -> (String, u16) {
    let url = url.trim_end_matches('/');
    if let Some(colon_pos) = url.rfind(':') {
        let port_str = &url[colon_pos + 1..];
        if let Ok(port) = port_str.parse::<u16>() {
            let host = url[..colon_pos].to_string();
            return (host, port);
        }
    }
    (url.to_string(), 11434)
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn provider(base_url: &str) -> OllamaProvider {
        OllamaProvider::new(base_url, "llama3.1".into(), "nomic-embed-text".into()).unwrap()
    }

    fn lint_tool() -> ToolDefinition {
        ToolDefinition {
            name: "lint".into(),
            description: "Run ruff".into(),
            parameters: serde_json::json!({"type": "object"}),
        }
    }

    #[test]
    fn parse_host_port_with_port() {
        let (host, port) = parse_host_port("http://localhost:11434");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_without_port() {
        let (host, port) = parse_host_port("http://localhost/");
        assert_eq!(host, "http://localhost");
        assert_eq!(port, 11434);
    }

    #[test]
    fn parse_host_port_invalid_port_falls_back() {
        let (host, port) = parse_host_port("http://localhost:notaport");
        assert_eq!(host, "http://localhost:notaport");
        assert_eq!(port, 11434);
    }

    #[test]
    fn tool_results_carry_tool_name_from_preceding_call() {
        let messages = vec![
            Message::user("lint x=1"),
            Message::from_parts(
                Role::Assistant,
                vec![MessagePart::ToolUse {
                    id: "call_1".into(),
                    name: "lint".into(),
                    input: serde_json::json!({"code": "x=1"}),
                }],
            ),
            Message::from_parts(
                Role::Tool,
                vec![MessagePart::ToolResult {
                    tool_use_id: "call_1".into(),
                    content: "No violations found.".into(),
                    is_error: false,
                }],
            ),
        ];
        let api = convert_messages_structured(&messages);
        assert_eq!(api.len(), 3);
        assert_eq!(api[1].tool_calls.len(), 1);
        assert_eq!(api[2].role, "tool");
        assert_eq!(api[2].tool_name.as_deref(), Some("lint"));
    }

    #[test]
    fn plain_assistant_message_keeps_content() {
        let api = convert_messages_structured(&[Message::assistant("done")]);
        assert_eq!(api[0].content, "done");
        assert!(api[0].tool_calls.is_empty());
    }

    #[test]
    fn string_arguments_are_parsed_as_json() {
        let response = into_chat_response(ApiChatMessage {
            role: "assistant".into(),
            content: String::new(),
            tool_calls: vec![ApiToolCall {
                function: ApiFunctionCall {
                    name: "lint".into(),
                    arguments: serde_json::Value::String(r#"{"code":"x"}"#.into()),
                },
            }],
            tool_name: None,
        });
        let ChatResponse::ToolUse { text, tool_calls } = response else {
            panic!("expected tool use");
        };
        assert!(text.is_none());
        assert_eq!(tool_calls[0].input["code"], "x");
        assert!(tool_calls[0].id.starts_with("call_"));
    }

    #[tokio::test]
    async fn chat_with_tools_parses_tool_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"model": "llama3.1", "stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {
                    "role": "assistant",
                    "content": "",
                    "tool_calls": [{"function": {"name": "lint", "arguments": {"code": "x=1"}}}]
                },
                "done": true
            })))
            .mount(&server)
            .await;

        let response = provider(&server.uri())
            .chat_with_tools(&[Message::user("lint x=1")], &[lint_tool()])
            .await
            .unwrap();
        let ChatResponse::ToolUse { tool_calls, .. } = response else {
            panic!("expected tool use");
        };
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].name, "lint");
    }

    #[tokio::test]
    async fn chat_with_tools_returns_text_without_calls() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "All clean."},
                "done": true
            })))
            .mount(&server)
            .await;

        let response = provider(&server.uri())
            .chat_with_tools(&[Message::user("hi")], &[lint_tool()])
            .await
            .unwrap();
        assert_eq!(response, ChatResponse::Text("All clean.".into()));
    }

    #[tokio::test]
    async fn chat_with_temperature_sends_options() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"options": {"temperature": 0.5}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"role": "assistant", "content": "def add(a, b): ..."}
            })))
            .mount(&server)
            .await;

        let text = provider(&server.uri())
            .chat_with_temperature(&[Message::user("refactor")], 0.5)
            .await
            .unwrap();
        assert_eq!(text, "def add(a, b): ...");
    }

    #[tokio::test]
    async fn server_error_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .chat_with_tools(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("status 500"));
    }

    #[tokio::test]
    async fn rate_limit_maps_to_dedicated_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let err = provider(&server.uri())
            .chat_with_tools(&[Message::user("hi")], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::RateLimited));
    }

    #[test]
    fn capability_flags() {
        let p = provider("http://localhost:11434");
        assert!(p.supports_embeddings());
        assert!(p.supports_tool_use());
        assert_eq!(p.name(), "ollama");
        assert_eq!(p.model(), "llama3.1");
    }
}
