use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use tandem_core::config::ModelConfig;
use tandem_core::error::{Result, TandemError};
use tandem_core::schema;
use tandem_core::traits::ModelClient;
use tandem_core::types::*;

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI-compatible client. Works with OpenAI, Ollama, vLLM, Groq,
/// OpenRouter, and anything else speaking the chat-completions wire format.
pub struct OpenAiClient {
    http: Client,
    config: ModelConfig,
}

impl OpenAiClient {
    pub fn new(config: ModelConfig) -> Self {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self { http, config }
    }

    fn endpoint(&self) -> String {
        match &self.config.base_url {
            Some(base) => format!("{}/chat/completions", base.trim_end_matches('/')),
            None => OPENAI_API_URL.to_string(),
        }
    }

    async fn send(&self, request: &ChatRequest) -> Result<ChatResponse> {
        let mut req = self.http.post(self.endpoint()).json(request);
        if let Some(key) = &self.config.api_key {
            req = req.bearer_auth(key);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| TandemError::ModelInvocation(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(TandemError::ModelInvocation(format!(
                "HTTP {status}: {body}"
            )));
        }

        resp.json::<ChatResponse>()
            .await
            .map_err(|e| TandemError::ModelParse(e.to_string()))
    }
}

// Request types
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize, Debug, PartialEq)]
pub(crate) struct OaiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OaiToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiToolCall {
    id: String,
    r#type: String,
    function: OaiFunction,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub(crate) struct OaiFunction {
    name: String,
    /// JSON-encoded arguments, per the wire format.
    arguments: String,
}

#[derive(Serialize)]
struct OaiTool {
    r#type: String,
    function: OaiToolDef,
}

#[derive(Serialize)]
struct OaiToolDef {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize, Debug, Default)]
pub(crate) struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<OaiToolCall>>,
}

fn convert_tools(tools: &[ToolDefinition]) -> Vec<OaiTool> {
    tools
        .iter()
        .map(|t| OaiTool {
            r#type: "function".to_string(),
            function: OaiToolDef {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

/// Convert the flat turn log to wire messages.
///
/// Consecutive assistant turns (one optional text turn followed by tool-call
/// turns) collapse into a single assistant message carrying the tool_calls
/// array, matching how the provider emitted them.
pub(crate) fn convert_turns(turns: &[Turn]) -> Vec<OaiMessage> {
    let mut msgs: Vec<OaiMessage> = Vec::new();

    for turn in turns {
        match turn {
            Turn::User { text } => msgs.push(OaiMessage {
                role: "user".into(),
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            Turn::AssistantText { text } => msgs.push(OaiMessage {
                role: "assistant".into(),
                content: Some(text.clone()),
                tool_calls: None,
                tool_call_id: None,
            }),
            Turn::AssistantToolCall { call } => {
                let wire_call = OaiToolCall {
                    id: call.id.clone(),
                    r#type: "function".into(),
                    function: OaiFunction {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                };
                match msgs.last_mut() {
                    Some(last) if last.role == "assistant" && last.tool_call_id.is_none() => {
                        last.tool_calls.get_or_insert_with(Vec::new).push(wire_call);
                    }
                    _ => msgs.push(OaiMessage {
                        role: "assistant".into(),
                        content: None,
                        tool_calls: Some(vec![wire_call]),
                        tool_call_id: None,
                    }),
                }
            }
            Turn::ToolResult { call_id, outcome } => {
                let content = match outcome {
                    ToolOutcome::Success { payload } => payload.to_string(),
                    ToolOutcome::Failure { kind, message } => {
                        serde_json::json!({"error": kind, "message": message}).to_string()
                    }
                };
                msgs.push(OaiMessage {
                    role: "tool".into(),
                    content: Some(content),
                    tool_calls: None,
                    tool_call_id: Some(call_id.clone()),
                });
            }
        }
    }

    msgs
}

pub(crate) fn parse_choice(message: ChoiceMessage) -> ModelResponse {
    let tool_calls = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: serde_json::from_str(&tc.function.arguments)
                .unwrap_or(serde_json::Value::Null),
        })
        .collect();

    ModelResponse {
        text: message.content.filter(|t| !t.is_empty()),
        tool_calls,
    }
}

impl ModelClient for OpenAiClient {
    fn invoke(
        &self,
        turns: Vec<Turn>,
        tools: &[ToolDefinition],
    ) -> BoxFuture<'_, Result<ModelResponse>> {
        let tools = convert_tools(tools);
        Box::pin(async move {
            let request = ChatRequest {
                model: self.config.model_id.clone(),
                messages: convert_turns(&turns),
                max_tokens: self.config.max_tokens,
                temperature: Some(self.config.temperature),
                tools,
                response_format: None,
            };

            let response = self.send(&request).await?;
            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| TandemError::ModelParse("response had no choices".into()))?;

            debug!(model = %self.config.model_id, "model invocation complete");
            Ok(parse_choice(choice.message))
        })
    }

    fn invoke_structured(
        &self,
        turns: Vec<Turn>,
        schema_value: serde_json::Value,
    ) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            let request = ChatRequest {
                model: self.config.model_id.clone(),
                messages: convert_turns(&turns),
                max_tokens: self.config.max_tokens,
                temperature: Some(self.config.temperature),
                tools: vec![],
                response_format: Some(serde_json::json!({
                    "type": "json_schema",
                    "json_schema": {
                        "name": "structured_output",
                        "schema": schema_value,
                    }
                })),
            };

            let response = self.send(&request).await?;
            let content = response
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .ok_or_else(|| TandemError::ModelParse("structured response was empty".into()))?;

            let value: serde_json::Value = serde_json::from_str(&content)
                .map_err(|e| TandemError::ModelParse(format!("not valid JSON: {e}")))?;

            schema::validate(&schema_value, &value).map_err(TandemError::SchemaValidation)?;
            Ok(value)
        })
    }
}
