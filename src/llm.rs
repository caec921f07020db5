use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A chat-completion request against the bound project token. The worker
/// builds one per attempt; `schema` (when set) asks the provider for a
/// strict JSON response shape — replies are re-validated locally either way.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub api_key: String,
    pub messages: Vec<ChatMessage>,
    pub schema: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        ChatMessage {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum LlmError {
    /// Network failure or exceeded deadline.
    Transport(String),
    /// Non-success HTTP status from the provider.
    Api(u16, String),
    /// Success status but no usable completion in the body.
    EmptyResponse,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::Transport(e) => write!(f, "transport error: {e}"),
            LlmError::Api(status, body) => write!(f, "API error ({status}): {body}"),
            LlmError::EmptyResponse => write!(f, "empty response from provider"),
        }
    }
}

/// Abstraction over the chat-completion endpoint so the turn engine can be
/// driven by a scripted fake in tests.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the raw content string of the first completion choice.
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError>;

    fn name(&self) -> &str;
}

// --- OpenAI-compatible implementation ---

pub struct OpenAiCompatible {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
}

#[derive(Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Deserialize)]
struct ApiResponseMessage {
    content: Option<String>,
}

impl OpenAiCompatible {
    pub fn new(base_url: String, timeout_secs: u64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        OpenAiCompatible { base_url, client }
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatible {
    async fn chat(&self, request: &ChatRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let response_format = request.schema.clone().map(|schema| {
            serde_json::json!({
                "type": "json_schema",
                "json_schema": {
                    "name": "agent_reply",
                    "strict": true,
                    "schema": schema,
                },
            })
        });
        let body = ApiRequest {
            model: &request.model,
            messages: &request.messages,
            response_format,
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", request.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(status.as_u16(), detail));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Transport(e.to_string()))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse)
    }

    fn name(&self) -> &str {
        "OpenAI-Compatible"
    }
}

/// JSON schema every turn reply must satisfy. `thinking` is tolerated for
/// debugging and otherwise ignored.
pub fn reply_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "properties": {
            "recipient_id": { "type": "integer" },
            "body": { "type": "string" },
            "thinking": { "type": "string" },
        },
        "required": ["recipient_id", "body"],
        "additionalProperties": false,
    })
}

/// Parsed shape of a structured agent reply.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentReply {
    pub recipient_id: i64,
    pub body: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub thinking: Option<String>,
}
