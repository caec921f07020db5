use serde::{Deserialize, Serialize};

// Canonical wire form is camelCase; request decoders also accept the
// snake_case spellings via aliases so older clients keep working.

// --- Enumerations ---

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    User,
    Assistant,
    System,
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::User => "user",
            MessageType::Assistant => "assistant",
            MessageType::System => "system",
            MessageType::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(MessageType::User),
            "assistant" => Some(MessageType::Assistant),
            "system" => Some(MessageType::System),
            "error" => Some(MessageType::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Pending => "pending",
            MessageStatus::Sent => "sent",
            MessageStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(MessageStatus::Pending),
            "sent" => Some(MessageStatus::Sent),
            "failed" => Some(MessageStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(LogLevel::Info),
            "warn" => Some(LogLevel::Warn),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

// --- Entities ---

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: String,
}

/// Token as returned to clients — never carries the secret.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: i64,
    pub name: String,
    pub active: bool,
    /// True iff at least one project references this token.
    pub in_use: bool,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Agent {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    pub name: String,
    pub role: String,
    pub description: String,
    pub model: String,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub system_prompt: String,
    pub paused: bool,
    pub message_limit: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<i64>,
    pub created_at: String,
    pub last_activity_at: String,
}

/// A project member: the agent definition merged with its per-project
/// role/prompt overrides and resolved allowed-recipient set.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMember {
    pub agent_id: i64,
    pub name: String,
    pub role: String,
    pub description: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    pub can_message_ids: Vec<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDetail {
    #[serde(flatten)]
    pub project: Project,
    pub token_active: bool,
    pub members: Vec<ProjectMember>,
    pub conversations: Vec<Conversation>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: i64,
    pub project_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: i64,
    pub conversation_id: i64,
    pub project_id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub status: MessageStatus,
    pub created_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub project_id: i64,
    pub agent_id: i64,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<String>,
    pub message_count: i64,
    pub summary_count: i64,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    pub id: i64,
    pub project_id: i64,
    pub level: LogLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub message: String,
    pub created_at: String,
}

/// Cheap per-iteration worker check: pause state, remaining budget, and
/// whether an active token is bound.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(rename_all = "camelCase")]
pub struct ProjectFlags {
    pub paused: bool,
    pub budget: i64,
    pub token_active: bool,
}

// --- Request payloads, user-facing ---

#[derive(Debug, Deserialize)]
pub struct Register {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct Login {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateAgent {
    pub name: String,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateToken {
    pub name: String,
    #[serde(alias = "api_key")]
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProject {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "system_prompt")]
    pub system_prompt: String,
    #[serde(default, alias = "token_id")]
    pub token_id: Option<i64>,
    #[serde(default)]
    pub agents: Vec<ProjectAgentSpec>,
}

/// One entry of a project's agent list: either a reference to an existing
/// agent (`id`) or an inline definition (`name` + friends). Either form
/// may carry per-project overrides.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAgentSpec {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default, alias = "can_message_ids")]
    pub can_message_ids: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
pub struct SetPaused {
    pub paused: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetToken {
    #[serde(default, alias = "token_id")]
    pub token_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SetLimit {
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversation {
    #[serde(alias = "receiver_id")]
    pub receiver_id: i64,
    // Conversation titles are a derived presentation concern; accepted for
    // wire compatibility, never stored.
    #[serde(default)]
    #[allow(dead_code)]
    pub title: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessage {
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: Option<MessageType>,
}

// --- Request payloads, internal surface ---

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateAgentMessage {
    #[serde(alias = "project_id")]
    pub project_id: i64,
    #[serde(alias = "sender_id")]
    pub sender_id: i64,
    #[serde(alias = "receiver_id")]
    pub receiver_id: i64,
    pub content: String,
    #[serde(default, rename = "type")]
    pub kind: Option<MessageType>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMessageStatus {
    pub status: MessageStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLog {
    #[serde(alias = "project_id")]
    pub project_id: i64,
    pub level: LogLevel,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct UpsertSummary {
    pub summary: String,
    #[serde(default)]
    pub snapshot: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PauseProject {
    pub code: String,
    pub message: String,
}
