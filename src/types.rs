// Type definitions and enums

use crate::agents::graph::Node;
use crate::agents::schema::SchemaViolation;
use crate::search::SearchError;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum LLMProvider {
    OpenAI,
    Groq,
    OpenRouter,
}

impl LLMProvider {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "openai" => Some(LLMProvider::OpenAI),
            "groq" => Some(LLMProvider::Groq),
            "openrouter" => Some(LLMProvider::OpenRouter),
            _ => None,
        }
    }
}

impl std::fmt::Display for LLMProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LLMProvider::OpenAI => write!(f, "openai"),
            LLMProvider::Groq => write!(f, "groq"),
            LLMProvider::OpenRouter => write!(f, "openrouter"),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMRequest {
    pub model: String,
    pub messages: Vec<LLMMessage>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub system_instruction: Option<String>,
    /// Function tools offered to the model
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    /// Name of the function the model is forced to call
    pub tool_choice: Option<String>,
}

/// A function tool the model may call, described by a JSON schema
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A function call emitted by the model. `arguments` is the raw JSON string.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LLMToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMMessage {
    pub role: String, // "user", "assistant", "system", "tool"
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<LLMToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl LLMMessage {
    /// Create a new message with text content
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    /// Create a user message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// Create a system message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    /// Create an assistant message carrying function calls
    pub fn assistant_with_calls(content: Option<String>, tool_calls: Vec<LLMToolCall>) -> Self {
        Self {
            role: "assistant".to_string(),
            content,
            tool_calls,
            tool_call_id: None,
        }
    }

    /// Create a tool-result message answering `tool_call_id`
    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: "tool".to_string(),
            content: Some(content.into()),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct LLMResponse {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<LLMToolCall>,
    pub finish_reason: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{step} step produced an invalid structured response: field `{field}` {reason}")]
    SchemaValidation {
        step: Node,
        field: String,
        reason: String,
    },

    #[error("{step} step backend call failed: {message}")]
    Backend { step: Node, message: String },

    #[error("Unsupported tool action: {0}")]
    UnsupportedTool(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("LLM API error: {0}")]
    LLMApi(String),

    /// The provider answered with a non-success HTTP status
    #[error("LLM API error ({status}): {message}")]
    LLMStatus { status: u16, message: String },

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Invalid structured response: {0}")]
    Schema(#[from] SchemaViolation),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Run timed out after {0:?}")]
    Timeout(Duration),

    #[error("History invariant violated: {0}")]
    Invariant(String),
}

impl AppError {
    /// Attribute an error raised by a collaborator to the graph step that called it.
    pub fn in_step(self, step: Node) -> Self {
        match self {
            AppError::Schema(violation) => AppError::SchemaValidation {
                step,
                field: violation.field,
                reason: violation.reason,
            },
            AppError::LLMApi(message) => AppError::Backend { step, message },
            AppError::LLMStatus { status, message } => AppError::Backend {
                step,
                message: format!("API error ({status}): {message}"),
            },
            AppError::Search(e) => AppError::Backend {
                step,
                message: e.to_string(),
            },
            other => other,
        }
    }
}

impl AppError {
    /// Worth another attempt: transport failures, rate limits and server errors
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::LLMApi(_) => true,
            AppError::LLMStatus { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

pub type AppResult<T> = std::result::Result<T, AppError>;
