// Conversation models for a single Reflexion run

use crate::agents::schema::StructuredResponse;
use crate::types::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A model-emitted request to call an action, correlated by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub action: String,
    pub args: serde_json::Value,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, action: impl Into<String>, args: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            action: action.into(),
            args,
        }
    }

    /// Decode the arguments as a structured response, if they conform.
    pub fn structured(&self) -> Option<StructuredResponse> {
        StructuredResponse::from_args(&self.args).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        tool_call_id: String,
        action: String,
        content: String,
    },
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: Option<String>, tool_calls: Vec<ToolCall>) -> Self {
        Message::Assistant { content, tool_calls }
    }

    pub fn tool(
        tool_call_id: impl Into<String>,
        action: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::Tool {
            tool_call_id: tool_call_id.into(),
            action: action.into(),
            content: content.into(),
        }
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self, Message::Assistant { .. })
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, Message::Tool { .. })
    }

    /// Invocation requests carried by this message (empty for non-assistant roles)
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Message::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }
}

/// Ordered, append-only log of one run.
///
/// There is no way to mutate an existing entry: every extension returns a new
/// `History` and leaves the receiver untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    /// Start a run from a single user message.
    pub fn seeded(content: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(content)],
        }
    }

    /// Return a copy of this history with `new_messages` appended.
    ///
    /// Every tool-result message must answer exactly one invocation request
    /// that appears before it; invocation ids must be unique.
    pub fn extended(&self, new_messages: impl IntoIterator<Item = Message>) -> AppResult<Self> {
        let mut messages = self.messages.clone();
        let mut requested: HashSet<String> = self
            .messages
            .iter()
            .flat_map(|m| m.tool_calls().iter().map(|c| c.id.clone()))
            .collect();
        let mut answered: HashSet<String> = self
            .messages
            .iter()
            .filter_map(|m| match m {
                Message::Tool { tool_call_id, .. } => Some(tool_call_id.clone()),
                _ => None,
            })
            .collect();

        for message in new_messages {
            match &message {
                Message::Assistant { tool_calls, .. } => {
                    for call in tool_calls {
                        if !requested.insert(call.id.clone()) {
                            return Err(AppError::Invariant(format!(
                                "duplicate invocation id `{}`",
                                call.id
                            )));
                        }
                    }
                }
                Message::Tool { tool_call_id, .. } => {
                    if !requested.contains(tool_call_id) {
                        return Err(AppError::Invariant(format!(
                            "tool result `{tool_call_id}` answers no prior invocation"
                        )));
                    }
                    if !answered.insert(tool_call_id.clone()) {
                        return Err(AppError::Invariant(format!(
                            "invocation `{tool_call_id}` answered twice"
                        )));
                    }
                }
                Message::User { .. } => {}
            }
            messages.push(message);
        }

        Ok(Self { messages })
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn tool_result_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_tool_result()).count()
    }

    pub fn assistant_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_assistant()).count()
    }

    pub fn last_assistant(&self) -> Option<&Message> {
        self.messages.iter().rev().find(|m| m.is_assistant())
    }
}
