//! Structured Output Contract
//!
//! The model never answers in free text. It calls one of two functions whose
//! arguments carry the answer, a self-critique, follow-up search queries and
//! (on revision) references:
//!
//! - `AnswerQuestion`: emitted by the drafting step
//! - `ReviseAnswer`: emitted by every revision step
//!
//! Both decode into [`StructuredResponse`].

use crate::types::ToolDefinition;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// A payload field that does not conform to the contract
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("field `{field}` {reason}")]
pub struct SchemaViolation {
    pub field: String,
    pub reason: String,
}

impl SchemaViolation {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "is missing")
    }

    fn wrong_type(field: impl Into<String>, expected: &str) -> Self {
        Self::new(field, format!("must be {expected}"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    /// Critique of what is missing from the answer
    pub missing: String,
    /// Critique of what is superfluous in the answer
    pub superfluous: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredResponse {
    pub answer: String,
    pub reflection: Reflection,
    #[serde(default)]
    pub search_queries: Vec<String>,
    #[serde(default)]
    pub references: Vec<String>,
}

impl StructuredResponse {
    /// Validate raw function-call arguments against the contract.
    ///
    /// `references` may be absent (drafts never carry it); every other field
    /// must be present with the right type.
    pub fn from_args(args: &Value) -> Result<Self, SchemaViolation> {
        let obj = args
            .as_object()
            .ok_or_else(|| SchemaViolation::wrong_type("arguments", "an object"))?;

        let answer = required_str(obj, "answer", "answer")?;

        let reflection_obj = obj
            .get("reflection")
            .ok_or_else(|| SchemaViolation::missing("reflection"))?
            .as_object()
            .ok_or_else(|| SchemaViolation::wrong_type("reflection", "an object"))?;
        let reflection = Reflection {
            missing: required_str(reflection_obj, "missing", "reflection.missing")?,
            superfluous: required_str(reflection_obj, "superfluous", "reflection.superfluous")?,
        };

        let search_queries = match obj.get("search_queries") {
            Some(value) => string_list(value, "search_queries")?,
            None => return Err(SchemaViolation::missing("search_queries")),
        };

        let references = match obj.get("references") {
            Some(Value::Null) | None => Vec::new(),
            Some(value) => string_list(value, "references")?,
        };

        Ok(Self {
            answer,
            reflection,
            search_queries,
            references,
        })
    }

    /// Validate a raw JSON arguments string as emitted by a chat API.
    pub fn from_arguments_str(arguments: &str) -> Result<Self, SchemaViolation> {
        let value: Value = serde_json::from_str(arguments)
            .map_err(|e| SchemaViolation::new("arguments", format!("is not valid JSON: {e}")))?;
        Self::from_args(&value)
    }

    pub fn to_args(&self) -> Value {
        json!({
            "answer": self.answer,
            "reflection": {
                "missing": self.reflection.missing,
                "superfluous": self.reflection.superfluous,
            },
            "search_queries": self.search_queries,
            "references": self.references,
        })
    }
}

fn required_str(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String, SchemaViolation> {
    match obj.get(key) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(SchemaViolation::wrong_type(path, "a string")),
        None => Err(SchemaViolation::missing(path)),
    }
}

pub(crate) fn string_list(value: &Value, path: &str) -> Result<Vec<String>, SchemaViolation> {
    let items = value
        .as_array()
        .ok_or_else(|| SchemaViolation::wrong_type(path, "an array of strings"))?;
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            item.as_str()
                .map(String::from)
                .ok_or_else(|| SchemaViolation::wrong_type(format!("{path}[{i}]"), "a string"))
        })
        .collect()
}

/// The function a responder forces the model to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSchema {
    AnswerQuestion,
    ReviseAnswer,
}

impl ResponseSchema {
    pub const ALL: [ResponseSchema; 2] = [ResponseSchema::AnswerQuestion, ResponseSchema::ReviseAnswer];

    pub fn name(&self) -> &'static str {
        match self {
            ResponseSchema::AnswerQuestion => "AnswerQuestion",
            ResponseSchema::ReviseAnswer => "ReviseAnswer",
        }
    }

    pub fn from_action(action: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|schema| schema.name() == action)
    }

    fn description(&self) -> &'static str {
        match self {
            ResponseSchema::AnswerQuestion => "Answer the question.",
            ResponseSchema::ReviseAnswer => "Revise your original answer to your question.",
        }
    }

    /// JSON schema of the function parameters
    pub fn parameters(&self) -> Value {
        let mut properties = json!({
            "answer": {
                "type": "string",
                "description": "~250 word detailed answer to the question."
            },
            "reflection": {
                "type": "object",
                "description": "Your reflection on the initial answer.",
                "properties": {
                    "missing": {
                        "type": "string",
                        "description": "Critique of what is missing."
                    },
                    "superfluous": {
                        "type": "string",
                        "description": "Critique of what is superfluous."
                    }
                },
                "required": ["missing", "superfluous"]
            },
            "search_queries": {
                "type": "array",
                "items": { "type": "string" },
                "description": "1-3 search queries for researching improvements to address the critique of your current answer."
            }
        });
        let mut required = vec!["answer", "reflection", "search_queries"];

        if *self == ResponseSchema::ReviseAnswer {
            properties["references"] = json!({
                "type": "array",
                "items": { "type": "string" },
                "description": "Citations motivating your updated answer."
            });
            required.push("references");
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

impl std::fmt::Display for ResponseSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
