//! Answer Extraction
//!
//! The final answer is the most recent structured response with a non-empty
//! `answer`; earlier drafts stay in the History but are ignored.

use crate::models::{History, Message};
use crate::types::{AppError, AppResult};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalAnswer {
    pub answer: String,
    pub references: Vec<String>,
}

pub fn extract_answer(history: &History) -> AppResult<FinalAnswer> {
    history
        .messages()
        .iter()
        .rev()
        .filter_map(|message| match message {
            Message::Assistant { tool_calls, .. } => Some(tool_calls),
            _ => None,
        })
        .find_map(|tool_calls| {
            tool_calls.iter().find_map(|call| {
                let answer = call.args.get("answer")?.as_str()?;
                if answer.is_empty() {
                    return None;
                }
                let references: Vec<String> = call
                    .args
                    .get("references")
                    .and_then(|v| v.as_array())
                    .map(|refs| refs.iter().filter_map(|r| r.as_str()).map(String::from).collect())
                    .unwrap_or_default();
                Some(FinalAnswer {
                    answer: answer.to_string(),
                    references,
                })
            })
        })
        .ok_or_else(|| {
            AppError::NotFound(format!(
                "no structured answer in a history of {} messages",
                history.len()
            ))
        })
}
