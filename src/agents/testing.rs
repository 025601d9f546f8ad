// Test doubles for the responder and search seams

use crate::agents::responder::Responder;
use crate::models::{History, Message, ToolCall};
use crate::search::{SearchError, SearchHit, SearchProvider};
use crate::types::{AppError, AppResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Emits numbered structured responses: "<label> answer 1", "<label> answer 2", ...
pub(crate) struct ScriptedResponder {
    label: &'static str,
    action: &'static str,
    calls: AtomicUsize,
    invocations: bool,
    invalid: bool,
}

impl ScriptedResponder {
    pub(crate) fn new(label: &'static str, action: &'static str) -> Self {
        Self {
            label,
            action,
            calls: AtomicUsize::new(0),
            invocations: true,
            invalid: false,
        }
    }

    /// Reply with plain text and no invocation requests
    pub(crate) fn without_invocations(mut self) -> Self {
        self.invocations = false;
        self
    }

    /// Reply with a payload missing its `reflection`
    pub(crate) fn with_invalid_payload(mut self) -> Self {
        self.invalid = true;
        self
    }
}

pub(crate) fn payload(label: &str, n: usize) -> Value {
    json!({
        "answer": format!("{label} answer {n}"),
        "reflection": { "missing": "evidence", "superfluous": "nothing" },
        "search_queries": [format!("{label} query {n}")],
        "references": [format!("[1] https://example.com/{label}/{n}")],
    })
}

#[async_trait]
impl Responder for ScriptedResponder {
    async fn respond(&self, _history: &History) -> AppResult<Message> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.invocations {
            return Ok(Message::assistant(Some(format!("{} note {n}", self.label)), vec![]));
        }

        let mut args = payload(self.label, n);
        if self.invalid {
            if let Some(obj) = args.as_object_mut() {
                obj.remove("reflection");
            }
        }

        Ok(Message::assistant(
            None,
            vec![ToolCall::new(format!("{}-{n}", self.label), self.action, args)],
        ))
    }
}

pub(crate) struct FailingResponder;

#[async_trait]
impl Responder for FailingResponder {
    async fn respond(&self, _history: &History) -> AppResult<Message> {
        Err(AppError::LLMApi("API error (503): upstream unavailable".to_string()))
    }
}

pub(crate) struct SlowResponder(pub Duration);

#[async_trait]
impl Responder for SlowResponder {
    async fn respond(&self, _history: &History) -> AppResult<Message> {
        tokio::time::sleep(self.0).await;
        Err(AppError::LLMApi("too slow".to_string()))
    }
}

/// Returns one hit that echoes the query
pub(crate) struct EchoSearch;

#[async_trait]
impl SearchProvider for EchoSearch {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, SearchError> {
        Ok(vec![SearchHit {
            title: query.to_string(),
            link: format!("https://example.com/search?q={}", query.replace(' ', "+")),
            snippet: format!("Result for {query}"),
        }])
    }
}

/// Seed, draft, then `rounds` pairs of (tool result, revision)
pub(crate) fn history_with_rounds(rounds: usize) -> History {
    let mut messages = vec![Message::assistant(
        None,
        vec![ToolCall::new("draft-1", "AnswerQuestion", payload("draft", 1))],
    )];
    let mut previous = ("draft-1".to_string(), "AnswerQuestion");

    for n in 1..=rounds {
        let id = format!("revise-{n}");
        messages.push(Message::tool(previous.0, previous.1, "[]"));
        messages.push(Message::assistant(
            None,
            vec![ToolCall::new(id.clone(), "ReviseAnswer", payload("revise", n))],
        ));
        previous = (id, "ReviseAnswer");
    }

    History::seeded("question")
        .extended(messages)
        .expect("rounds form a valid history")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rounds_label_results_with_the_answered_action() {
        let history = history_with_rounds(2);
        let results: Vec<(&str, &str)> = history
            .messages()
            .iter()
            .filter_map(|m| match m {
                Message::Tool {
                    tool_call_id, action, ..
                } => Some((tool_call_id.as_str(), action.as_str())),
                _ => None,
            })
            .collect();

        assert_eq!(
            results,
            vec![("draft-1", "AnswerQuestion"), ("revise-1", "ReviseAnswer")]
        );
        assert_eq!(history.assistant_count(), 3);
    }
}
