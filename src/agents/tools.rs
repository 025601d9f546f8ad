//! Tool Execution
//!
//! Resolves the invocation requests on the most recent assistant message
//! through a [`ToolRegistry`] and appends one tool-result message per resolved
//! request, in request order. Requests are independent, so they are dispatched
//! concurrently and reassembled afterwards.

use crate::agents::schema::{string_list, ResponseSchema, SchemaViolation};
use crate::models::{History, Message, ToolCall};
use crate::search::SearchProvider;
use crate::types::{AppError, AppResult};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn invoke(&self, args: &Value) -> AppResult<String>;
}

/// Lookup table from action name to handler
#[derive(Clone, Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry that answers both structured-response actions by running
    /// their search queries.
    pub fn with_search(provider: Arc<dyn SearchProvider>) -> Self {
        Self::with_search_tool(SearchQueriesTool::new(provider))
    }

    pub fn with_search_tool(tool: SearchQueriesTool) -> Self {
        let tool: Arc<dyn ToolHandler> = Arc::new(tool);
        ResponseSchema::ALL
            .into_iter()
            .fold(Self::new(), |registry, schema| registry.register(schema.name(), tool.clone()))
    }

    pub fn register(mut self, action: impl Into<String>, handler: Arc<dyn ToolHandler>) -> Self {
        self.handlers.insert(action.into(), handler);
        self
    }

    pub fn supports(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }

    pub fn actions(&self) -> Vec<&str> {
        let mut actions: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        actions.sort_unstable();
        actions
    }

    pub async fn invoke(&self, action: &str, args: &Value) -> AppResult<String> {
        let handler = self
            .handlers
            .get(action)
            .ok_or_else(|| AppError::UnsupportedTool(action.to_string()))?;
        handler.invoke(args).await
    }
}

/// Runs every entry of a payload's `search_queries` through a search provider.
///
/// The result is a JSON array in query order. A failing query is reported in
/// place rather than failing the whole invocation. At most `concurrency`
/// queries are in flight at once.
pub struct SearchQueriesTool {
    provider: Arc<dyn SearchProvider>,
    concurrency: usize,
}

impl SearchQueriesTool {
    pub fn new(provider: Arc<dyn SearchProvider>) -> Self {
        Self {
            provider,
            concurrency: 4,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[async_trait]
impl ToolHandler for SearchQueriesTool {
    async fn invoke(&self, args: &Value) -> AppResult<String> {
        let queries = match args.get("search_queries") {
            Some(value) => string_list(value, "search_queries")?,
            None => return Err(SchemaViolation::missing("search_queries").into()),
        };

        let provider = &self.provider;
        let entries: Vec<Value> = stream::iter(queries)
            .map(|query| async move {
                match provider.search(&query).await {
                    Ok(hits) => json!({ "query": query, "results": hits }),
                    Err(e) => {
                        warn!(query = %query, error = %e, "Search query failed");
                        json!({ "query": query, "error": e.to_string() })
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        Ok(Value::Array(entries).to_string())
    }
}

/// An invocation request that was not executed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SkippedInvocation {
    pub tool_call_id: String,
    pub action: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ToolStepOutcome {
    pub history: History,
    pub skipped: Vec<SkippedInvocation>,
}

/// Execute the invocation requests on the most recent assistant message.
///
/// With no requests the returned history equals the input. Unsupported
/// actions are skipped and reported; any other tool failure is returned.
pub async fn execute_tools(
    history: &History,
    registry: &ToolRegistry,
    concurrency: usize,
) -> AppResult<ToolStepOutcome> {
    let calls: Vec<ToolCall> = history
        .last_assistant()
        .map(|message| message.tool_calls().to_vec())
        .unwrap_or_default();

    if calls.is_empty() {
        info!("No invocation requests on the latest assistant message");
        return Ok(ToolStepOutcome {
            history: history.clone(),
            skipped: Vec::new(),
        });
    }

    info!(count = calls.len(), "Executing invocation requests");

    // `buffered` yields results in input order regardless of completion order
    let results: Vec<(ToolCall, AppResult<String>)> = stream::iter(calls)
        .map(|call| async move {
            let result = registry.invoke(&call.action, &call.args).await;
            (call, result)
        })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut messages = Vec::with_capacity(results.len());
    let mut skipped = Vec::new();

    for (call, result) in results {
        match result {
            Ok(content) => messages.push(Message::tool(call.id, call.action, content)),
            Err(AppError::UnsupportedTool(action)) => {
                warn!(tool_call_id = %call.id, action = %action, "Skipping unsupported tool action");
                skipped.push(SkippedInvocation {
                    tool_call_id: call.id,
                    action,
                    reason: "unsupported action".to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    Ok(ToolStepOutcome {
        history: history.extended(messages)?,
        skipped,
    })
}
