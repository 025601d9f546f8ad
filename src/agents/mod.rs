//! Agent System
//!
//! The Reflexion loop that refines an answer through self-critique and search:
//!
//! - **Schema**: the structured response every model turn must produce
//! - **Responder**: drafting and revision model calls
//! - **Tools**: runs the search queries a structured response asks for
//! - **Graph**: sequences the steps and decides when to stop
//! - **Extract**: pulls the final answer out of the finished History
//!
//! ## Pipeline Overview
//!
//! ```text
//! User Message
//!      │
//!      ▼
//! ┌─────────────┐
//! │    Draft    │  → Answer + critique + search queries
//! └─────────────┘
//!      │
//!      ▼
//! ┌─────────────┐
//! │   Execute   │  → Runs the queries (in parallel)  ◄──┐
//! │    Tools    │                                       │
//! └─────────────┘                                       │
//!      │                                                │
//!      ▼                                                │
//! ┌─────────────┐                                       │
//! │   Revisor   │  → Revised answer + references ───────┘
//! └─────────────┘     (until the iteration budget is spent)
//!      │
//!      ▼
//!  Final Answer
//! ```

pub mod extract;
pub mod graph;
pub mod responder;
pub mod schema;
pub mod tools;

#[cfg(test)]
mod testing;

pub use extract::{extract_answer, FinalAnswer};
pub use graph::{transition, GraphOutcome, GraphTopology, LoopLimits, Node, ReflexionGraph};
pub use responder::{LlmResponder, Responder};
pub use schema::{Reflection, ResponseSchema, StructuredResponse};
pub use tools::{execute_tools, SearchQueriesTool, ToolHandler, ToolRegistry};

use crate::config::Config;
use crate::llm::provider::{LLMProviderConfig, LLM};
use crate::search::SerpApiClient;
use crate::types::{AppError, AppResult};
use std::sync::Arc;
use tracing::info;

/// Wire the configured LLM provider and search engine into a graph
pub fn build_graph(config: &Config) -> AppResult<ReflexionGraph> {
    let provider = LLMProviderConfig::from_config(&config.llm).ok_or_else(|| {
        AppError::Config(format!("no API key configured for provider {}", config.llm.provider))
    })?;
    let search = SerpApiClient::from_config(&config.search).map_err(|e| AppError::Config(e.to_string()))?;

    let llm = Arc::new(LLM::new(provider));
    let drafter = LlmResponder::drafter(llm.clone(), &config.llm.model)
        .with_sampling(config.llm.temperature, config.llm.max_tokens);
    let revisor = LlmResponder::revisor(llm, &config.llm.model)
        .with_sampling(config.llm.temperature, config.llm.max_tokens);

    let limits = LoopLimits::from_config(&config.agent);
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        max_iterations = limits.max_iterations,
        max_revisions = limits.max_revisions,
        "Building reflexion graph"
    );

    Ok(ReflexionGraph::new(
        Arc::new(drafter),
        Arc::new(revisor),
        ToolRegistry::with_search_tool(
            SearchQueriesTool::new(Arc::new(search)).with_concurrency(config.agent.tool_concurrency),
        ),
    )
    .with_limits(limits)
    .with_tool_concurrency(config.agent.tool_concurrency)
    .with_timeout(config.agent.run_timeout()))
}
