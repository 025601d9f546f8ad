//! Reflexion Sequencer
//!
//! A fixed cyclic state machine:
//!
//! ```text
//! __start__ → draft → execute_tools → revisor ─┬─→ __end__
//!                          ▲                   │
//!                          └───────────────────┘
//! ```
//!
//! The loop decision at `revisor` is a pure function of the History, so a
//! run can be replayed from its message log alone. Steps run strictly in
//! sequence; each receives the current History and returns an extended copy.

use crate::agents::extract::{extract_answer, FinalAnswer};
use crate::agents::responder::Responder;
use crate::agents::schema::{SchemaViolation, StructuredResponse};
use crate::agents::tools::{execute_tools, SkippedInvocation, ToolRegistry};
use crate::config::AgentConfig;
use crate::models::{History, Message};
use crate::types::{AppError, AppResult};
use serde::Serialize;
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Node {
    Start,
    Draft,
    ExecuteTools,
    Revisor,
    End,
}

impl Node {
    pub fn name(&self) -> &'static str {
        match self {
            Node::Start => "__start__",
            Node::Draft => "draft",
            Node::ExecuteTools => "execute_tools",
            Node::Revisor => "revisor",
            Node::End => "__end__",
        }
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Bounds on the draft/execute/revise cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopLimits {
    /// End once this many tool-result messages are in the History
    pub max_iterations: usize,
    /// End once this many revisions are in the History, even if tool results
    /// stopped accumulating. Must stay above `max_iterations` so the cap only
    /// fires once invocations have been skipped or left empty.
    pub max_revisions: usize,
}

impl LoopLimits {
    /// Revision cap defaults to twice the iteration budget
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            max_revisions: max_iterations.saturating_mul(2),
        }
    }

    pub fn with_max_revisions(mut self, max_revisions: usize) -> Self {
        self.max_revisions = max_revisions;
        self
    }

    pub fn from_config(config: &AgentConfig) -> Self {
        let limits = Self::new(config.max_iterations);
        match config.max_revisions {
            Some(max) => limits.with_max_revisions(max),
            None => limits,
        }
    }
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self::new(2)
    }
}

/// Revisions are every structured response after the draft
fn revision_count(history: &History) -> usize {
    history.assistant_count().saturating_sub(1)
}

/// Next node to visit. Pure: depends only on the current node and History.
pub fn transition(node: Node, history: &History, limits: &LoopLimits) -> Node {
    match node {
        Node::Start => Node::Draft,
        Node::Draft => Node::ExecuteTools,
        Node::ExecuteTools => Node::Revisor,
        Node::Revisor => {
            if history.tool_result_count() >= limits.max_iterations
                || revision_count(history) >= limits.max_revisions
            {
                Node::End
            } else {
                Node::ExecuteTools
            }
        }
        Node::End => Node::End,
    }
}

/// Result of one complete run
#[derive(Debug, Clone)]
pub struct GraphOutcome {
    pub history: History,
    /// Every node entered, `__start__` and `__end__` included
    pub visits: Vec<Node>,
    pub skipped: Vec<SkippedInvocation>,
}

impl GraphOutcome {
    pub fn visit_count(&self, node: Node) -> usize {
        self.visits.iter().filter(|visited| **visited == node).count()
    }
}

pub struct ReflexionGraph {
    drafter: Arc<dyn Responder>,
    revisor: Arc<dyn Responder>,
    tools: ToolRegistry,
    limits: LoopLimits,
    tool_concurrency: usize,
    timeout: Option<Duration>,
}

impl ReflexionGraph {
    pub fn new(drafter: Arc<dyn Responder>, revisor: Arc<dyn Responder>, tools: ToolRegistry) -> Self {
        Self {
            drafter,
            revisor,
            tools,
            limits: LoopLimits::default(),
            tool_concurrency: 4,
            timeout: None,
        }
    }

    pub fn with_limits(mut self, limits: LoopLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_tool_concurrency(mut self, concurrency: usize) -> Self {
        self.tool_concurrency = concurrency.max(1);
        self
    }

    /// Abandon the run if it has not reached `__end__` within `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the graph from a single user message and extract the final answer.
    pub async fn run(&self, seed: impl Into<String>) -> AppResult<FinalAnswer> {
        let outcome = self.invoke(History::seeded(seed)).await?;
        extract_answer(&outcome.history)
    }

    /// Run the graph to `__end__` and return the full History.
    pub async fn invoke(&self, seed: History) -> AppResult<GraphOutcome> {
        if seed.is_empty() {
            return Err(AppError::Invariant("a run needs at least the seed user message".to_string()));
        }
        if self.limits.max_iterations == 0 {
            return Err(AppError::Config("iteration budget must be at least 1".to_string()));
        }

        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.drive(seed))
                .await
                .map_err(|_| AppError::Timeout(limit))?,
            None => self.drive(seed).await,
        }
    }

    async fn drive(&self, mut history: History) -> AppResult<GraphOutcome> {
        let mut node = Node::Start;
        let mut visits = vec![Node::Start];
        let mut skipped = Vec::new();

        loop {
            node = transition(node, &history, &self.limits);
            visits.push(node);
            info!(
                node = %node,
                messages = history.len(),
                tool_results = history.tool_result_count(),
                "Entering node"
            );

            history = match node {
                Node::Draft => self.respond(Node::Draft, self.drafter.as_ref(), &history).await?,
                Node::Revisor => self.respond(Node::Revisor, self.revisor.as_ref(), &history).await?,
                Node::ExecuteTools => {
                    let outcome = execute_tools(&history, &self.tools, self.tool_concurrency)
                        .await
                        .map_err(|e| e.in_step(Node::ExecuteTools))?;
                    skipped.extend(outcome.skipped);
                    outcome.history
                }
                Node::End => break,
                Node::Start => {
                    return Err(AppError::Invariant("transition re-entered __start__".to_string()))
                }
            };
        }

        info!(
            messages = history.len(),
            tool_results = history.tool_result_count(),
            revisions = revision_count(&history),
            skipped = skipped.len(),
            "Reflexion run complete"
        );

        Ok(GraphOutcome {
            history,
            visits,
            skipped,
        })
    }

    async fn respond(&self, step: Node, responder: &dyn Responder, history: &History) -> AppResult<History> {
        let message = responder.respond(history).await.map_err(|e| {
            warn!(step = %step, error = %e, "Responder failed");
            e.in_step(step)
        })?;

        validate_structured(step, &message).map_err(|violation| {
            warn!(step = %step, field = %violation.field, "Structured response rejected");
            AppError::from(violation).in_step(step)
        })?;

        history.extended(vec![message])
    }
}

/// Drafting and revision steps must append an assistant message whose
/// invocation payloads all conform. A draft needs at least one invocation; a
/// revision may carry none, leaving nothing for the next tool step to run.
fn validate_structured(step: Node, message: &Message) -> Result<(), SchemaViolation> {
    match message {
        Message::Assistant { tool_calls, .. } => {
            if tool_calls.is_empty() && step == Node::Draft {
                return Err(SchemaViolation::missing("tool_calls"));
            }
            for call in tool_calls {
                StructuredResponse::from_args(&call.args)?;
            }
            Ok(())
        }
        _ => Err(SchemaViolation::new("role", "must be an assistant response")),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphEdge {
    pub from: Node,
    pub to: Node,
    /// Taken only when the loop predicate selects it
    pub conditional: bool,
}

/// Read-only view of the state machine for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphTopology {
    pub nodes: Vec<Node>,
    pub edges: Vec<GraphEdge>,
}

impl GraphTopology {
    pub fn reflexion() -> Self {
        let edge = |from, to, conditional| GraphEdge { from, to, conditional };
        Self {
            nodes: vec![Node::Start, Node::Draft, Node::ExecuteTools, Node::Revisor, Node::End],
            edges: vec![
                edge(Node::Start, Node::Draft, false),
                edge(Node::Draft, Node::ExecuteTools, false),
                edge(Node::ExecuteTools, Node::Revisor, false),
                edge(Node::Revisor, Node::ExecuteTools, true),
                edge(Node::Revisor, Node::End, true),
            ],
        }
    }

    /// Render as a Mermaid flowchart
    pub fn draw_mermaid(&self) -> String {
        let mut out = String::from("graph TD;\n");
        for node in &self.nodes {
            let _ = match node {
                Node::Start => writeln!(out, "\t{0}([<p>{0}</p>]):::first", node),
                Node::End => writeln!(out, "\t{0}([<p>{0}</p>]):::last", node),
                _ => writeln!(out, "\t{0}({0})", node),
            };
        }
        for edge in &self.edges {
            let arrow = if edge.conditional { "-.->" } else { "-->" };
            let _ = writeln!(out, "\t{} {} {};", edge.from, arrow, edge.to);
        }
        out.push_str("\tclassDef default fill:#f2f0ff,line-height:1.2\n");
        out.push_str("\tclassDef first fill-opacity:0\n");
        out.push_str("\tclassDef last fill:#bfb6fc\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{EchoSearch, FailingResponder, ScriptedResponder, SlowResponder};

    const SEED: &str = "Write about how small business can leverage AI to grow";

    fn graph(drafter: ScriptedResponder, revisor: ScriptedResponder, budget: usize) -> ReflexionGraph {
        ReflexionGraph::new(
            Arc::new(drafter),
            Arc::new(revisor),
            ToolRegistry::with_search(Arc::new(EchoSearch)),
        )
        .with_limits(LoopLimits::new(budget))
    }

    fn default_graph(budget: usize) -> ReflexionGraph {
        graph(
            ScriptedResponder::new("draft", "AnswerQuestion"),
            ScriptedResponder::new("revise", "ReviseAnswer"),
            budget,
        )
    }

    #[tokio::test]
    async fn test_end_to_end_small_business_scenario() {
        let graph = default_graph(2);
        let outcome = graph.invoke(History::seeded(SEED)).await.unwrap();

        assert_eq!(outcome.history.tool_result_count(), 2);
        assert_eq!(outcome.history.assistant_count(), 3);
        assert_eq!(
            outcome.visits,
            vec![
                Node::Start,
                Node::Draft,
                Node::ExecuteTools,
                Node::Revisor,
                Node::ExecuteTools,
                Node::Revisor,
                Node::End,
            ]
        );

        let third_assistant = outcome
            .history
            .messages()
            .iter()
            .filter(|m| m.is_assistant())
            .nth(2)
            .unwrap();
        let expected = third_assistant.tool_calls()[0].structured().unwrap();

        let answer = extract_answer(&outcome.history).unwrap();
        assert_eq!(answer.answer, expected.answer);
        assert_eq!(answer.answer, "revise answer 2");
        assert_eq!(answer.references, expected.references);

        let via_run = default_graph(2).run(SEED).await.unwrap();
        assert_eq!(via_run.answer, "revise answer 2");
    }

    #[tokio::test]
    async fn test_tool_results_match_budget() {
        for budget in 1..=4 {
            let outcome = default_graph(budget).invoke(History::seeded(SEED)).await.unwrap();
            assert_eq!(outcome.history.tool_result_count(), budget);
            assert_eq!(outcome.visit_count(Node::ExecuteTools), budget);
            assert_eq!(outcome.visit_count(Node::Revisor), budget);
            assert_eq!(outcome.visit_count(Node::Draft), 1);
            assert_eq!(outcome.visits.last(), Some(&Node::End));
        }
    }

    #[tokio::test]
    async fn test_revisions_without_invocations_still_terminate() {
        let graph = graph(
            ScriptedResponder::new("draft", "AnswerQuestion"),
            ScriptedResponder::new("revise", "ReviseAnswer").without_invocations(),
            2,
        );
        let outcome = graph.invoke(History::seeded(SEED)).await.unwrap();

        assert_eq!(outcome.history.tool_result_count(), 1);
        assert_eq!(outcome.visit_count(Node::ExecuteTools), 4);
        assert_eq!(outcome.visit_count(Node::Revisor), 4);
        assert_eq!(outcome.history.assistant_count(), 5);
        assert_eq!(outcome.visits.last(), Some(&Node::End));

        // revisions carried no payload, so the draft is the latest answer
        let answer = extract_answer(&outcome.history).unwrap();
        assert_eq!(answer.answer, "draft answer 1");
    }

    #[tokio::test]
    async fn test_draft_without_invocations_is_rejected() {
        let graph = graph(
            ScriptedResponder::new("draft", "AnswerQuestion").without_invocations(),
            ScriptedResponder::new("revise", "ReviseAnswer"),
            2,
        );
        let err = graph.run(SEED).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::SchemaValidation { step: Node::Draft, ref field, .. } if field == "tool_calls"
        ));
    }

    #[tokio::test]
    async fn test_revision_cap_ends_loop_when_tools_are_skipped() {
        // every invocation names an unknown action, so tool results never accumulate
        let graph = graph(
            ScriptedResponder::new("draft", "Browse"),
            ScriptedResponder::new("revise", "Browse"),
            2,
        );
        let outcome = graph.invoke(History::seeded(SEED)).await.unwrap();

        assert_eq!(outcome.history.tool_result_count(), 0);
        assert_eq!(outcome.visit_count(Node::Revisor), 4);
        // the last revision's invocation is never executed
        assert_eq!(outcome.skipped.len(), 4);
        assert_eq!(outcome.skipped[0].action, "Browse");
        assert_eq!(outcome.visits.last(), Some(&Node::End));
    }

    #[tokio::test]
    async fn test_skipped_draft_invocation_still_reaches_budget() {
        let graph = graph(
            ScriptedResponder::new("draft", "Browse"),
            ScriptedResponder::new("revise", "ReviseAnswer"),
            2,
        );
        let outcome = graph.invoke(History::seeded(SEED)).await.unwrap();

        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].tool_call_id, "draft-1");
        assert_eq!(outcome.history.tool_result_count(), 2);
        assert_eq!(outcome.visit_count(Node::Revisor), 3);
        assert_eq!(outcome.visits.last(), Some(&Node::End));

        let answer = extract_answer(&outcome.history).unwrap();
        assert_eq!(answer.answer, "revise answer 3");
    }

    #[tokio::test]
    async fn test_invalid_draft_aborts_with_field() {
        let graph = graph(
            ScriptedResponder::new("draft", "AnswerQuestion").with_invalid_payload(),
            ScriptedResponder::new("revise", "ReviseAnswer"),
            2,
        );
        let err = graph.run(SEED).await.unwrap_err();

        match err {
            AppError::SchemaValidation { step, field, .. } => {
                assert_eq!(step, Node::Draft);
                assert_eq!(field, "reflection");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backend_failure_names_step() {
        let graph = ReflexionGraph::new(
            Arc::new(ScriptedResponder::new("draft", "AnswerQuestion")),
            Arc::new(FailingResponder),
            ToolRegistry::with_search(Arc::new(EchoSearch)),
        );
        let err = graph.run(SEED).await.unwrap_err();

        assert!(matches!(err, AppError::Backend { step: Node::Revisor, .. }));
        assert!(err.to_string().contains("revisor"));
    }

    #[tokio::test]
    async fn test_timeout_abandons_run() {
        let graph = ReflexionGraph::new(
            Arc::new(SlowResponder(Duration::from_secs(5))),
            Arc::new(SlowResponder(Duration::from_secs(5))),
            ToolRegistry::new(),
        )
        .with_timeout(Some(Duration::from_millis(20)));

        let err = graph.run(SEED).await.unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_empty_seed_is_rejected() {
        let err = default_graph(2).invoke(History::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Invariant(_)));
    }

    #[test]
    fn test_transition_is_pure_over_history() {
        let limits = LoopLimits::new(2);
        let seed = History::seeded(SEED);
        assert_eq!(transition(Node::Start, &seed, &limits), Node::Draft);
        assert_eq!(transition(Node::Draft, &seed, &limits), Node::ExecuteTools);
        assert_eq!(transition(Node::ExecuteTools, &seed, &limits), Node::Revisor);
        assert_eq!(transition(Node::End, &seed, &limits), Node::End);

        let one_round = crate::agents::testing::history_with_rounds(1);
        assert_eq!(transition(Node::Revisor, &one_round, &limits), Node::ExecuteTools);

        let two_rounds = crate::agents::testing::history_with_rounds(2);
        assert_eq!(transition(Node::Revisor, &two_rounds, &limits), Node::End);
        assert_eq!(
            transition(Node::Revisor, &one_round, &limits.with_max_revisions(1)),
            Node::End
        );
    }

    #[test]
    fn test_revision_cap_waits_while_budget_is_reachable() {
        let limits = LoopLimits::new(2);
        assert_eq!(limits.max_revisions, 4);

        // one tool result, two revisions: the budget is still reachable
        let lagging = crate::agents::testing::history_with_rounds(1)
            .extended(vec![Message::assistant(
                None,
                vec![crate::models::ToolCall::new(
                    "revise-extra",
                    "ReviseAnswer",
                    crate::agents::testing::payload("revise", 9),
                )],
            )])
            .unwrap();
        assert_eq!(lagging.tool_result_count(), 1);
        assert_eq!(revision_count(&lagging), 2);
        assert_eq!(transition(Node::Revisor, &lagging, &limits), Node::ExecuteTools);
    }

    #[test]
    fn test_limits_from_config() {
        let mut config = AgentConfig::default();
        assert_eq!(LoopLimits::from_config(&config), LoopLimits::new(2));
        assert_eq!(LoopLimits::from_config(&config).max_revisions, 4);
        config.max_iterations = 3;
        config.max_revisions = Some(5);
        let limits = LoopLimits::from_config(&config);
        assert_eq!(limits.max_iterations, 3);
        assert_eq!(limits.max_revisions, 5);
    }

    #[test]
    fn test_topology_and_mermaid() {
        let topology = GraphTopology::reflexion();
        assert_eq!(topology.nodes.len(), 5);
        assert_eq!(topology.edges.iter().filter(|e| e.conditional).count(), 2);

        let mermaid = topology.draw_mermaid();
        assert!(mermaid.starts_with("graph TD;"));
        assert!(mermaid.contains("__start__ --> draft;"));
        assert!(mermaid.contains("revisor -.-> execute_tools;"));
        assert!(mermaid.contains("revisor -.-> __end__;"));
    }
}
