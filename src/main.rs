use anyhow::Context;
use clap::Parser;
use reflexion_agent::agents::{build_graph, extract_answer, GraphTopology};
use reflexion_agent::config::Config;
use reflexion_agent::models::History;
use reflexion_agent::utils::init_logger;
use tracing::info;

const DEFAULT_QUESTION: &str = "Write about how small business can leverage AI to grow";

/// Draft, critique, search and revise an answer to a question
#[derive(Debug, Parser)]
#[command(name = "reflexion", version, about)]
struct Cli {
    /// Question to answer
    question: Vec<String>,

    /// Tool-execution/revision cycles before stopping
    #[arg(short = 'n', long)]
    iterations: Option<usize>,

    /// Abandon the run after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Print the state machine as a Mermaid flowchart and exit
    #[arg(long)]
    graph: bool,

    /// Print the answer and references as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.graph {
        print!("{}", GraphTopology::reflexion().draw_mermaid());
        return Ok(());
    }

    let mut config = Config::from_env()?;
    if let Some(iterations) = cli.iterations {
        config.agent.max_iterations = iterations;
    }
    if cli.timeout_secs.is_some() {
        config.agent.run_timeout_secs = cli.timeout_secs;
    }
    config.validate()?;

    let _guard = init_logger(&config.log);

    let question = if cli.question.is_empty() {
        DEFAULT_QUESTION.to_string()
    } else {
        cli.question.join(" ")
    };

    let graph = build_graph(&config)?;
    info!(question = %question, "Starting reflexion run");

    let outcome = graph
        .invoke(History::seeded(question))
        .await
        .context("reflexion run failed")?;
    let answer = extract_answer(&outcome.history).context("run produced no answer")?;

    info!(
        messages = outcome.history.len(),
        skipped = outcome.skipped.len(),
        "Reflexion run finished"
    );

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&answer)?);
        return Ok(());
    }

    println!("\n=== Final Answer ===");
    println!("{}", answer.answer);
    if !answer.references.is_empty() {
        println!("\n=== References ===");
        for reference in &answer.references {
            println!("- {}", reference);
        }
    }

    Ok(())
}
