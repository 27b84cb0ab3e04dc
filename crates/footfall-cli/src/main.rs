//! Footfall CLI - ask questions about retail visitor metrics

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use footfall_core::aggregate::{Aggregator, Rollups};
use footfall_core::answer::{GraphRagAgent, PreparedQuery};
use footfall_core::config::Config;
use footfall_core::facts::FactTable;
use footfall_core::graph::{GraphBuilder, KnowledgeGraph};
use footfall_core::llm::LlmClient;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use serde_json::json;
use tracing::{error, info};


#[derive(Parser)]
#[command(name = "footfall")]
#[command(author, version, about = "Ask questions about retail visitor metrics", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Fact file (CSV or JSON Lines), overrides data.path
    #[arg(long, global = true)]
    data: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, Debug, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive question session
    Chat,

    /// Answer a single question
    Ask {
        /// The question
        question: String,
    },

    /// Show the retrieved context for a question without calling the model
    Inspect {
        /// The question
        question: String,
    },

    /// Print the standing rollup context
    Context,

    /// Show fact, graph and rollup statistics
    Stats,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Reset to defaults
    Reset,
    /// Print the config file path
    Path,
}

/// Everything built once from the fact file and shared read-only afterwards
struct Workspace {
    config: Config,
    data_path: PathBuf,
    rows_loaded: usize,
    rows_rejected: usize,
    rows_overwritten: usize,
    graph: Arc<KnowledgeGraph>,
    rollups: Arc<Rollups>,
}

impl Workspace {
    fn load(config: Config, data: Option<&Path>) -> anyhow::Result<Self> {
        let data_path = data
            .map(Path::to_path_buf)
            .or_else(|| config.data.path.clone())
            .ok_or_else(|| {
                anyhow!(
                    "No fact file configured. Pass --data <PATH> or run `footfall config set data.path <PATH>`"
                )
            })?;

        let table = FactTable::load(&data_path)
            .with_context(|| format!("Failed to load facts from {}", data_path.display()))?;

        let report = GraphBuilder::build(&table);
        let rollups = Aggregator::new()
            .with_top_n(config.retrieval.top_n)
            .aggregate(table.rows());

        info!(
            nodes = report.graph.node_count(),
            edges = report.graph.edge_count(),
            "Workspace ready"
        );

        Ok(Self {
            config,
            data_path,
            rows_loaded: table.len(),
            rows_rejected: table.rejected().len(),
            rows_overwritten: report.overwritten,
            graph: Arc::new(report.graph),
            rollups: Arc::new(rollups),
        })
    }

    fn agent<G>(&self, generator: G) -> GraphRagAgent<G> {
        GraphRagAgent::from_config(
            self.graph.clone(),
            self.rollups.clone(),
            generator,
            &self.config,
        )
    }

    fn answering_agent(&self) -> anyhow::Result<GraphRagAgent<LlmClient>> {
        let client = LlmClient::from_config(&self.config.llm)?;
        Ok(self.agent(client))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Logs go to stderr so answers on stdout stay clean
    let default_directive = if cli.quiet { "footfall=warn" } else { "footfall=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(default_directive.parse()?),
        )
        .init();

    let data = cli.data.as_deref();
    match cli.command {
        Commands::Config { action } => cmd_config(action, cli.quiet),
        Commands::Chat => cmd_chat(&load_workspace(data)?, cli.quiet).await,
        Commands::Ask { question } => {
            cmd_ask(&load_workspace(data)?, &question, cli.format).await
        }
        Commands::Inspect { question } => {
            cmd_inspect(&load_workspace(data)?, &question, cli.format)
        }
        Commands::Context => cmd_context(&load_workspace(data)?),
        Commands::Stats => cmd_stats(&load_workspace(data)?, cli.format),
    }
}

fn load_workspace(data: Option<&Path>) -> anyhow::Result<Workspace> {
    Workspace::load(Config::load()?, data)
}

// ============================================================================
// Command Implementations
// ============================================================================

fn is_exit_command(input: &str) -> bool {
    let input = input.trim();
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

fn report_error(err: &footfall_core::Error) {
    error!(code = err.code(), error = %err, "Question failed");
    eprintln!("Error [{}]: {}", err.code(), err);
    if let Some(hint) = err.suggestion() {
        eprintln!("  Hint: {}", hint);
    }
}

async fn cmd_chat(workspace: &Workspace, quiet: bool) -> anyhow::Result<()> {
    let agent = workspace.answering_agent()?;
    let mut rl = DefaultEditor::new().map_err(|e| anyhow!("failed to init line editor: {e}"))?;

    if !quiet {
        println!("Footfall chat over {}", workspace.data_path.display());
        println!("Ask about sites, areas, regions or dates (DD-MM-YYYY). Type 'exit' to quit.\n");
    }

    loop {
        let line = match rl.readline("You: ") {
            Ok(line) => line,
            Err(ReadlineError::Eof) | Err(ReadlineError::Interrupted) => break,
            Err(e) => return Err(anyhow!("readline error: {e}")),
        };

        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if is_exit_command(question) {
            break;
        }
        let _ = rl.add_history_entry(question);

        match agent.answer(question).await {
            Ok(answer) => println!("\nAgent: {}\n", answer.text),
            Err(e) => report_error(&e),
        }
    }

    if !quiet {
        println!("Goodbye.");
    }
    Ok(())
}

async fn cmd_ask(workspace: &Workspace, question: &str, format: OutputFormat) -> anyhow::Result<()> {
    let agent = workspace.answering_agent()?;

    match agent.answer(question).await {
        Ok(answer) => match format {
            OutputFormat::Text => println!("{}", answer.text),
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&answer)?),
        },
        Err(e) => report_error(&e),
    }
    Ok(())
}

fn cmd_inspect(workspace: &Workspace, question: &str, format: OutputFormat) -> anyhow::Result<()> {
    let agent = workspace.agent(());
    let prepared = agent.prepare(question)?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&prepared)?),
        OutputFormat::Text => print!("{}", render_inspection(&prepared)),
    }
    Ok(())
}

fn render_inspection(prepared: &PreparedQuery) -> String {
    let join = |set: &std::collections::BTreeSet<String>| {
        if set.is_empty() {
            "(none)".to_string()
        } else {
            set.iter().cloned().collect::<Vec<_>>().join(", ")
        }
    };

    let mut lines = vec![
        format!("Question: {}", prepared.question),
        "Recognized entities:".to_string(),
        format!("  Sites: {}", join(&prepared.entities.sites)),
        format!("  Dates: {}", join(&prepared.entities.dates)),
        format!("  Regions: {}", join(&prepared.entities.regions)),
        format!("  Areas: {}", join(&prepared.entities.areas)),
    ];

    let selection = &prepared.selection;
    if selection.truncated {
        lines.push(format!(
            "Selection: {} ({} of {} nodes, truncated)",
            selection.strategy,
            selection.keys.len(),
            selection.candidates
        ));
    } else {
        lines.push(format!(
            "Selection: {} ({} nodes)",
            selection.strategy,
            selection.keys.len()
        ));
    }

    if let Some(reason) = prepared.fallback_reason() {
        lines.push(format!("Note [{}]: {}", reason.code(), reason));
        if let Some(hint) = reason.suggestion() {
            lines.push(format!("  Hint: {}", hint));
        }
    }

    lines.push(String::new());
    lines.push("Subgraph facts:".to_string());
    lines.push(prepared.subgraph_text.clone());

    lines.join("\n") + "\n"
}

fn cmd_context(workspace: &Workspace) -> anyhow::Result<()> {
    let agent = workspace.agent(());
    print!("{}", agent.standing_context());
    Ok(())
}

fn cmd_stats(workspace: &Workspace, format: OutputFormat) -> anyhow::Result<()> {
    let graph_stats = workspace.graph.stats();
    let summary = &workspace.rollups.summary;
    let date_range = summary
        .date_span
        .map(|(first, last)| format!("{} to {}", first.format("%Y-%m-%d"), last.format("%Y-%m-%d")));

    match format {
        OutputFormat::Json => {
            let nodes_by_type: serde_json::Map<String, serde_json::Value> = graph_stats
                .nodes_by_type
                .iter()
                .map(|(node_type, count)| (node_type.as_str().to_string(), json!(count)))
                .collect();
            let value = json!({
                "data_path": workspace.data_path.display().to_string(),
                "rows_loaded": workspace.rows_loaded,
                "rows_rejected": workspace.rows_rejected,
                "rows_overwritten": workspace.rows_overwritten,
                "rows_excluded": summary.excluded_rows,
                "nodes": graph_stats.node_count,
                "edges": graph_stats.edge_count,
                "nodes_by_type": nodes_by_type,
                "sites": summary.site_count,
                "areas": summary.area_count,
                "regions": summary.region_count,
                "total_in": summary.totals.total_in,
                "date_range": date_range,
            });
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
        OutputFormat::Text => {
            println!("Fact table: {}", workspace.data_path.display());
            println!("  Rows loaded: {}", workspace.rows_loaded);
            println!("  Rows rejected: {}", workspace.rows_rejected);
            println!("  Rows overwriting earlier metrics: {}", workspace.rows_overwritten);
            println!("  Rows without a parseable date (left out of period rollups): {}", summary.excluded_rows);
            println!("Graph:");
            println!("  Nodes: {}", graph_stats.node_count);
            println!("  Edges: {}", graph_stats.edge_count);
            for (node_type, count) in &graph_stats.nodes_by_type {
                println!("  {}: {}", node_type, count);
            }
            println!("Rollups:");
            println!("  Sites: {}", summary.site_count);
            println!("  Areas: {}", summary.area_count);
            println!("  Regions: {}", summary.region_count);
            println!("  Total visitors: {}", summary.totals.total_in);
            println!(
                "  Date range: {}",
                date_range.as_deref().unwrap_or("no dated observations")
            );
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
