use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use agora_core::config::{RosterFile, RunConfig};
use agora_core::hub::{LiveTraceHub, TraceEventKind};
use agora_core::types::{AgentRole, AgentUnit, DocumentRecord};

use agora_engine::collab::{InMemoryMemory, InMemoryRuns, StaticEvidence};
use agora_engine::graph::WorkflowRunner;
use agora_engine::{
    suggest_workflow, DebateOrchestrator, RunOutcome, RunRegistry, RunService, StartedRun,
};

#[derive(Parser)]
#[command(name = "agora", version, about = "Multi-agent deliberation engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agora.toml")]
    config: PathBuf,

    /// Path to an agent roster file (built-in demo roster when omitted)
    #[arg(short, long)]
    roster: Option<PathBuf>,

    /// Path to a JSON evidence corpus
    #[arg(short, long)]
    docs: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an iterative debate over a question
    Ask {
        /// The question to deliberate on
        question: String,
        /// Use a fixed run id instead of a generated one
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Execute a fixed workflow DAG over a question
    Flow {
        /// Path to a workflow JSON file
        #[arg(short, long)]
        workflow: PathBuf,
        /// The question to answer
        question: String,
        /// Use a fixed run id instead of a generated one
        #[arg(long)]
        run_id: Option<String>,
    },
    /// Ask the designer model to draft a workflow for a question
    Suggest {
        /// The question to design for
        question: String,
        /// Allow the designer to propose new agents
        #[arg(long)]
        create: bool,
    },
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("agora=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "agora", &mut std::io::stdout());
        return Ok(());
    }

    let config = if cli.config.exists() {
        Arc::new(RunConfig::load(&cli.config)?)
    } else {
        eprintln!(
            "Warning: no config file at {}, using defaults with the mock provider",
            cli.config.display()
        );
        Arc::new(RunConfig::default())
    };

    let roster = match &cli.roster {
        Some(path) => RosterFile::load(path)?.agents,
        None => demo_roster(),
    };

    let docs: Vec<DocumentRecord> = match &cli.docs {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => Vec::new(),
    };

    match cli.command {
        Commands::Config => {
            println!("{}", toml::to_string_pretty(config.as_ref())?);
            Ok(())
        }
        Commands::Suggest { question, create } => {
            let backend = agora_llm::create_backend(&config);
            let suggestion = suggest_workflow(
                &question,
                &roster,
                &config,
                &backend,
                create,
                tokio_util::sync::CancellationToken::new(),
            )
            .await;
            println!("{}", serde_json::to_string_pretty(&suggestion.workflow)?);
            if !suggestion.create_agents.is_empty() {
                eprintln!("Suggested new agents:");
                for agent in &suggestion.create_agents {
                    eprintln!("  - {} ({:?}): {}", agent.id, agent.role, agent.name);
                }
            }
            Ok(())
        }
        Commands::Ask { question, run_id } => {
            let service = build_service(&config, docs);
            let started = service.start_ask(question, roster, run_id);
            stream_run(&service, started).await
        }
        Commands::Flow { workflow, question, run_id } => {
            let graph = serde_json::from_str(&std::fs::read_to_string(&workflow)?)?;
            let service = build_service(&config, docs);
            let started = service.start_workflow(question, graph, roster, run_id);
            stream_run(&service, started).await
        }
        Commands::Completions { .. } => unreachable!("handled before config load"),
    }
}

fn build_service(config: &Arc<RunConfig>, docs: Vec<DocumentRecord>) -> RunService {
    let backend = agora_llm::create_backend(config);
    let memory = Arc::new(InMemoryMemory::new());
    let runs = Arc::new(InMemoryRuns::new());
    let evidence = Arc::new(StaticEvidence::new(docs));

    let orchestrator = Arc::new(DebateOrchestrator::new(
        backend.clone(),
        config.clone(),
        memory.clone(),
        runs.clone(),
        evidence,
    ));
    let runner = Arc::new(WorkflowRunner::new(backend, config.clone(), memory, runs));

    RunService::new(
        Arc::new(RunRegistry::new()),
        Arc::new(LiveTraceHub::default()),
        orchestrator,
        runner,
    )
}

async fn stream_run(service: &RunService, started: StartedRun) -> anyhow::Result<()> {
    info!(run_id = %started.run_id, "run accepted");
    let mut events = service.subscribe(&started.run_id);

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event.kind {
                TraceEventKind::Iteration => {
                    let iteration = event.payload.get("iteration").and_then(|v| v.as_u64());
                    let agents = event
                        .payload
                        .get("agents_ran")
                        .and_then(|v| v.as_array())
                        .map(|a| {
                            a.iter()
                                .filter_map(|v| v.as_str())
                                .collect::<Vec<_>>()
                                .join(", ")
                        })
                        .unwrap_or_default();
                    match iteration {
                        Some(i) => eprintln!("[iteration {i}] agents: {agents}"),
                        None => eprintln!("[iteration] agents: {agents}"),
                    }
                }
                TraceEventKind::Final => break,
                TraceEventKind::Error => {
                    let error = event
                        .payload
                        .get("error")
                        .and_then(|v| v.as_str())
                        .unwrap_or("unknown");
                    eprintln!("[error] {error}");
                    break;
                }
            }
        }
    });

    let outcome: RunOutcome = started.handle.await??;
    printer.abort();

    println!("{}", outcome.answer);
    eprintln!();
    eprintln!("confidence: {:.2}", outcome.confidence);
    eprintln!("justification: {}", outcome.justification);
    eprintln!(
        "tokens: {} in / {} out, cost {:.4}",
        outcome.tokens.total_input_tokens, outcome.tokens.total_output_tokens,
        outcome.tokens.total_cost
    );
    std::io::stdout().flush().ok();
    Ok(())
}

/// A mock-provider roster for running without any credentials.
fn demo_roster() -> Vec<AgentUnit> {
    fn agent(id: &str, name: &str, role: AgentRole, prompt: &str) -> AgentUnit {
        AgentUnit {
            id: id.to_string(),
            name: name.to_string(),
            role,
            enabled: true,
            system_prompt: prompt.to_string(),
            model: "gpt-4o-mini".to_string(),
            provider: "mock".to_string(),
            temperature: 0.7,
            max_tokens: 1024,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            tags: vec!["demo".to_string()],
        }
    }

    vec![
        agent(
            "responder-1",
            "Analyst",
            AgentRole::Responder,
            "You are a careful analyst. Answer thoroughly and cite your reasoning.",
        ),
        agent(
            "responder-2",
            "Pragmatist",
            AgentRole::Responder,
            "You are a pragmatic engineer. Answer concisely with concrete steps.",
        ),
        agent(
            "critic-1",
            "Skeptic",
            AgentRole::Critic,
            "You are a rigorous critic. Find flaws and rate their severity.",
        ),
        agent(
            "scorer-1",
            "Judge",
            AgentRole::ScoringAgent,
            "You score candidate answers for accuracy and completeness.",
        ),
    ]
}
