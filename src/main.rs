use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tandem_core::config::AppConfig;
use tandem_core::event::EventBus;
use tandem_core::types::{EngineEvent, RunId, RunStatus, TerminationReason, Visibility};
use tandem_engine::{InMemoryRunStore, LoopController};
use tandem_tools::{InMemoryStore, ToolRegistry};

#[derive(Parser)]
#[command(name = "tandem", version, about = "Agent execution engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "tandem.toml")]
    config: PathBuf,

    /// Run ID (auto-generated if not provided)
    #[arg(short, long)]
    run: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single prompt and exit
    Run {
        /// The prompt to send to the agent
        #[arg(trailing_var_arg = true)]
        prompt: Vec<String>,
    },
    /// Start interactive REPL mode
    Repl,
    /// Show current configuration
    Config,
    /// List available tools
    Tools,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("tandem=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        AppConfig::load(&cli.config)?
    } else {
        eprintln!(
            "No config file at {}; falling back to OPENAI_API_KEY from the environment.",
            cli.config.display()
        );
        create_env_config()?
    };

    let registry = Arc::new(ToolRegistry::with_builtins());

    match &cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        Some(Commands::Tools) => {
            // Private tools are filtered from external listings.
            for def in registry.definitions(false) {
                println!("{:<16} {}", def.name, def.description);
            }
            return Ok(());
        }
        _ => {}
    }

    let model = Arc::from(tandem_llm::create_client(&config.model));
    let events = Arc::new(EventBus::default());
    let cancel = CancellationToken::new();
    let store = Arc::new(InMemoryRunStore::new());
    let memory = Arc::new(InMemoryStore::new());

    let controller = LoopController::new(config.engine.clone(), model, registry.clone())?
        .with_events(events.clone())
        .with_cancellation(cancel.clone())
        .with_store(store)
        .with_memory(memory);

    let run_id = cli
        .run
        .as_deref()
        .map(RunId::from)
        .unwrap_or_default();

    // Graceful shutdown on Ctrl-C.
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("cancelling run");
        shutdown.cancel();
    });

    let private: HashSet<String> = registry
        .definitions(true)
        .into_iter()
        .filter(|d| d.visibility == Visibility::Private)
        .map(|d| d.name)
        .collect();

    match cli.command {
        Some(Commands::Run { prompt }) => {
            let text = if prompt.is_empty() {
                let stdin = io::stdin();
                stdin
                    .lock()
                    .lines()
                    .map_while(|l| l.ok())
                    .collect::<Vec<_>>()
                    .join("\n")
            } else {
                prompt.join(" ")
            };
            run_once(&controller, &events, &private, run_id, &text).await?;
        }
        Some(Commands::Repl) | None => {
            run_repl(&controller, &events, &private, &config, run_id).await?;
        }
        Some(Commands::Config) | Some(Commands::Tools) => unreachable!("handled above"),
    }

    Ok(())
}

async fn run_once(
    controller: &LoopController,
    events: &EventBus,
    private: &HashSet<String>,
    run_id: RunId,
    input: &str,
) -> anyhow::Result<()> {
    let mut rx = events.subscribe();
    let private = private.clone();

    // Event printer: public tool activity only.
    let print_handle = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                EngineEvent::ToolStart { name, .. } if !private.contains(&name) => {
                    eprintln!("[tool: {name}]");
                }
                EngineEvent::ToolEnd { name, outcome } if !private.contains(&name) => {
                    if outcome.is_failure() {
                        eprintln!("[{name}: failed]");
                    } else {
                        eprintln!("[{name}: ok]");
                    }
                }
                EngineEvent::RunTerminated { .. } => break,
                _ => {}
            }
        }
    });

    let outcome = controller.run(run_id, input).await?;
    print_handle.abort();

    match &outcome.status {
        RunStatus::AwaitingInput => {
            if let Some(text) = &outcome.final_text {
                println!("{text}");
            }
        }
        RunStatus::Terminated { reason } => match reason {
            TerminationReason::BudgetExhausted => {
                eprintln!("[run stopped: turn budget exhausted after {} turns]", outcome.turns_taken);
            }
            TerminationReason::Cancelled => {
                eprintln!("[run cancelled]");
            }
            TerminationReason::ModelFailure { message } => {
                eprintln!("[model failure: {message}]");
            }
        },
    }
    Ok(())
}

async fn run_repl(
    controller: &LoopController,
    events: &EventBus,
    private: &HashSet<String>,
    config: &AppConfig,
    run_id: RunId,
) -> anyhow::Result<()> {
    println!("Tandem v{}", env!("CARGO_PKG_VERSION"));
    println!("Run: {run_id}");
    println!(
        "Model: {} ({})",
        config.model.model_id, config.model.provider
    );
    println!("Type /help for commands, /quit to exit.\n");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("> ");
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break; // EOF
        }

        let input = input.trim();
        if input.is_empty() {
            continue;
        }

        match input {
            "/quit" | "/exit" | "/q" => break,
            "/run" => {
                println!("Run ID: {run_id}");
                continue;
            }
            "/help" => {
                println!("Commands:");
                println!("  /quit   Exit");
                println!("  /run    Show the run ID");
                continue;
            }
            _ if input.starts_with('/') => {
                println!("Unknown command: {input}. Type /help for available commands.");
                continue;
            }
            _ => {}
        }

        run_once(controller, events, private, run_id.clone(), input).await?;
    }

    Ok(())
}

fn create_env_config() -> anyhow::Result<AppConfig> {
    let api_key = std::env::var("OPENAI_API_KEY").ok();
    if api_key.is_none() {
        anyhow::bail!("no config file and OPENAI_API_KEY is unset; create tandem.toml");
    }

    let config_toml = r#"
        [model]
        model_id = "gpt-4.1-mini"
        api_key = "${OPENAI_API_KEY}"
    "#;
    let mut config: AppConfig = toml::from_str(config_toml)?;
    config.model.api_key = api_key;
    Ok(config)
}
