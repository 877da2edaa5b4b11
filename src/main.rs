//! Crewflow CLI - run crews of LLM agents

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::StreamExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use crewflow::error::{CrewError, FixSuggestion};
use crewflow::provider::create_provider;
use crewflow::store::{InMemoryRunStore, JsonFileRunStore, RunStore};
use crewflow::tools::BuiltinRegistry;
use crewflow::{
    level, Crew, EngineConfig, ExecutionResult, ExecutionStep, Inputs, Process, RunController,
    RunEvent, RunScope, StepType,
};

#[derive(Parser)]
#[command(name = "crewflow")]
#[command(about = "Crewflow - orchestrate crews of LLM agents")]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a crew file
    Run {
        /// Path to crew YAML file
        file: PathBuf,

        /// Run input as key=value (repeatable; JSON values allowed)
        #[arg(short, long = "input", value_name = "KEY=VALUE")]
        inputs: Vec<String>,

        /// Override provider (openai, mock)
        #[arg(short, long)]
        provider: Option<String>,

        /// Override default model
        #[arg(short, long)]
        model: Option<String>,

        /// Override the crew's process (sequential, parallel, hierarchical)
        #[arg(long)]
        process: Option<String>,

        /// Print steps as they happen
        #[arg(long)]
        stream: bool,

        /// Print the execution result as JSON
        #[arg(long)]
        json: bool,

        /// Persist run records as JSON files in this directory
        #[arg(long)]
        store_dir: Option<PathBuf>,

        /// Engine config file (default: ~/.config/crewflow/config.toml)
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Validate a crew file
    Validate {
        /// Path to crew YAML file
        file: PathBuf,
    },

    /// Show the dependency levels of a crew
    Levels {
        /// Path to crew YAML file
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Run {
            file,
            inputs,
            provider,
            model,
            process,
            stream,
            json,
            store_dir,
            config,
        } => {
            let options = RunOptions {
                inputs,
                provider,
                model,
                process,
                stream,
                json,
                store_dir,
                config,
            };
            run_crew(&file, options).await
        }
        Commands::Validate { file } => validate_crew(&file).await.map(|_| true),
        Commands::Levels { file } => show_levels(&file).await.map(|_| true),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            if let Some(suggestion) = e.fix_suggestion() {
                eprintln!("  {} {}", "Fix:".yellow(), suggestion);
            }
            std::process::exit(1);
        }
    }
}

struct RunOptions {
    inputs: Vec<String>,
    provider: Option<String>,
    model: Option<String>,
    process: Option<String>,
    stream: bool,
    json: bool,
    store_dir: Option<PathBuf>,
    config: Option<PathBuf>,
}

/// Returns whether the run completed
async fn run_crew(file: &Path, options: RunOptions) -> Result<bool, CrewError> {
    let mut config = match &options.config {
        Some(path) => EngineConfig::load_from(path)?,
        None => EngineConfig::load()?,
    }
    .with_env();

    if let Some(provider) = options.provider {
        config.provider.name = provider;
    }
    if let Some(model) = options.model {
        config.defaults.model = Some(model);
    }
    if let Some(dir) = options.store_dir {
        config.store.dir = Some(dir);
    }

    let mut crew = Crew::from_file(file).await?;
    if let Some(process) = options.process {
        crew.process = process.parse::<Process>()?;
    }
    let inputs = parse_inputs(&options.inputs)?;

    let provider = create_provider(&config.provider.name, &config)?;
    let tools = Arc::new(BuiltinRegistry::from_config(&config));
    let store: Arc<dyn RunStore> = match &config.store.dir {
        Some(dir) => Arc::new(JsonFileRunStore::new(dir)),
        None => Arc::new(InMemoryRunStore::new()),
    };
    let controller = RunController::from_config(provider, tools, store, &config);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    if !options.json {
        println!(
            "{} Running crew '{}' ({}, {} tasks) with {}",
            "→".cyan(),
            crew.name.cyan().bold(),
            crew.process,
            crew.tasks.len(),
            config.provider.name.cyan()
        );
    }

    let crew = Arc::new(crew);
    let scope = RunScope::default();
    let result = if options.stream {
        let mut events = controller.run_streaming_with_cancel(crew, scope, inputs, cancel);
        let mut finished = None;
        while let Some(event) = events.next().await {
            match event {
                RunEvent::Step(step) if !options.json => print_step(&step),
                RunEvent::Step(_) => {}
                RunEvent::Finished(result) => finished = Some(result),
            }
        }
        finished.unwrap_or_else(|| Err(CrewError::Execution("run ended without a result".into())))?
    } else {
        controller.run_with_cancel(crew, scope, inputs, cancel).await?
    };

    if options.json {
        let json = serde_json::to_string_pretty(&result)
            .map_err(|e| CrewError::Execution(format!("Failed to serialize result: {}", e)))?;
        println!("{}", json);
    } else {
        print_summary(&result, options.stream);
    }

    Ok(result.is_success())
}

/// `key=value` pairs; values that parse as JSON keep their type
fn parse_inputs(raw: &[String]) -> Result<Inputs, CrewError> {
    raw.iter()
        .map(|pair| -> Result<(String, Value), CrewError> {
            let (key, value) = pair
                .split_once('=')
                .filter(|(k, _)| !k.trim().is_empty())
                .ok_or_else(|| CrewError::InvalidInput { input: pair.clone() })?;
            let value = serde_json::from_str::<Value>(value)
                .unwrap_or_else(|_| Value::String(value.to_string()));
            Ok((key.trim().to_string(), value))
        })
        .collect()
}

fn print_step(step: &ExecutionStep) {
    let label = match step.step_type {
        StepType::TaskStart | StepType::TaskComplete => step.step_type.as_str().cyan(),
        StepType::ToolCall | StepType::ToolResult => step.step_type.as_str().magenta(),
        StepType::Delegation => step.step_type.as_str().blue(),
        StepType::Error => step.step_type.as_str().red().bold(),
        _ => step.step_type.as_str().dimmed(),
    };
    let task = step.task_id.as_deref().unwrap_or("-");
    let first_line = step.content.lines().next().unwrap_or("");
    println!("  [{}] {} {}", task.dimmed(), label, first_line);
}

fn print_summary(result: &ExecutionResult, streamed: bool) {
    if !streamed {
        for (task_id, task) in &result.task_results {
            let symbol = if task.is_success() { "✓".green() } else { "✗".red() };
            println!(
                "  {} {} {}",
                symbol,
                task_id,
                format!("({:.1}s)", task.duration_ms as f64 / 1000.0).dimmed()
            );
            if let Some(err) = &task.error {
                println!("      {} {}", "Error:".red(), err);
            }
        }
    }

    let status = if result.is_success() {
        result.status.as_str().green().bold()
    } else {
        result.status.as_str().red().bold()
    };
    println!(
        "\n{} Run {} {} in {:.1}s ({} tokens)",
        "→".cyan(),
        result.run_id.dimmed(),
        status,
        result.total_duration_ms as f64 / 1000.0,
        result.total_tokens()
    );

    if let Some(error) = &result.error {
        println!("  {} {}", "Error:".red(), error);
    }
    if let Some(output) = &result.final_output {
        println!("\n{}", "Output:".cyan().bold());
        println!("{}", output);
    }
}

async fn validate_crew(file: &Path) -> Result<(), CrewError> {
    let crew = Crew::from_file(file).await?;
    crew.validate()?;

    println!("{} Crew '{}' is valid", "✓".green(), file.display());
    println!("  Name: {}", crew.name);
    println!("  Process: {}", crew.process);
    println!("  Agents: {}", crew.agents.len());
    println!("  Tasks: {}", crew.tasks.len());
    Ok(())
}

async fn show_levels(file: &Path) -> Result<(), CrewError> {
    let crew = Crew::from_file(file).await?;
    let leveling = level(&crew.tasks);

    for (index, tasks) in leveling.levels.iter().enumerate() {
        let ids: Vec<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
        let marker = if leveling.is_forced(index) {
            " (forced)".yellow().to_string()
        } else {
            String::new()
        };
        println!("Level {}{}: {}", index + 1, marker, ids.join(", "));
    }

    if let Some(forced) = &leveling.forced {
        println!(
            "{} Unsatisfied dependencies: {}",
            "!".yellow().bold(),
            forced.unmet.join(", ")
        );
    }
    Ok(())
}
