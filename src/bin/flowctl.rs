//! Prompt Flow CLI
//!
//! Command-line front end for workspace files: create one, inspect what a
//! flow compiles to, list its placeholders, validate the API key and run
//! flows, steps or single actions against the completion service.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use promptflow::engine::resolver::{placeholders, Placeholder};
use promptflow::llm::credentials::ProviderState;
use promptflow::llm::OpenAIClient;
use promptflow::{
    project, to_debug_string, AppConfig, AppState, ChatCompletionClient, DefinitionStore,
    FlowRunner, Preferences, ProjectionMode, Run, RunEventKind, RunStatus, RunnerConfig,
};

#[derive(Parser)]
#[command(name = "flowctl")]
#[command(about = "Prompt Flow CLI - compile and run multi-step LLM prompt flows")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (TOML, optional)
    #[arg(long, env = "PROMPTFLOW_CONFIG", default_value = "promptflow.toml")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a fresh workspace file
    Init {
        workspace: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the request a flow compiles to, with file payloads masked
    Preview {
        workspace: PathBuf,

        /// Flow id (defaults to the active flow)
        #[arg(long)]
        flow: Option<String>,

        /// Substitute variables and inline files instead of showing tokens
        #[arg(long)]
        execute: bool,
    },

    /// List the placeholder tokens used by each action of a flow
    Placeholders {
        workspace: PathBuf,

        #[arg(long)]
        flow: Option<String>,
    },

    /// Run a flow, one step of it, or one action (Ctrl-C cancels)
    Run {
        workspace: PathBuf,

        #[arg(long)]
        flow: Option<String>,

        /// Re-run only this step (1-based)
        #[arg(long)]
        step: Option<usize>,

        /// Re-run only this action of --step (1-based)
        #[arg(long, requires = "step")]
        action: Option<usize>,
    },

    /// Validate the API key and list the models it can use
    Models {
        /// Key to validate and store (defaults to the configured one)
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    let _ = dotenv::dotenv();
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();

    let config = AppConfig::load_from(&cli.config).context("loading configuration")?;

    match cli.command {
        Commands::Init { workspace, force } => init(&workspace, force),
        Commands::Preview {
            workspace,
            flow,
            execute,
        } => preview(&workspace, flow, execute),
        Commands::Placeholders { workspace, flow } => list_placeholders(&workspace, flow),
        Commands::Run {
            workspace,
            flow,
            step,
            action,
        } => run(&config, &workspace, flow, step, action).await,
        Commands::Models { api_key } => models(&config, api_key).await,
    }
}

fn load_workspace(path: &Path) -> Result<DefinitionStore> {
    DefinitionStore::load(path).with_context(|| format!("reading workspace {}", path.display()))
}

fn pick_flow(store: &DefinitionStore, flow: Option<String>) -> Result<String> {
    let flow_id = flow.unwrap_or_else(|| store.active_flow_id().to_string());
    if store.flow(&flow_id).is_none() {
        bail!("flow {} not found", flow_id);
    }
    Ok(flow_id)
}

fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    let store = DefinitionStore::new();
    store.save(path)?;
    println!("{} {}", "✅ Workspace written to".green(), path.display());
    println!("   active flow: {}", store.active_flow_id());
    Ok(())
}

fn preview(path: &Path, flow: Option<String>, execute: bool) -> Result<()> {
    let store = load_workspace(path)?;
    let flow_id = pick_flow(&store, flow)?;
    let mode = if execute {
        ProjectionMode::Execute
    } else {
        ProjectionMode::Preview
    };
    let compiled = project(&store, &flow_id, mode).ok_or_else(|| anyhow!("flow {} not found", flow_id))?;
    println!("{}", to_debug_string(&compiled));
    Ok(())
}

fn list_placeholders(path: &Path, flow: Option<String>) -> Result<()> {
    let store = load_workspace(path)?;
    let flow_id = pick_flow(&store, flow)?;
    let flow = store.flow(&flow_id).ok_or_else(|| anyhow!("flow {} not found", flow_id))?;

    for (step_index, step) in flow.steps.iter().enumerate() {
        let actions = step.action_ids.iter().filter_map(|id| store.action(id));
        for (action_index, action) in actions.enumerate() {
            let mut text = String::new();
            if action.system_prompt_enabled {
                text.push_str(&action.system_prompt);
            }
            for message in &action.messages {
                text.push('\n');
                text.push_str(&message.content);
            }
            if action.structured_output_enabled {
                text.push('\n');
                text.push_str(&action.structured_output);
            }

            let found = placeholders(&text);
            if found.is_empty() {
                continue;
            }
            println!(
                "{}",
                format!("Step {} action {}", step_index + 1, action_index + 1).bold()
            );
            for placeholder in found {
                let known = match &placeholder {
                    Placeholder::Variable(name) => store
                        .variables()
                        .iter()
                        .any(|v| v.bare_name() == name.as_str()),
                    Placeholder::BackReference { step, .. } => {
                        *step >= 1 && *step <= step_index
                    }
                };
                if known {
                    println!("  {}", placeholder);
                } else {
                    println!("  {} {}", placeholder, "(unresolved)".yellow());
                }
            }
        }
    }
    Ok(())
}

fn api_key(config: &AppConfig) -> Result<String> {
    if let Some(key) = &config.api_key {
        return Ok(key.clone());
    }
    let prefs = Preferences::load(&config.preferences_path)?;
    prefs
        .api_key
        .filter(|k| !k.is_empty())
        .ok_or_else(|| anyhow!("no API key configured; set OPENAI_API_KEY or run `flowctl models --api-key ...`"))
}

async fn models(config: &AppConfig, key: Option<String>) -> Result<()> {
    let key = match key {
        Some(key) => key,
        None => api_key(config)?,
    };
    let mut prefs = Preferences::load(&config.preferences_path)?;
    let mut provider = ProviderState::from_preferences(&prefs);

    let outcome = provider
        .check_and_set(
            &key,
            |key| Box::new(OpenAIClient::new(config.openai_config(key))) as Box<dyn ChatCompletionClient>,
            &mut prefs,
        )
        .await
        .map(|models| models.to_vec());
    prefs.save(&config.preferences_path)?;

    match outcome {
        Ok(models) => {
            println!("{} ({} models)", "✅ API key OK".green(), models.len());
            for model in models {
                println!("  {}", model.id);
            }
            Ok(())
        }
        Err(message) => bail!("{}", message),
    }
}

async fn run(
    config: &AppConfig,
    path: &Path,
    flow: Option<String>,
    step: Option<usize>,
    action: Option<usize>,
) -> Result<()> {
    let store = load_workspace(path)?;
    let flow_id = pick_flow(&store, flow)?;
    let step_index = step.map(to_index).transpose()?;
    let action_index = action.map(to_index).transpose()?;

    let key = api_key(config)?;
    let client: Arc<dyn ChatCompletionClient> = Arc::new(OpenAIClient::new(config.openai_config(&key)));
    let state = Arc::new(AppState::from_config(store, config));
    let runner = FlowRunner::with_config(state.clone(), client, RunnerConfig::from(config));

    let printer = tokio::spawn(print_events(state.events.subscribe()));

    let execution = async {
        match (step_index, action_index) {
            (Some(s), Some(a)) => runner.run_action(&flow_id, s, a).await,
            (Some(s), None) => runner.run_step(&flow_id, s).await,
            _ => runner.run_flow(&flow_id).await,
        }
    };
    tokio::pin!(execution);

    let result = loop {
        tokio::select! {
            result = &mut execution => break result,
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("cannot listen for Ctrl-C: {}", e);
                    break (&mut execution).await;
                }
                match state.runs.latest_run_for_flow(&flow_id) {
                    Some(run) if run.status == RunStatus::Running => {
                        eprintln!("{}", "Cancelling run...".yellow());
                        runner.cancel_execution(&run.id)?;
                    }
                    _ => debug!("nothing to cancel"),
                }
            }
        }
    };
    printer.abort();

    let run_id = match &result {
        Ok(run_id) => Some(run_id.clone()),
        Err(e) => {
            eprintln!("{} {}", "❌".red(), e);
            state.runs.latest_run_for_flow(&flow_id).map(|r| r.id)
        }
    };
    if let Some(run) = run_id.and_then(|id| state.runs.get_run(&id)) {
        print_summary(&run);
    }
    result.map(|_| ()).map_err(Into::into)
}

fn to_index(number: usize) -> Result<usize> {
    number
        .checked_sub(1)
        .ok_or_else(|| anyhow!("step and action numbers start at 1"))
}

async fn print_events(mut events: tokio::sync::broadcast::Receiver<promptflow::RunEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(missed)) => {
                debug!(missed, "event printer lagged");
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        match event.kind {
            RunEventKind::RunStarted { version } => {
                info!(run_id = %event.run_id, version, "run started");
                println!("{} {} (v{})", "▶ Run".cyan(), event.run_id, version);
            }
            RunEventKind::StepStarted { step_index } => {
                println!("  {} {}", "▶ Step".cyan(), step_index + 1);
            }
            RunEventKind::ActionFinished {
                step_index,
                action_index,
                status,
                error,
            } => {
                let label = format!("step {} action {}", step_index + 1, action_index + 1);
                match error {
                    Some(error) if status == RunStatus::Failed => {
                        println!("    {} {}: {}", "✗".red(), label, error)
                    }
                    _ => println!("    {} {} {}", status_mark(status), label, status),
                }
            }
            RunEventKind::StepFinished {
                step_index,
                status,
                duration_ms,
            } => println!(
                "  {} step {} {} ({}ms)",
                status_mark(status),
                step_index + 1,
                status,
                duration_ms.unwrap_or_default()
            ),
            _ => {}
        }
    }
}

fn status_mark(status: RunStatus) -> colored::ColoredString {
    match status {
        RunStatus::Completed => "✓".green(),
        RunStatus::Failed => "✗".red(),
        RunStatus::Cancelled => "■".yellow(),
        RunStatus::Running => "…".normal(),
        RunStatus::Idle => "·".dimmed(),
    }
}

fn print_summary(run: &Run) {
    println!();
    println!(
        "{} {} v{}: {} ({}ms)",
        "Run".bold(),
        run.id,
        run.version,
        run.status,
        run.duration_ms.unwrap_or_default()
    );
    for (step_index, step) in run.steps.iter().enumerate() {
        for (action_index, action) in step.actions.iter().enumerate() {
            if action.status == RunStatus::Idle {
                continue;
            }
            println!(
                "\n{} step {} action {}",
                status_mark(action.status),
                step_index + 1,
                action_index + 1
            );
            if !action.output.is_empty() {
                println!("{}", action.output);
            }
            if let Some(error) = &action.error {
                println!("{}", error.red());
            }
        }
    }
}
