//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use serde::Serialize;
use tracing::info;

use blackboard_core::Runtime;
use blackboard_shared::{
    AppConfig, Payload, Plan, StepId, StepStatus, init_config, load_config, load_config_from,
    write_default_config,
};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Blackboard: shared plans, results and cached source context for agents.
#[derive(Parser)]
#[command(
    name = "blackboard",
    version,
    about = "Shared blackboard store and content cache for cooperating agents.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file (defaults to ~/.blackboard/blackboard.toml).
    #[arg(long, global = true, env = "BLACKBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub(crate) enum Command {
    /// Plans and step status.
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },

    /// Agent results.
    Result {
        #[command(subcommand)]
        action: ResultAction,
    },

    /// Source context: descriptions and converted text.
    Context {
        #[command(subcommand)]
        action: ContextAction,
    },

    /// Print a plan with all of its results and context descriptions.
    Board {
        plan_id: String,
    },

    /// Content cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Background cache eviction.
    Housekeeping {
        #[command(subcommand)]
        action: HousekeepingAction,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub(crate) enum PlanAction {
    /// Validate and store a plan document (JSON).
    Save {
        plan_id: String,
        /// Path to the plan JSON, or `-` for stdin.
        #[arg(default_value = "-")]
        file: String,
    },
    /// Print a stored plan.
    Get { plan_id: String },
    /// Mark a step completed.
    Complete { plan_id: String, step_id: StepId },
    /// Set a step's status (pending, in_progress, completed, failed).
    Status {
        plan_id: String,
        step_id: StepId,
        status: StepStatus,
    },
}

#[derive(Subcommand)]
pub(crate) enum ResultAction {
    /// Store an agent's result for a step.
    Save {
        plan_id: String,
        agent_name: String,
        step_id: StepId,
        /// Short description of the result.
        #[arg(short, long, default_value = "")]
        description: String,
        /// Result text or JSON document, or `-` for stdin.
        #[arg(default_value = "-")]
        result: String,
    },
    /// Print a stored result.
    Get {
        plan_id: String,
        agent_name: String,
        step_id: StepId,
    },
}

#[derive(Subcommand)]
pub(crate) enum ContextAction {
    /// Attach a description of a source to a plan.
    Describe {
        plan_id: String,
        source: String,
        description: String,
    },
    /// Print a stored source description.
    Show { plan_id: String, source: String },
    /// Fetch a source (or serve it from cache) and print its Markdown.
    Get {
        source: String,
        /// Always fetch; the fresh text still replaces the cache entry.
        #[arg(long)]
        no_cache: bool,
    },
}

#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Delete entries older than the configured (or given) age now.
    Prune {
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
    /// Print the entry file for a source.
    Path { source: String },
    /// Remove the entry for a source.
    Invalidate { source: String },
}

#[derive(Subcommand)]
pub(crate) enum HousekeepingAction {
    /// Run the eviction schedule in the foreground until Ctrl-C.
    Run {
        #[arg(long)]
        interval_secs: Option<u64>,
        #[arg(long)]
        max_age_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "blackboard=info",
        1 => "blackboard=debug",
        _ => "blackboard=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr so command output stays pipeable.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(config_path),
            ConfigAction::Show => cmd_config_show(config_path.as_ref()),
        },
        Command::Housekeeping {
            action:
                HousekeepingAction::Run {
                    interval_secs,
                    max_age_secs,
                },
        } => {
            let mut config = resolve_config(config_path.as_ref())?;
            config.housekeeping.enabled = true;
            if let Some(secs) = interval_secs {
                config.housekeeping.interval_secs = secs;
            }
            if let Some(secs) = max_age_secs {
                config.housekeeping.max_age_secs = secs;
            }
            cmd_housekeeping_run(config).await
        }
        command => {
            let mut config = resolve_config(config_path.as_ref())?;
            // One-shot commands prune explicitly via `cache prune`.
            config.housekeeping.enabled = false;
            let runtime = Runtime::open(config).await?;
            let outcome = dispatch(&runtime, command).await;
            runtime.shutdown().await;
            outcome
        }
    }
}

async fn dispatch(runtime: &Runtime, command: Command) -> Result<()> {
    let store = runtime.store();
    match command {
        Command::Plan { action } => match action {
            PlanAction::Save { plan_id, file } => {
                let plan = Plan::from_json_str(&read_input(&file)?)?;
                store.save_plan(&plan_id, &plan).await?;
                ok()
            }
            PlanAction::Get { plan_id } => print_json(&store.get_plan(&plan_id).await?),
            PlanAction::Complete { plan_id, step_id } => {
                store.mark_plan_as_completed(&plan_id, step_id).await?;
                ok()
            }
            PlanAction::Status {
                plan_id,
                step_id,
                status,
            } => {
                store.update_step_status(&plan_id, step_id, status).await?;
                ok()
            }
        },
        Command::Result { action } => match action {
            ResultAction::Save {
                plan_id,
                agent_name,
                step_id,
                description,
                result,
            } => {
                let payload = Payload::from_input(&read_input(&result)?);
                store
                    .save_result(&plan_id, &agent_name, step_id, &description, payload)
                    .await?;
                ok()
            }
            ResultAction::Get {
                plan_id,
                agent_name,
                step_id,
            } => print_json(&store.get_result(&plan_id, &agent_name, step_id).await?),
        },
        Command::Context { action } => match action {
            ContextAction::Describe {
                plan_id,
                source,
                description,
            } => {
                store
                    .save_context_description(&plan_id, &source, &description)
                    .await?;
                ok()
            }
            ContextAction::Show { plan_id, source } => {
                print_json(&store.get_context_description(&plan_id, &source).await?)
            }
            ContextAction::Get { source, no_cache } => {
                let text = runtime.get_context(&source, !no_cache).await?;
                print!("{text}");
                Ok(())
            }
        },
        Command::Board { plan_id } => print_json(&store.get_blackboard(&plan_id).await?),
        Command::Cache { action } => match action {
            CacheAction::Prune { max_age_secs } => {
                let report = runtime
                    .remove_stale_files(max_age_secs.map(Duration::from_secs))
                    .await?;
                println!(
                    "scanned {}, removed {}, failed {}",
                    report.scanned,
                    report.removed,
                    report.failures.len()
                );
                for (path, reason) in &report.failures {
                    println!("  {}: {reason}", path.display());
                }
                Ok(())
            }
            CacheAction::Path { source } => {
                println!("{}", runtime.cache().entry_path(&source)?.display());
                Ok(())
            }
            CacheAction::Invalidate { source } => {
                let removed = runtime.cache().invalidate(&source).await?;
                println!("{}", if removed { "removed" } else { "absent" });
                Ok(())
            }
        },
        Command::Housekeeping { .. } | Command::Config { .. } => {
            Err(eyre!("command is not handled by the runtime dispatcher"))
        }
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_housekeeping_run(config: AppConfig) -> Result<()> {
    let runtime = Runtime::open(config).await?;
    info!(
        interval_secs = runtime.config().housekeeping.interval_secs,
        max_age_secs = runtime.config().housekeeping.max_age_secs,
        "housekeeping running; press Ctrl-C to stop"
    );
    let waited = tokio::signal::ctrl_c().await;
    runtime.shutdown().await;
    waited.wrap_err("failed to listen for Ctrl-C")
}

fn cmd_config_init(path: Option<PathBuf>) -> Result<()> {
    let path = match path {
        Some(path) => {
            write_default_config(&path)?;
            path
        }
        None => init_config()?,
    };
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&PathBuf>) -> Result<()> {
    let config = resolve_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

/// File contents, or stdin for `-`.
fn read_input(source: &str) -> Result<String> {
    if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .wrap_err("failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read_to_string(source).wrap_err_with(|| format!("failed to read {source}"))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn ok() -> Result<()> {
    println!("ok");
    Ok(())
}
