use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

use yardflow::api::{ItemsParams, RegisterRequest, TransitionRequest};
use yardflow::{
    init_telemetry, ApiError, DatabaseManager, EngineSettings, OperationTimer, SqliteStore,
    TenantId, WorkflowApi, WorkflowEngine, YardflowConfig,
};

const EXIT_CLIENT_ERROR: i32 = 2;
const EXIT_CONFLICT: i32 = 3;
const EXIT_FAILURE: i32 = 1;

#[derive(Parser)]
#[command(name = "yardflow")]
#[command(about = "Track pipe work orders through the yard workflow")]
#[command(long_about = "Yardflow moves each work order one step at a time through \
                       Received → Inspection → Production → Inventory → Shipped → Completed, \
                       recording every transition in an append-only history.")]
struct Cli {
    /// Yard whose records to operate on
    #[arg(long, global = true)]
    tenant: Option<String>,
    /// SQLite database URL, overrides the configured one
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// Configuration file (defaults to ./yardflow.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,
    /// Show info-level logs on stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a newly received work order
    Create {
        work_order: String,
        #[arg(long)]
        actor: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Show the current state of a work order
    State { work_order: String },
    /// Check whether a transition would be accepted, without applying it
    Validate { work_order: String, target: String },
    /// Move a work order to its next state
    Transition {
        work_order: String,
        target: String,
        #[arg(long)]
        actor: String,
        #[arg(long, default_value = "")]
        notes: String,
    },
    /// Show every transition of a work order, oldest first
    History { work_order: String },
    /// List work orders currently in a state
    List {
        state: String,
        #[arg(long)]
        limit: Option<u32>,
        #[arg(long)]
        offset: Option<u32>,
        /// work_order (default) or recent_transition
        #[arg(long)]
        order_by: Option<String>,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Create { .. } => "create",
            Commands::State { .. } => "state",
            Commands::Validate { .. } => "validate",
            Commands::Transition { .. } => "transition",
            Commands::History { .. } => "history",
            Commands::List { .. } => "list",
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    YardflowConfig::load_env_file()?;
    let mut config = YardflowConfig::load_from(cli.config.as_deref())?;

    let mut database = config.database.take().unwrap_or_default();
    if let Some(url) = &cli.database_url {
        database.url = url.clone();
    }
    if let Some(tenant) = &cli.tenant {
        database.tenant_id = tenant.clone();
    }
    config.database = Some(database);
    if !cli.verbose {
        config.observability.log_level = "warn".to_string();
    }

    let issues = config.validate();
    if !issues.is_empty() {
        for issue in &issues {
            eprintln!("❌ {}: {}", issue.code, issue.message);
        }
        bail!("invalid configuration ({} problem(s))", issues.len());
    }

    init_telemetry(&config.observability)?;

    let code = tokio::runtime::Runtime::new()?.block_on(async { run(cli, config).await })?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

async fn run(cli: Cli, config: YardflowConfig) -> Result<i32> {
    let database = config.database.clone().unwrap_or_default();
    let manager = DatabaseManager::new(&database).await?;

    let store = manager.store_for(TenantId::new(database.tenant_id.clone()));
    let engine = WorkflowEngine::from_shared(Arc::new(store), EngineSettings::from(&config.engine));
    let api = WorkflowApi::new(engine);

    let timer = OperationTimer::new(cli.command.name());
    let result = execute(&api, cli.command, cli.json).await;
    timer.finish();
    api.engine().metrics().log_stats();
    manager.shutdown().await;

    Ok(match result {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err, cli.json);
            exit_code(&err)
        }
    })
}

async fn execute(api: &WorkflowApi<SqliteStore>, command: Commands, json: bool) -> Result<(), ApiError> {
    match command {
        Commands::Create {
            work_order,
            actor,
            notes,
        } => {
            let created = api
                .register(&work_order, RegisterRequest { actor, notes })
                .await?;
            if json {
                print_json(&created);
            } else {
                println!("✅ Registered {} in {}", created.work_order, created.to_state);
            }
        }
        Commands::State { work_order } => {
            let state = api.get_state(&work_order).await?;
            if json {
                print_json(&state);
            } else {
                println!("📋 {}: {}", state.work_order, state.state);
                println!("   Version: {}", state.version);
                println!("   Updated: {}", state.updated_at.to_rfc3339());
            }
        }
        Commands::Validate { work_order, target } => {
            let validation = api.validate(&work_order, &target).await?;
            if json {
                print_json(&validation);
            } else {
                println!(
                    "✅ {} can move to {}",
                    validation.work_order, validation.target_state
                );
            }
        }
        Commands::Transition {
            work_order,
            target,
            actor,
            notes,
        } => {
            let request = TransitionRequest {
                target_state: target,
                actor,
                notes,
            };
            let moved = api.post_transition(&work_order, request).await?;
            if json {
                print_json(&moved);
            } else {
                println!(
                    "✅ {}: {} → {}",
                    moved.work_order,
                    moved.from_state.as_deref().unwrap_or("-"),
                    moved.to_state
                );
            }
        }
        Commands::History { work_order } => {
            let history = api.get_history(&work_order).await?;
            if json {
                print_json(&history);
            } else {
                println!("📜 History for {} ({} entries)", work_order.trim(), history.len());
                for (index, entry) in history.iter().enumerate() {
                    println!(
                        "  {}. {} → {}  by {} at {}",
                        index + 1,
                        entry.from_state.as_deref().unwrap_or("-"),
                        entry.to_state,
                        entry.actor,
                        entry.occurred_at.to_rfc3339()
                    );
                    if !entry.notes.is_empty() {
                        println!("     {}", entry.notes);
                    }
                }
            }
        }
        Commands::List {
            state,
            limit,
            offset,
            order_by,
        } => {
            let params = ItemsParams {
                limit,
                offset,
                order_by,
            };
            let page = api.get_items(&state, params).await?;
            if json {
                print_json(&page);
            } else if page.items.is_empty() {
                println!("📋 No work orders in {}", page.state);
            } else {
                println!("📋 Work orders in {} ({} shown)", page.state, page.items.len());
                for item in &page.items {
                    println!("  {item}");
                }
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("❌ Failed to encode output: {e}"),
    }
}

fn report_error(err: &ApiError, json: bool) {
    if json {
        print_json(&err.body);
        return;
    }
    eprintln!("❌ {}", err.body.message);
    if err.body.retryable {
        eprintln!("   Another update won the race. Re-read the state and try again.");
    }
}

fn exit_code(err: &ApiError) -> i32 {
    match err.status {
        409 => EXIT_CONFLICT,
        400..=499 => EXIT_CLIENT_ERROR,
        _ => EXIT_FAILURE,
    }
}
