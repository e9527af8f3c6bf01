//! Feed Refresh CLI
//!
//! Entry point for the `feed-refresh` command-line tool.

use clap::{Parser, Subcommand};
use feed_refresh::config::{capture_env, ConfigScope, EnvSnapshot};
use feed_refresh::{
    BookkeepingBackend, BuiltinDefaults, ChildRegistry, EffectiveConfig, PgBackend,
    ProcessRunner, RefreshConfig, RefreshError, RefreshOrchestrator, StoreNameCodec,
    TerminationHandler,
};
use serde_json::{json, Map, Value};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Cycle committed, or skipped as a no-op
const EXIT_OK: i32 = 0;
/// Configuration missing or invalid; nothing was touched
const EXIT_CONFIG: i32 = 1;
/// Cycle failed; bookkeeping rolled back
const EXIT_FAILURE: i32 = 2;

#[derive(Parser)]
#[command(name = "feed-refresh")]
#[command(about = "Atomically refresh a database store from a data feed", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one refresh cycle
    Run {
        /// Path to config file (TOML)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Print the outcome as JSON
        #[arg(long)]
        json: bool,

        /// Debug logging, verbose collaborators
        #[arg(long, short = 'v')]
        verbose: bool,

        /// Number of most recent imports to keep
        #[arg(long)]
        keep: Option<usize>,

        /// Log and skip stores that fail to drop
        #[arg(long)]
        continue_on_deletion_failure: bool,

        /// Write a connection descriptor for the promoted store to this file
        #[arg(long)]
        dsn_file: Option<PathBuf>,
    },

    /// Show import history and existing stores
    List {
        /// Path to config file (TOML)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration (secrets redacted)
    Config {
        /// Path to config file (TOML)
        #[arg(long, short = 'c')]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let env = capture_env();

    let code = match cli.command {
        Commands::Run {
            config,
            json,
            verbose,
            keep,
            continue_on_deletion_failure,
            dsn_file,
        } => {
            init_tracing(verbose);
            let overrides = run_overrides(verbose, keep, continue_on_deletion_failure, dsn_file);
            run_refresh(config.as_deref(), &env, overrides, json).await
        }
        Commands::List { config, json } => {
            init_tracing(false);
            run_list(config.as_deref(), &env, json).await
        }
        Commands::Config { config } => run_config(config.as_deref(), &env),
    };

    process::exit(code);
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Collaborator scripts default to the directory of this executable.
fn install_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn run_overrides(
    verbose: bool,
    keep: Option<usize>,
    continue_on_deletion_failure: bool,
    dsn_file: Option<PathBuf>,
) -> Option<Value> {
    let mut root = Map::new();
    if verbose {
        root.insert("verbose".to_string(), json!(true));
    }
    if let Some(keep) = keep {
        root.insert("retention".to_string(), json!({ "keep": keep }));
    }
    if continue_on_deletion_failure {
        root.insert("continue_on_deletion_failure".to_string(), json!(true));
    }
    if let Some(path) = dsn_file {
        root.insert("descriptor".to_string(), json!({ "path": path }));
    }

    if root.is_empty() {
        None
    } else {
        Some(Value::Object(root))
    }
}

fn load_config(
    scope: ConfigScope,
    config_path: Option<&Path>,
    env: &EnvSnapshot,
    overrides: Option<Value>,
) -> Result<EffectiveConfig, i32> {
    EffectiveConfig::build_for(
        scope,
        &BuiltinDefaults::co_located(&install_dir()),
        config_path,
        env,
        overrides,
    )
    .map_err(|e| {
        eprintln!("Configuration error: {}", e);
        EXIT_CONFIG
    })
}

async fn connect(config: &RefreshConfig) -> Result<PgBackend, i32> {
    PgBackend::connect(&config.database).await.map_err(|e| {
        report_error(&e);
        EXIT_FAILURE
    })
}

fn report_error(err: &RefreshError) {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    eprintln!("Error: {}", message);
}

async fn run_refresh(
    config_path: Option<&Path>,
    env: &EnvSnapshot,
    overrides: Option<Value>,
    json_output: bool,
) -> i32 {
    let registry = ChildRegistry::new();
    let handler = TerminationHandler::new(Arc::clone(&registry));
    if let Err(e) = handler.install() {
        eprintln!("Failed to install termination handler: {}", e);
        return EXIT_FAILURE;
    }

    let config = match load_config(ConfigScope::Refresh, config_path, env, overrides) {
        Ok(effective) => effective.into_refresh_config(),
        Err(code) => return code,
    };

    let backend = match connect(&config).await {
        Ok(backend) => backend,
        Err(code) => return code,
    };
    let admin = Arc::new(backend.admin());
    let bookkeeping = Arc::new(backend.clone());

    let orchestrator =
        RefreshOrchestrator::new(config, bookkeeping, admin, ProcessRunner::new(registry));
    let result = orchestrator.run_cycle().await;
    backend.close().await;

    match result {
        Ok(outcome) => {
            if json_output {
                match serde_json::to_string_pretty(&outcome) {
                    Ok(json) => println!("{}", json),
                    Err(e) => {
                        eprintln!("Error serializing output: {}", e);
                        return EXIT_FAILURE;
                    }
                }
            } else {
                println!("{}", outcome.human_summary());
            }
            EXIT_OK
        }
        Err(RefreshError::Config(e)) => {
            eprintln!("Configuration error: {}", e);
            EXIT_CONFIG
        }
        Err(e) => {
            report_error(&e);
            EXIT_FAILURE
        }
    }
}

async fn run_list(config_path: Option<&Path>, env: &EnvSnapshot, json_output: bool) -> i32 {
    let config = match load_config(ConfigScope::Catalog, config_path, env, None) {
        Ok(effective) => effective.into_refresh_config(),
        Err(code) => return code,
    };
    let backend = match connect(&config).await {
        Ok(backend) => backend,
        Err(code) => return code,
    };

    let codec = StoreNameCodec::new(config.store_prefix.clone());
    let snapshot = backend.list_imports(&codec).await;
    backend.close().await;

    let snapshot = match snapshot {
        Ok(snapshot) => snapshot,
        Err(e) => {
            report_error(&e);
            return EXIT_FAILURE;
        }
    };

    if json_output {
        let output = json!({
            "prefix": codec.prefix(),
            "current": snapshot.current(),
            "history": snapshot.history,
            "catalog": snapshot.catalog,
        });
        match serde_json::to_string_pretty(&output) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error serializing output: {}", e);
                return EXIT_FAILURE;
            }
        }
        return EXIT_OK;
    }

    match snapshot.current() {
        Some(current) => println!("Current store: {}", current.name),
        None => println!("No successful import yet."),
    }
    println!();
    println!("Import history ({} total):", snapshot.history.len());
    for record in &snapshot.history {
        let exists = snapshot.catalog.contains(&record.name);
        let imported_at = chrono::DateTime::from_timestamp(record.created_at, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| record.created_at.to_string());
        println!(
            "  {} (imported {}, digest {}){}",
            record.name,
            imported_at,
            record.feed_digest,
            if exists { "" } else { " [missing]" }
        );
    }
    println!();
    println!("Stores with prefix {:?} ({} total):", codec.prefix(), snapshot.catalog.len());
    for name in &snapshot.catalog {
        println!("  {}", name);
    }
    EXIT_OK
}

fn run_config(config_path: Option<&Path>, env: &EnvSnapshot) -> i32 {
    let effective = match load_config(ConfigScope::Inspect, config_path, env, None) {
        Ok(effective) => effective,
        Err(code) => return code,
    };
    for problem in &effective.problems {
        eprintln!("warning: a refresh would fail: {}", problem);
    }
    match effective.to_json() {
        Ok(json) => {
            println!("{}", json);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error serializing output: {}", e);
            EXIT_FAILURE
        }
    }
}
