// crates/tascade-cli/src/main.rs
// ============================================================================
// Module: Tascade CLI
// Description: Command-line entry point: serve, migrate, check-config,
//              create-api-key.
// Purpose: Host the coordinator server and administrative commands.
// Dependencies: clap, tascade-config, tascade-core, tascade-server,
//               tascade-store-sqlite, tokio
// ============================================================================

//! ## Overview
//! The `tascade` binary hosts the coordinator: `serve` runs migrations and
//! starts the HTTP surface plus the expiry sweeper, `migrate` bootstraps the
//! schema and exits, `check-config` validates configuration, and
//! `create-api-key` mints a project-scoped bearer key, printing the raw key
//! exactly once.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use tascade_config::TascadeConfig;
use tascade_core::AgentId;
use tascade_core::ProjectId;
use tascade_core::RoleScopes;
use tascade_server::AppState;
use tascade_server::OperationRegistry;
use tascade_server::ServerContext;
use tascade_server::StderrAuditSink;
use tascade_server::SystemClock;
use tascade_server::auth::key_fingerprint;
use tascade_store_sqlite::SqliteStore;
use tascade_store_sqlite::SqliteStoreConfig;

// ============================================================================
// SECTION: CLI Definition
// ============================================================================

/// Tascade: coordinator for dependency-aware, multi-agent execution.
#[derive(Debug, Parser)]
#[command(name = "tascade", version, about)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Subcommand to run.
    #[command(subcommand)]
    command: Command,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
enum Command {
    /// Run migrations and serve the HTTP surface with the expiry sweeper.
    Serve,
    /// Apply pending schema migrations and exit.
    Migrate,
    /// Validate the configuration and exit.
    CheckConfig,
    /// Mint a project-scoped API key; prints the raw key exactly once.
    CreateApiKey {
        /// Project the key is scoped to.
        #[arg(long)]
        project_id: u64,
        /// Human-readable key label.
        #[arg(long)]
        name: String,
        /// Role scopes: comma-delimited from planner, agent, reviewer,
        /// operator, force.
        #[arg(long, default_value = "agent")]
        scopes: String,
    },
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

/// Writes one line of command output.
#[allow(
    clippy::print_stdout,
    reason = "Command output is the CLI contract."
)]
fn emit(line: &str) {
    println!("{line}");
}

/// Writes one line of diagnostic output.
#[allow(
    clippy::print_stderr,
    reason = "Diagnostics are written to stderr by convention."
)]
fn diag(line: &str) {
    eprintln!("{line}");
}

// ============================================================================
// SECTION: Command Implementations
// ============================================================================

/// Loads configuration from the given path or the environment.
fn load_config(path: Option<&PathBuf>) -> Result<TascadeConfig, String> {
    match path {
        Some(path) => TascadeConfig::load(path).map_err(|err| err.to_string()),
        None => TascadeConfig::from_env().map_err(|err| err.to_string()),
    }
}

/// Opens the store, running migrations.
fn open_store(config: &TascadeConfig) -> Result<SqliteStore, String> {
    let path = config.database.resolve_path().map_err(|err| err.to_string())?;
    let store_config = SqliteStoreConfig {
        path,
        busy_timeout_ms: config.database.busy_timeout_ms,
        journal_mode: tascade_store_sqlite::SqliteJournalMode::default(),
        migrations_dir: config.database.migrations_dir.clone(),
    };
    SqliteStore::open(&store_config).map_err(|err| err.to_string())
}

/// Parses a comma-delimited scope list into a bitmask.
fn parse_scopes(raw: &str) -> Result<RoleScopes, String> {
    let mut scopes = RoleScopes::from_bits(0);
    for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
        let scope = match entry {
            "planner" => RoleScopes::PLANNER,
            "agent" => RoleScopes::AGENT,
            "reviewer" => RoleScopes::REVIEWER,
            "operator" => RoleScopes::OPERATOR,
            "force" => RoleScopes::FORCE,
            other => return Err(format!("unknown scope: {other}")),
        };
        scopes = scopes.union(scope);
    }
    Ok(scopes)
}

/// Runs the server until interrupted.
async fn run_serve(config: TascadeConfig) -> Result<(), String> {
    let addr: SocketAddr = config
        .server
        .listen_addr
        .parse()
        .map_err(|_| format!("invalid listen address: {}", config.server.listen_addr))?;
    let store = open_store(&config)?;
    let state = AppState::new(config, store, Arc::new(SystemClock));
    let sweeper = tascade_server::sweeper::spawn(state.clone());
    let ctx = Arc::new(ServerContext {
        app: state,
        registry: OperationRegistry::new(),
        audit: Arc::new(StderrAuditSink),
    });
    diag(&format!("tascade listening on {addr}"));
    let result = tascade_server::serve(ctx, addr).await.map_err(|err| err.to_string());
    sweeper.abort();
    result
}

/// Mints a new API key, printing the raw key once.
fn run_create_api_key(
    config: &TascadeConfig,
    project_id: u64,
    name: &str,
    scopes: &str,
) -> Result<(), String> {
    let project_id =
        ProjectId::from_raw(project_id).ok_or_else(|| "project id must be >= 1".to_string())?;
    let scopes = parse_scopes(scopes)?;
    let store = open_store(config)?;
    let state = AppState::new(config.clone(), store, Arc::new(SystemClock));
    let raw_key = fresh_raw_key();
    let fingerprint = key_fingerprint(&raw_key);
    let now = state.clock.now();
    let key = state
        .store
        .with_tx(|tx| {
            state.coordinator.create_api_key(
                tx,
                project_id,
                name,
                &fingerprint,
                scopes,
                &AgentId::new("cli"),
                now,
            )
        })
        .map_err(|err| err.to_string())?;
    emit(&format!("api key id: {}", key.id));
    emit(&format!("raw key (store it now; it is not retrievable): {raw_key}"));
    Ok(())
}

/// Generates a fresh raw API key from host entropy.
fn fresh_raw_key() -> String {
    use rand::RngCore;

    let mut bytes = [0_u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut key = String::with_capacity(4 + bytes.len() * 2);
    key.push_str("tsc_");
    for byte in bytes {
        key.push_str(&format!("{byte:02x}"));
    }
    key
}

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// Process entry: parse, dispatch, map errors onto exit codes.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match load_config(cli.config.as_ref()) {
        Ok(config) => config,
        Err(message) => {
            diag(&format!("config error: {message}"));
            return ExitCode::from(2);
        }
    };
    let outcome = match cli.command {
        Command::Serve => run_serve(config).await,
        Command::Migrate => open_store(&config).map(|_| ()),
        Command::CheckConfig => {
            emit("config ok");
            Ok(())
        }
        Command::CreateApiKey {
            project_id,
            name,
            scopes,
        } => run_create_api_key(&config, project_id, &name, &scopes),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            diag(&format!("error: {message}"));
            ExitCode::FAILURE
        }
    }
}
