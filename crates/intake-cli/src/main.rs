// crates/intake-cli/src/main.rs
// ============================================================================
// Binary: intake-server
// Description: Composition root — loads configuration, wires storage/auth/
// dispatch collaborators, and serves the HTTP API.
// Purpose: The only place in the workspace that picks concrete backend
// implementations for intake-core's ports and owns the process lifecycle.
// Dependencies: clap, tokio, axum (via intake-api), intake-config,
// intake-store-sqlite, intake-dispatch, tracing-subscriber
// ============================================================================

//! ## Overview
//! Mirrors the teacher's CLI dispatcher shape (`Cli`/`Commands`/`CliError`/
//! `run()`): `clap`-derive subcommands, a single `CliError` wrapping every
//! failure path, and a `main()` that turns a `CliResult<ExitCode>` into the
//! process exit code without panicking. `serve` assembles every collaborator
//! and runs until `ctrl_c`, then drains the dispatch worker before exiting.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use clap::Parser;
use clap::Subcommand;
use intake_api::AppState;
use intake_api::JwtVerifier;
use intake_api::SubmitPolicy;
use intake_api::build_router;
use intake_config::EnvSecretsSource;
use intake_config::IntakeConfig;
use intake_core::IdempotencyStore;
use intake_core::JobRepository;
use intake_core::OutboxStore;
use intake_core::RateLimiter;
use intake_dispatch::CompositeDispatcher;
use intake_dispatch::DispatchPolicy;
use intake_dispatch::LoggingSubscriber;
use intake_store_sqlite::BucketPolicy;
use intake_store_sqlite::FixedPolicy;
use intake_store_sqlite::SqliteIdempotencyStore;
use intake_store_sqlite::SqliteIntakeStore;
use intake_store_sqlite::SqliteRateLimiter;
use intake_store_sqlite::SqliteStoreConfig;
use thiserror::Error;

/// How often the dispatch worker sweeps the outbox for entries past their
/// retention window, independent of `dispatch.poll_interval_ms`.
const OUTBOX_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "intake-server", disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the HTTP server.
    Serve(ServeCommand),
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

/// Configuration for the `serve` command.
#[derive(Args, Debug)]
struct ServeCommand {
    /// Optional config file path (defaults to `INTAKE_CONFIG` or `./intake.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate a configuration file without starting the server.
    Validate(ConfigValidateCommand),
}

/// Configuration for the `config validate` command.
#[derive(Args, Debug)]
struct ConfigValidateCommand {
    /// Optional config file path (defaults to `INTAKE_CONFIG` or `./intake.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper; every fallible command collapses into this one type.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    message: String,
}

impl CliError {
    fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
#[tokio::main(flavor = "multi_thread")]
async fn main() -> ExitCode {
    match run().await {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
async fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    let Some(command) = cli.command else {
        return Err(CliError::new("no subcommand given; run with --help"));
    };

    match command {
        Commands::Serve(command) => command_serve(command).await,
        Commands::Config { command } => command_config(command),
    }
}

fn command_config(command: ConfigCommand) -> CliResult<ExitCode> {
    match command {
        ConfigCommand::Validate(command) => command_config_validate(&command),
    }
}

/// Loads and validates a configuration file, reporting success or the first
/// validation failure.
fn command_config_validate(command: &ConfigValidateCommand) -> CliResult<ExitCode> {
    match IntakeConfig::load(command.config.as_deref()) {
        Ok(_) => {
            write_stdout_line("configuration is valid")
                .map_err(|err| CliError::new(format!("failed to write to stdout: {err}")))?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            write_stderr_line(&format!("configuration is invalid: {err}"))
                .map_err(|write_err| CliError::new(format!("failed to write to stderr: {write_err}")))?;
            Ok(ExitCode::FAILURE)
        }
    }
}

// ============================================================================
// SECTION: Serve Command
// ============================================================================

/// Executes the `serve` command: loads configuration, assembles every
/// collaborator, starts the dispatch worker, and serves HTTP until shutdown.
async fn command_serve(command: ServeCommand) -> CliResult<ExitCode> {
    init_tracing();

    let config = IntakeConfig::load(command.config.as_deref())
        .map_err(|err| CliError::new(format!("failed to load configuration: {err}")))?;
    let secrets = EnvSecretsSource;
    let resolved = config
        .resolve_secrets(&secrets)
        .map_err(|err| CliError::new(format!("failed to resolve secrets: {err}")))?;

    let jwt_verifier = JwtVerifier::new(&resolved.jwt_public_key, &config.jwt)
        .map_err(|err| CliError::new(format!("failed to build JWT verifier: {err}")))?;

    let jobs_store = SqliteIntakeStore::open(&SqliteStoreConfig::new(config.database.jobs_db_path.clone()))
        .map_err(|err| CliError::new(format!("failed to open job store: {err}")))?;
    let idempotency_store = SqliteIdempotencyStore::from_connection(jobs_store.connection());

    let jobs: Arc<dyn JobRepository> = Arc::new(jobs_store.clone());
    let outbox: Arc<dyn OutboxStore> = Arc::new(jobs_store);
    let idempotency: Arc<dyn IdempotencyStore> = Arc::new(idempotency_store);

    let rate_limiter: Arc<dyn RateLimiter> = Arc::new(
        build_sqlite_rate_limiter(&config).map_err(|err| CliError::new(format!("failed to open rate limit store: {err}")))?,
    );

    let policy = SubmitPolicy {
        compat_mode: config.idempotency.compat_mode,
        idempotency_ttl_seconds: config.idempotency.ttl_seconds,
        max_retry_depth: config.retry.max_retry_depth,
    };

    let state = AppState::new(
        jobs,
        idempotency,
        rate_limiter,
        outbox.clone(),
        Arc::new(jwt_verifier),
        policy,
        config.server.trusted_hosts.clone(),
    );

    let dispatch_policy = DispatchPolicy {
        batch_size: config.dispatch.batch_size,
        max_attempts: config.dispatch.max_attempts,
        base_backoff_seconds: config.dispatch.base_backoff_seconds,
        max_backoff_seconds: config.dispatch.max_backoff_seconds,
    };
    let dispatcher = CompositeDispatcher::new(outbox, dispatch_policy)
        .with_subscriber(LoggingSubscriber::new())
        .with_subscriber(intake_api::BroadcastSubscriber::new(state.events.clone()));
    let purge_policy = intake_dispatch::worker::PurgePolicy {
        interval: OUTBOX_PURGE_INTERVAL,
        retention_days: config.dispatch.retention_days,
    };
    let (worker, join) = intake_dispatch::worker::spawn(
        dispatcher,
        Duration::from_millis(config.dispatch.poll_interval_ms),
        Some(purge_policy),
    );

    let router = build_router(state, &config.server.cors);
    let listener = tokio::net::TcpListener::bind(config.server.bind.as_str())
        .await
        .map_err(|err| CliError::new(format!("failed to bind {}: {err}", config.server.bind)))?;
    tracing::info!(bind = %config.server.bind, "intake-server listening");

    let serve_result = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await;

    worker.shutdown();
    let _ = join.await;

    serve_result.map_err(|err| CliError::new(format!("server error: {err}")))?;
    Ok(ExitCode::SUCCESS)
}

fn build_sqlite_rate_limiter(
    config: &IntakeConfig,
) -> Result<SqliteRateLimiter<FixedPolicy>, intake_store_sqlite::SqliteStoreError> {
    let policy = FixedPolicy(BucketPolicy::new(config.rate_limit.default_limit, config.rate_limit.default_window_seconds));
    SqliteRateLimiter::open(&SqliteStoreConfig::new(config.database.rate_limit_db_path.clone()), policy, config.rate_limit.fail_open)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry().with(filter).with(tracing_subscriber::fmt::layer().json()).try_init();
}

// ============================================================================
// SECTION: Output Helpers
// ============================================================================

fn write_stdout_line(message: &str) -> std::io::Result<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
}

fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    #![allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        reason = "Test assertions on CLI parsing; a panic here is a test failure."
    )]

    use super::*;

    #[test]
    fn cli_parses_serve_with_config_path() {
        let cli = Cli::parse_from(["intake-server", "serve", "--config", "intake.toml"]);
        match cli.command {
            Some(Commands::Serve(command)) => assert_eq!(command.config, Some(PathBuf::from("intake.toml"))),
            other => panic!("expected Serve, got {other:?}"),
        }
    }

    #[test]
    fn cli_parses_config_validate() {
        let cli = Cli::parse_from(["intake-server", "config", "validate"]);
        assert!(matches!(cli.command, Some(Commands::Config { command: ConfigCommand::Validate(_) })));
    }

    #[test]
    fn config_validate_rejects_missing_file() {
        let command = ConfigValidateCommand { config: Some(PathBuf::from("/nonexistent/intake.toml")) };
        let code = command_config_validate(&command).expect("command does not error");
        assert_eq!(format!("{code:?}"), format!("{:?}", ExitCode::FAILURE));
    }
}
