//! Service bootstrap entrypoint
//!
//! Runs as the container command: waits for the database, applies
//! migrations, then starts the service in development or production mode.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::env;
use std::future::Future;
use std::path::PathBuf;
use std::pin::pin;
use std::process::ExitCode;
use tracing::{error, info};

use service_bootstrap::config::BootstrapConfig;
use service_bootstrap::error::BootstrapError;
use service_bootstrap::launcher::{LaunchPlan, ProcessLauncher};
use service_bootstrap::migration::CommandMigration;
use service_bootstrap::orchestrator::{Bootstrap, StageTracker};
use service_bootstrap::readiness::PostgresProbe;
use service_bootstrap::signals::termination_signal;

#[derive(Parser, Debug)]
#[command(name = "service-bootstrap")]
#[command(
    about = "Container entrypoint: wait for the database, migrate, start the service",
    long_about = "Gates service startup on database readiness and schema migrations.\n\n\
    Database settings come from DB_NAME, DB_USER, DB_PASSWORD, DB_HOST and DB_PORT.\n\
    DEV_MODE=true runs the service under a restart-on-change supervisor;\n\
    otherwise the bootstrap process is replaced by the service."
)]
#[command(version)]
struct Cli {
    /// Path to YAML config file
    #[arg(long, env = "BOOTSTRAP_CONFIG_PATH", global = true)]
    config: Option<PathBuf>,

    /// Force development mode regardless of DEV_MODE
    #[arg(long, global = true)]
    dev: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, Copy, Default)]
enum Commands {
    /// Wait for dependencies, migrate, then start the service (default)
    #[default]
    Run,
    /// Only wait until dependencies are reachable
    Wait,
    /// Wait for dependencies, then apply migrations and exit
    Migrate,
    /// Print the resolved configuration and launch plan without running anything
    Plan,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // Initialize tracing with sensible defaults
    tracing_subscriber::fmt()
        .with_env_filter(
            env::var("RUST_LOG")
                .unwrap_or_else(|_| "service_bootstrap=info,sqlx=warn".to_string()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(e) => {
            error!("Bootstrap failed: {:#}", e);
            let code = e
                .downcast_ref::<BootstrapError>()
                .map(BootstrapError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    if let Some(path) = &cli.config {
        info!("Loading bootstrap configuration from: {}", path.display());
    }

    let config = BootstrapConfig::load(cli.config.as_deref(), cli.dev)
        .map_err(BootstrapError::from)
        .context("Invalid bootstrap configuration")?;

    let probe = PostgresProbe::new(&config.connection, config.readiness.connect_timeout());
    info!("Database: {} (user '{}')", probe.target(), config.connection.user);

    let bootstrap = Bootstrap::new(
        &config,
        probe,
        CommandMigration::new(config.migration.command.clone()),
        ProcessLauncher,
    );

    match cli.command.unwrap_or_default() {
        Commands::Run => {
            let shutdown = shutdown_signal()?;
            Ok(bootstrap.run_until(&mut StageTracker::new(), shutdown).await?)
        }
        Commands::Wait => {
            let shutdown = pin!(shutdown_signal()?);
            bootstrap
                .wait_ready(&mut StageTracker::new(), shutdown)
                .await?;
            Ok(0)
        }
        Commands::Migrate => {
            bootstrap.run_migrations(shutdown_signal()?).await?;
            Ok(0)
        }
        Commands::Plan => {
            print_plan(&config, bootstrap.plan())?;
            Ok(0)
        }
    }
}

/// As PID 1 nothing else acts on SIGINT/SIGTERM, so the stages before
/// dispatch race this future
fn shutdown_signal() -> Result<impl Future<Output = i32>> {
    termination_signal().context("Failed to install signal handlers")
}

#[derive(Serialize)]
struct PlanView<'a> {
    config: &'a BootstrapConfig,
    plan: &'a LaunchPlan,
}

fn print_plan(config: &BootstrapConfig, plan: &LaunchPlan) -> Result<()> {
    let rendered = serde_yaml::to_string(&PlanView { config, plan })
        .context("Failed to render bootstrap plan")?;

    println!("\nBootstrap Plan ({}):", config.run_mode);
    println!("====================\n");
    println!("{}", rendered);
    Ok(())
}
