mod cli;
mod commands;
mod output;

use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use devhost::{Error as DevhostError, Orchestrator, Parser as ConfigParser};
use output::UserOutput;
use std::path::{Path, PathBuf};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        let out = output::CliOutput;
        if let Some(devhost_error) = e.downcast_ref::<DevhostError>() {
            out.error(&format!("Error: {}", devhost_error));
            if let Some(suggestion) = devhost_error.suggestion() {
                eprintln!("\nHint: {}", suggestion);
            }
        } else {
            out.error(&format!("Error: {:#}", e));
        }
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing()?;

    let out = output::CliOutput;

    // ── Commands that need no orchestrator ───────────────────────────
    match &cli.command {
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            clap_complete::generate(*shell, &mut cmd, bin_name, &mut std::io::stdout());
            return Ok(());
        }
        Commands::Validate => {
            return commands::run_validate(cli.config.clone(), &out);
        }
        _ => {}
    }

    let parser = ConfigParser::new();
    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => parser.find_config_file()?,
    };
    let config = parser.load_config(&config_path)?;
    tracing::debug!("Loaded config from {}", config_path.display());

    let orchestrator = Orchestrator::builder()
        .config(config)
        .work_dir(config_dir(&config_path))
        .build()?;

    match cli.command {
        Commands::List {
            json,
            changes,
            reconcile,
        } => commands::run_list(&orchestrator, json, changes, reconcile, &out).await,
        Commands::Start { project, json } => {
            commands::run_start(&orchestrator, &project, json, &out).await
        }
        Commands::Stop { project } => commands::run_stop(&orchestrator, &project, &out).await,
        Commands::Reconcile { json } => commands::run_reconcile(&orchestrator, json, &out).await,
        Commands::Changes { project, json } => {
            commands::run_changes(&orchestrator, &project, json, &out).await
        }
        Commands::Scan { json } => commands::run_scan(&orchestrator, json, &out).await,
        Commands::Completions { .. } | Commands::Validate => Ok(()),
    }
}

/// Directory holding the config file; the state directory is relative to it.
fn config_dir(config_path: &Path) -> PathBuf {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))
}
