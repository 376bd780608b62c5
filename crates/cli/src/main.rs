//! Operator CLI for pipeline-bridge.

mod commands;
mod telemetry;

use clap::{Parser, Subcommand};
use pb_core::config::load_config;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "pipeline-bridge",
    version,
    about = "Embed a remote pipeline board in a CRM page over postMessage",
    arg_required_else_help = true
)]
struct Cli {
    /// Project root containing `.pipeline-bridge/` (default: current directory).
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `pb_core=trace`. Overrides the configured level.
    #[arg(long, global = true, value_name = "LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scaffold a `.pipeline-bridge/` directory.
    Init {
        /// Overwrite an existing `.pipeline-bridge/` directory.
        #[arg(long)]
        force: bool,

        /// Only write `config.toml`.
        #[arg(long)]
        minimal: bool,

        /// Address of the remote pipeline application.
        #[arg(long, value_name = "URL")]
        remote_url: Option<String>,
    },

    /// Load and validate the configuration.
    Check,

    /// Run a handshake against an in-process remote board.
    Simulate {
        /// Number of demo deals in the host store.
        #[arg(long, default_value_t = 5)]
        deals: usize,

        /// Serve the remote board from a different origin than the host.
        #[arg(long)]
        cross_origin: bool,
    },

    /// Write TypeScript declarations for the wire protocol.
    ExportTypes {
        /// Output directory.
        #[arg(long, value_name = "DIR")]
        out: PathBuf,
    },
}

/// Flag first, then the project's configured level, then `warn`.
async fn resolve_log_level(cli: &Cli, root: &std::path::Path) -> String {
    if let Some(level) = &cli.log_level {
        return level.clone();
    }
    match load_config(root).await {
        Ok(config) => config.log_level,
        Err(_) => "warn".to_string(),
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    telemetry::init_logging(&resolve_log_level(&cli, &root).await)?;

    match cli.command {
        Commands::Init {
            force,
            minimal,
            remote_url,
        } => commands::init::run(root, remote_url, force, minimal).await,
        Commands::Check => commands::check::run(&root).await,
        Commands::Simulate {
            deals,
            cross_origin,
        } => commands::simulate::run(deals, cross_origin).await,
        Commands::ExportTypes { out } => commands::export_types::run(&out),
    }
}
