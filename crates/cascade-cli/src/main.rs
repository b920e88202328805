//! Cascade CI CLI entrypoint.

use clap::Parser;
use console::style;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod config;
mod handlers;

use commands::{Commands, GraphCommands, ManifestCommands};
use config::CliConfig;

#[derive(Parser)]
#[command(name = "cascade")]
#[command(author, version, about = "Cascade CI command-line interface", long_about = None)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true, env = "CASCADE_CONFIG")]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Exit status for a failed command: 75 (temporary failure) when retrying
/// later could succeed, 1 otherwise.
fn exit_status(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<cascade_core::Error>() {
        Some(err) if err.is_transient() => 75,
        _ => 1,
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let fmt = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Graph { command } => match command {
            GraphCommands::Validate { flow } => handlers::validate_graph(&flow)?,
            GraphCommands::Downstream { flow, builder } => handlers::downstream(&flow, &builder)?,
            GraphCommands::Schema => handlers::schema()?,
        },
        Commands::Extract(args) => {
            let config = CliConfig::load(cli.config.as_deref())?;
            handlers::extract(&config, args).await?
        }
        Commands::Manifest { command } => match command {
            ManifestCommands::Show { path } => handlers::show_manifest(&path)?,
        },
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", style("✗").red());
            ExitCode::from(exit_status(&err))
        }
    }
}
