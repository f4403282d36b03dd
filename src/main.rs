use anyhow::Result;
use clap::{Parser, Subcommand};

mod cluster;
mod commands;
mod config;
mod environment;
mod errors;
mod logging;
mod output;
mod provider;
mod provision;
mod resolver;
mod ssh;

use commands::{EnvFlags, OsCommands, ProvisionFlags};

#[derive(Parser)]
#[command(name = "holodeck")]
#[command(version)]
#[command(about = "Declarative GPU-ready Kubernetes test environments over SSH")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect the supported operating systems
    Os {
        #[command(subcommand)]
        command: OsCommands,
    },
    /// Create the cloud resources for an environment
    Create(EnvFlags),
    /// Provision an environment into a running cluster
    Provision(ProvisionFlags),
    /// Tear an environment down
    Delete(EnvFlags),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result: Result<()> = match cli.command {
        Commands::Os { command } => commands::os(command),
        Commands::Create(flags) => commands::create(flags).await,
        Commands::Provision(flags) => commands::provision(flags).await,
        Commands::Delete(flags) => commands::delete(flags).await,
    };

    if let Err(error) = result {
        eprintln!("Error: {error:#}");
        std::process::exit(1);
    }
}
