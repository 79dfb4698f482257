//! Cloudsync: cloud variable synchronization CLI.
//!
//! # Usage
//!
//! ```text
//! cloudsync init [--server <url>] [--variables <path>] [--prefix <prefix>] [--force]
//! cloudsync pull [--name <name>] [--json]
//! cloudsync push <name> <value> [--timestamp <ms>]
//! cloudsync check
//! cloudsync daemon start|stop|status
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    check::CheckArgs, daemon::DaemonCommand, init::InitArgs, pull::PullArgs, push::PushArgs,
};

#[derive(Parser, Debug)]
#[command(
    name = "cloudsync",
    version,
    about = "Keep cloud variables in sync between a host and a remote store",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write ~/.cloudsync/config.yaml.
    Init(InitArgs),

    /// Read variables from the remote store.
    Pull(PullArgs),

    /// Write one variable to the remote store.
    Push(PushArgs),

    /// Check that the remote store is reachable.
    Check(CheckArgs),

    /// Run or control the background sync daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => args.run(),
        Commands::Pull(args) => args.run(),
        Commands::Push(args) => args.run(),
        Commands::Check(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
