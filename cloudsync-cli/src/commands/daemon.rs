//! `cloudsync daemon` — run the sync daemon and talk to it over its socket.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use serde_json::Value;
use tabled::{settings::Style, Table, Tabled};

use cloudsync_core::Timestamp;
use cloudsync_daemon::paths::socket_path;
use cloudsync_daemon::{request_status, request_stop, start_blocking, DaemonError};

use super::{format_age, home_dir};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground.
    Start,
    /// Request graceful daemon shutdown over the control socket.
    Stop,
    /// Query daemon status over the control socket.
    Status(DaemonStatusArgs),
}

#[derive(Args, Debug)]
pub struct DaemonStatusArgs {
    /// Emit the raw status JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct VariableRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "value")]
    value: String,
    #[tabled(rename = "confirmed")]
    confirmed: String,
    #[tabled(rename = "remote modified")]
    modified: String,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start => {
            start_blocking(&home).context("daemon exited with error")?;
        }
        DaemonCommand::Stop => match request_stop(&home) {
            Ok(()) => println!("daemon stop requested"),
            Err(DaemonError::DaemonNotRunning { .. }) => {
                println!("daemon is not running");
            }
            Err(err) => return Err(err).context("failed to stop daemon"),
        },
        DaemonCommand::Status(args) => {
            let status = match request_status(&home) {
                Ok(status) => status,
                Err(DaemonError::DaemonNotRunning { .. }) => serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                }),
                Err(err) => return Err(err).context("failed to query daemon status"),
            };
            if args.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render daemon status JSON")?
                );
            } else {
                print_status(&status);
            }
        }
    }

    Ok(())
}

fn print_status(status: &Value) {
    if status["running"] != Value::Bool(true) {
        println!("{}", "daemon is not running".yellow());
        return;
    }

    println!(
        "{} syncing with {}",
        "●".green(),
        status["server_url"].as_str().unwrap_or("?").bold()
    );
    println!(
        "  tracked: {}  pending: {}  buffered: {}",
        status["tracked"],
        list_len(&status["pending"]),
        list_len(&status["buffered"]),
    );

    let rows: Vec<VariableRow> = status["variables"]
        .as_array()
        .map(|vars| vars.iter().map(variable_row).collect())
        .unwrap_or_default();
    if !rows.is_empty() {
        println!("{}", Table::new(rows).with(Style::rounded()));
    }
}

fn variable_row(var: &Value) -> VariableRow {
    let value = var["value"].as_str().unwrap_or_default().to_string();
    let confirmed = match var["confirmed"].as_str() {
        Some(confirmed) if confirmed == value => "yes".to_string(),
        Some(confirmed) => format!("no (remote: {confirmed})"),
        None => "no".to_string(),
    };
    VariableRow {
        name: var["name"].as_str().unwrap_or_default().to_string(),
        value,
        confirmed,
        modified: format_age(Timestamp(var["timestamp"].as_u64().unwrap_or_default())),
    }
}

fn list_len(value: &Value) -> usize {
    value.as_array().map(Vec::len).unwrap_or_default()
}
