//! `cloudsync push <name> <value> [--timestamp <ms>]`

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use cloudsync_core::{RemoteSnapshot, Timestamp, VariableName, WriteOutcome, WriteRequest};

use super::{format_age, RemoteArgs};

/// Write one variable to the remote store.
#[derive(Args, Debug)]
pub struct PushArgs {
    pub name: String,

    pub value: String,

    /// Last remote timestamp the write is based on, in Unix milliseconds.
    /// Defaults to the store's current timestamp for the name, or the
    /// current time for a name the store does not have yet.
    #[arg(long, value_name = "MS")]
    pub timestamp: Option<u64>,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl PushArgs {
    pub fn run(self) -> Result<()> {
        let store = self.remote.store()?;
        let name = VariableName::from(self.name);

        let timestamp = match self.timestamp {
            Some(ms) => Timestamp(ms),
            None => {
                let snapshot = store.fetch_snapshot_blocking().with_context(|| {
                    format!("failed to read variables from {}", store.base_url())
                })?;
                base_timestamp(&snapshot, &name)
            }
        };

        let request = WriteRequest {
            name: name.clone(),
            value: self.value,
            timestamp,
        };
        let outcome = store
            .write_blocking(&request)
            .with_context(|| format!("failed to write '{name}' to {}", store.base_url()))?;

        match outcome {
            WriteOutcome::Accepted { value, timestamp } => {
                println!(
                    "{} {} = {} (timestamp {timestamp})",
                    "✓".green(),
                    name.to_string().bold(),
                    value
                );
                Ok(())
            }
            WriteOutcome::Rejected {
                server_value,
                server_timestamp,
                reason,
            } => {
                println!(
                    "{} {} kept server value {} (modified {}, timestamp {server_timestamp})",
                    "✗".red(),
                    name.to_string().bold(),
                    server_value.yellow(),
                    format_age(server_timestamp),
                );
                bail!(
                    "write rejected: {}",
                    reason.unwrap_or_else(|| "server has a newer value".to_string())
                )
            }
        }
    }
}

/// The store creates unknown names before comparing timestamps, so a write
/// for one must carry the current time to be accepted.
fn base_timestamp(snapshot: &RemoteSnapshot, name: &VariableName) -> Timestamp {
    snapshot
        .get(name)
        .map(|entry| entry.last_modified)
        .filter(|timestamp| !timestamp.is_zero())
        .unwrap_or_else(Timestamp::now)
}
