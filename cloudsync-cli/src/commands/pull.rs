//! `cloudsync pull [--name <name>] [--json]`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use cloudsync_core::{RemoteSnapshot, Timestamp, VariableName};

use super::{format_age, RemoteArgs};

/// Read variables from the remote store.
#[derive(Args, Debug)]
pub struct PullArgs {
    /// Read a single variable. The store creates unknown names with value "0".
    #[arg(long)]
    pub name: Option<String>,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,

    #[command(flatten)]
    pub remote: RemoteArgs,
}

#[derive(Serialize)]
struct PulledVariable {
    name: VariableName,
    value: String,
    timestamp: Timestamp,
}

#[derive(Tabled)]
struct PullTableRow {
    #[tabled(rename = "name")]
    name: String,
    #[tabled(rename = "value")]
    value: String,
    #[tabled(rename = "modified")]
    modified: String,
}

impl PullArgs {
    pub fn run(self) -> Result<()> {
        let store = self.remote.store()?;

        let snapshot = match self.name {
            Some(name) => {
                let name = VariableName::from(name);
                let entry = store
                    .fetch_variable_blocking(&name)
                    .with_context(|| format!("failed to read '{name}' from {}", store.base_url()))?;
                RemoteSnapshot::from([(name, entry)])
            }
            None => store
                .fetch_snapshot_blocking()
                .with_context(|| format!("failed to read variables from {}", store.base_url()))?,
        };

        let variables: Vec<PulledVariable> = snapshot
            .into_iter()
            .map(|(name, entry)| PulledVariable {
                name,
                value: entry.value,
                timestamp: entry.last_modified,
            })
            .collect();

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&variables).context("failed to render JSON")?
            );
            return Ok(());
        }

        if variables.is_empty() {
            println!("{}", "no variables on the remote store".dimmed());
            return Ok(());
        }

        let rows: Vec<PullTableRow> = variables
            .iter()
            .map(|var| PullTableRow {
                name: var.name.to_string(),
                value: var.value.clone(),
                modified: format_age(var.timestamp),
            })
            .collect();
        println!("{}", Table::new(rows).with(Style::rounded()));
        println!(
            "{} variable(s) from {}",
            variables.len().to_string().bold(),
            store.base_url()
        );
        Ok(())
    }
}
