//! `cloudsync check`

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;

use super::RemoteArgs;

/// Check that the remote store is reachable.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub remote: RemoteArgs,
}

impl CheckArgs {
    pub fn run(self) -> Result<()> {
        let store = self.remote.store()?;
        let health = store
            .health_blocking()
            .with_context(|| format!("remote store at {} is unreachable", store.base_url()))?;

        let status = if health.status == "ok" {
            health.status.green()
        } else {
            health.status.yellow()
        };
        println!("{} {status}", store.base_url().bold());
        if let Some(uptime) = health.uptime {
            println!("  uptime: {uptime}");
        }
        Ok(())
    }
}
