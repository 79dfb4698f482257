pub mod check;
pub mod daemon;
pub mod init;
pub mod pull;
pub mod push;

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Args;

use cloudsync_core::{config, SyncConfig, Timestamp};
use cloudsync_sync::HttpStore;

pub(crate) fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("could not determine home directory")
}

/// Remote store selection shared by the one-shot commands.
#[derive(Args, Debug, Default)]
pub struct RemoteArgs {
    /// Use this store instead of the configured `server_url`.
    #[arg(long, value_name = "URL")]
    pub server: Option<String>,
}

impl RemoteArgs {
    /// Config under the user's home with the `--server` override applied.
    pub(crate) fn load_config(&self) -> Result<SyncConfig> {
        let home = home_dir()?;
        let mut config = config::load_at(&home).with_context(|| {
            format!(
                "failed to load {}",
                config::config_path_at(&home).display()
            )
        })?;
        if let Some(server) = &self.server {
            config.server_url = server.clone();
        }
        Ok(config)
    }

    pub(crate) fn store(&self) -> Result<HttpStore> {
        Ok(HttpStore::from_config(&self.load_config()?))
    }
}

/// "42s ago", "3m ago", "never".
pub(crate) fn format_age(timestamp: Timestamp) -> String {
    let Some(at) = timestamp.to_datetime() else {
        return "never".to_string();
    };
    let seconds = Utc::now().signed_duration_since(at).num_seconds().max(0);
    let age = match seconds {
        s if s < 60 => format!("{s}s"),
        s if s < 60 * 60 => format!("{}m", s / 60),
        s if s < 60 * 60 * 24 => format!("{}h", s / (60 * 60)),
        s => format!("{}d", s / (60 * 60 * 24)),
    };
    format!("{age} ago")
}
