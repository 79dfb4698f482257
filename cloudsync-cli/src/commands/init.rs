//! `cloudsync init [--server <url>] [--variables <path>] [--prefix <prefix>] [--force]`

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Args;

use cloudsync_core::config::{self, DEFAULT_NAME_PREFIX, DEFAULT_SERVER_URL};
use cloudsync_core::SyncConfig;
use cloudsync_sync::{FileHost, HostDocument};

use super::home_dir;

/// Write the cloudsync configuration.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// Base URL of the remote store.
    #[arg(long, default_value = DEFAULT_SERVER_URL)]
    pub server: String,

    /// Variables file the daemon synchronizes. Defaults to
    /// ~/.cloudsync/variables.json
    #[arg(long, value_name = "PATH")]
    pub variables: Option<PathBuf>,

    /// Only variables whose name starts with this are synchronized.
    #[arg(long, default_value = DEFAULT_NAME_PREFIX)]
    pub prefix: String,

    /// Session key sent with every request.
    #[arg(long)]
    pub session: Option<String>,

    /// Overwrite an existing config.
    #[arg(long)]
    pub force: bool,
}

impl InitArgs {
    pub fn run(self) -> Result<()> {
        let home = home_dir()?;
        let path = config::config_path_at(&home);
        if path.exists() && !self.force {
            bail!(
                "config already exists at {} (use --force to overwrite)",
                path.display()
            );
        }

        let config = SyncConfig {
            server_url: self.server,
            session_key: self.session,
            variables_file: self.variables,
            name_prefix: self.prefix,
            ..SyncConfig::default()
        };
        let written = config::save_at(&home, &config)
            .with_context(|| format!("failed to write {}", path.display()))?;
        println!("✓ Wrote {}", written.display());

        let variables = config.variables_path(&home);
        if !variables.exists() {
            FileHost::new(variables.clone())
                .save(&HostDocument::default())
                .with_context(|| format!("failed to create {}", variables.display()))?;
            println!("✓ Created empty variables file {}", variables.display());
        }
        println!("  Remote store: {}", config.server_url);
        Ok(())
    }
}
