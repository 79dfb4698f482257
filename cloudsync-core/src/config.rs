//! YAML configuration.
//!
//! # Storage layout
//!
//! ```text
//! ~/.cloudsync/
//!   config.yaml       (mode 0600, optional; defaults when missing)
//!   variables.json    (default file-backed host)
//!   daemon.sock       (control socket while the daemon runs)
//! ```
//!
//! # API pattern
//!
//! Same as the rest of the workspace:
//! - `fn_at(home: &Path, …)` takes an explicit home and is what tests call
//! - `fn(…)` derives home from `dirs::home_dir()` and delegates to `_at`

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, ConfigError};

pub const CONFIG_FILE: &str = "config.yaml";
pub const DEFAULT_VARIABLES_FILE: &str = "variables.json";
pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";
pub const DEFAULT_NAME_PREFIX: &str = "Cloud";

/// Session configuration shared by the daemon and the CLI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Base URL of the remote store.
    pub server_url: String,
    /// Optional session/project key sent with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    /// File-backed host; `None` means `<home>/.cloudsync/variables.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables_file: Option<PathBuf>,
    /// Only names with this prefix are tracked. Empty tracks everything.
    pub name_prefix: String,
    pub coalesce_window_ms: u64,
    pub detect_interval_ms: u64,
    pub poll_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            session_key: None,
            variables_file: None,
            name_prefix: DEFAULT_NAME_PREFIX.to_string(),
            coalesce_window_ms: 100,
            detect_interval_ms: 100,
            poll_interval_ms: 1000,
            request_timeout_ms: 5000,
        }
    }
}

impl SyncConfig {
    pub fn coalesce_window(&self) -> Duration {
        Duration::from_millis(self.coalesce_window_ms)
    }

    pub fn detect_interval(&self) -> Duration {
        Duration::from_millis(self.detect_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolved path of the file-backed host.
    pub fn variables_path(&self, home: &Path) -> PathBuf {
        self.variables_file
            .clone()
            .unwrap_or_else(|| config_dir_at(home).join(DEFAULT_VARIABLES_FILE))
    }

    /// Reject values that would make the engine spin or never converge.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "server_url",
                reason: "must not be empty".to_string(),
            });
        }
        for (field, value) in [
            ("detect_interval_ms", self.detect_interval_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("request_timeout_ms", self.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// `<home>/.cloudsync/`
pub fn config_dir_at(home: &Path) -> PathBuf {
    home.join(".cloudsync")
}

/// `<home>/.cloudsync/config.yaml`
pub fn config_path_at(home: &Path) -> PathBuf {
    config_dir_at(home).join(CONFIG_FILE)
}

// ---------------------------------------------------------------------------
// Load / save
// ---------------------------------------------------------------------------

/// Load the config under `home`. A missing file yields defaults.
pub fn load_at(home: &Path) -> Result<SyncConfig, ConfigError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(SyncConfig::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    let config: SyncConfig = if contents.trim().is_empty() {
        SyncConfig::default()
    } else {
        serde_yaml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?
    };
    config.validate()?;
    Ok(config)
}

/// [`load_at`] using the current user's home directory.
pub fn load() -> Result<SyncConfig, ConfigError> {
    load_at(&home()?)
}

/// Save atomically: serialize → `config.yaml.tmp` → `chmod 0600` → rename.
pub fn save_at(home: &Path, config: &SyncConfig) -> Result<PathBuf, ConfigError> {
    config.validate()?;
    let dir = config_dir_at(home);
    std::fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;

    let path = config_path_at(home);
    let tmp = dir.join(format!("{CONFIG_FILE}.tmp"));
    let yaml = serde_yaml::to_string(config)?;
    std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(path)
}

/// [`save_at`] using the current user's home directory.
pub fn save(config: &SyncConfig) -> Result<PathBuf, ConfigError> {
    save_at(&home()?, config)
}

fn home() -> Result<PathBuf, ConfigError> {
    dirs::home_dir().ok_or(ConfigError::HomeNotFound)
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), ConfigError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), ConfigError> {
    Ok(())
}
