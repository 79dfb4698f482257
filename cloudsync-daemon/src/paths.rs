use std::path::{Path, PathBuf};

use cloudsync_core::config::config_dir_at;

pub const DAEMON_SOCKET: &str = "daemon.sock";

/// `<home>/.cloudsync/`, shared with the config file.
pub fn cloudsync_root(home: &Path) -> PathBuf {
    config_dir_at(home)
}

pub fn socket_path(home: &Path) -> PathBuf {
    cloudsync_root(home).join(DAEMON_SOCKET)
}
