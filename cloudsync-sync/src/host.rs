//! Host collaborator seam.
//!
//! The host owns the live variables. The engine only lists them and pushes
//! adopted values back; it never assumes anything about how the host
//! addresses them beyond the opaque [`VariableId`].
//!
//! [`FileHost`] keeps the variables in a JSON document:
//!
//! ```json
//! { "variables": [ { "id": "v1", "name": "CloudScore", "value": "0" } ] }
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use cloudsync_core::{HostVariable, VariableId};

use crate::error::{io_err, SyncError};

#[async_trait]
pub trait Host: Send + Sync {
    /// Current tracked variables. Callable repeatedly; the set may change.
    async fn list_tracked(&self) -> Result<Vec<HostVariable>, SyncError>;

    /// Apply an adopted value.
    async fn set_variable(&self, id: &VariableId, value: &str) -> Result<(), SyncError>;
}

/// On-disk payload of a [`FileHost`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDocument {
    #[serde(default)]
    pub variables: Vec<HostVariable>,
}

/// Host collaborator backed by a JSON file, re-read on every listing.
#[derive(Debug, Clone)]
pub struct FileHost {
    path: PathBuf,
    /// Serializes read-modify-write cycles of `set_variable`.
    write_lock: Arc<Mutex<()>>,
}

impl FileHost {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the document. A missing file is a host error: there is nothing
    /// to synchronize without it.
    pub fn load(&self) -> Result<HostDocument, SyncError> {
        load_document(&self.path)
    }

    /// Write `document` atomically (`.tmp` + rename).
    pub fn save(&self, document: &HostDocument) -> Result<(), SyncError> {
        save_document(&self.path, document)
    }

    fn set_blocking(&self, id: &VariableId, value: &str) -> Result<(), SyncError> {
        let _guard = self.write_lock.lock();
        let mut document = load_document(&self.path)?;
        let Some(var) = document.variables.iter_mut().find(|var| &var.id == id) else {
            return Err(SyncError::Host(format!(
                "unknown variable id '{id}' in {}",
                self.path.display()
            )));
        };
        if var.value == value {
            return Ok(());
        }
        var.value = value.to_string();
        save_document(&self.path, &document)
    }
}

#[async_trait]
impl Host for FileHost {
    async fn list_tracked(&self) -> Result<Vec<HostVariable>, SyncError> {
        let host = self.clone();
        let document = tokio::task::spawn_blocking(move || host.load())
            .await
            .map_err(|err| SyncError::Join(err.to_string()))??;
        Ok(document.variables)
    }

    async fn set_variable(&self, id: &VariableId, value: &str) -> Result<(), SyncError> {
        let host = self.clone();
        let id = id.clone();
        let value = value.to_string();
        tokio::task::spawn_blocking(move || host.set_blocking(&id, &value))
            .await
            .map_err(|err| SyncError::Join(err.to_string()))?
    }
}

fn load_document(path: &Path) -> Result<HostDocument, SyncError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

fn save_document(path: &Path, document: &HostDocument) -> Result<(), SyncError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    }
    let json = serde_json::to_string_pretty(document)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn seeded(dir: &TempDir) -> FileHost {
        let host = FileHost::new(dir.path().join("variables.json"));
        host.save(&HostDocument {
            variables: vec![
                HostVariable::new("v1", "CloudScore", "0"),
                HostVariable::new("v2", "CloudLives", "3"),
            ],
        })
        .unwrap();
        host
    }

    #[tokio::test]
    async fn list_reads_current_file() {
        let dir = TempDir::new().unwrap();
        let host = seeded(&dir);
        let vars = host.list_tracked().await.unwrap();
        assert_eq!(vars.len(), 2);
        assert_eq!(vars[0].value, "0");
    }

    #[tokio::test]
    async fn set_variable_rewrites_only_that_entry() {
        let dir = TempDir::new().unwrap();
        let host = seeded(&dir);
        host.set_variable(&VariableId::from("v1"), "12").await.unwrap();

        let document = host.load().unwrap();
        assert_eq!(document.variables[0].value, "12");
        assert_eq!(document.variables[1].value, "3");
        assert!(!dir.path().join("variables.json.tmp").exists());
    }

    #[tokio::test]
    async fn unknown_id_is_a_host_error() {
        let dir = TempDir::new().unwrap();
        let host = seeded(&dir);
        let err = host
            .set_variable(&VariableId::from("nope"), "1")
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Host(_)), "got: {err}");
    }

    #[tokio::test]
    async fn missing_file_is_an_io_error_with_path() {
        let dir = TempDir::new().unwrap();
        let host = FileHost::new(dir.path().join("absent.json"));
        let err = host.list_tracked().await.unwrap_err();
        assert!(err.to_string().contains("absent.json"), "got: {err}");
    }
}
