//! Cloudsync core library: domain types, configuration, errors.
//!
//! - [`types`] — newtypes and the variable data model
//! - [`config`] — `~/.cloudsync/config.yaml` load / save
//! - [`error`] — [`ConfigError`]

pub mod config;
pub mod error;
pub mod types;

pub use config::SyncConfig;
pub use error::ConfigError;
pub use types::{
    HostVariable, RemoteEntry, RemoteSnapshot, Timestamp, Variable, VariableId, VariableName,
    WriteOutcome, WriteRequest,
};
