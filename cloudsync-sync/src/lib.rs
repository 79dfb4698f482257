//! # cloudsync-sync
//!
//! Bidirectional synchronization of named variables between a host and a
//! remote key-value store.
//!
//! Build a [`SyncSession`] from a [`Host`] and a [`RemoteStore`], then hand
//! it to [`ReconciliationLoop::start`], which bootstraps and runs the
//! detection and poll tasks until [`ReconciliationLoop::shutdown`].

pub mod bootstrap;
pub mod coalescer;
pub mod detect;
pub mod engine;
pub mod error;
pub mod host;
pub mod inbound;
pub mod outbound;
pub mod pending;
pub mod remote;
pub mod session;
pub mod state;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bootstrap::BootstrapReport;
pub use coalescer::Coalescer;
pub use detect::DetectReport;
pub use engine::ReconciliationLoop;
pub use error::SyncError;
pub use host::{FileHost, Host, HostDocument};
pub use inbound::PollReport;
pub use outbound::SendOutcome;
pub use pending::{PendingGuard, PendingSet};
pub use remote::{HealthReport, HttpStore, RemoteStore};
pub use session::{EngineSettings, SessionStatus, SyncSession};
pub use state::{HostUpdate, LocalState};
