//! Local change detection: the fast tick.
//!
//! The host offers no change notifications, so each tick snapshots the
//! host's variables and diffs them against LocalState.

use std::sync::Arc;

use cloudsync_core::VariableName;

use crate::error::SyncError;
use crate::host::Host;
use crate::remote::RemoteStore;
use crate::session::SyncSession;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DetectReport {
    pub observed: usize,
    /// Names routed to the Coalescer this tick.
    pub scheduled: Vec<VariableName>,
}

impl<H, R> SyncSession<H, R>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    /// Read the host, update LocalState and schedule sends for changes.
    ///
    /// Before bootstrap completes, changes are recorded but never scheduled.
    pub async fn detect_changes(self: &Arc<Self>) -> Result<DetectReport, SyncError> {
        if self.is_closed() {
            return Ok(DetectReport::default());
        }
        let observed = self.tracked().await?;
        let count = observed.len();
        let propagate = self.is_initialized();

        let changes = {
            let mut local = self.local.lock();
            let coalescer = self.coalescer.lock();
            let pending = &self.pending;
            local.observe(observed, propagate, |name| {
                pending.contains(name) || coalescer.contains(name)
            })
        };

        let mut report = DetectReport {
            observed: count,
            scheduled: Vec::with_capacity(changes.len()),
        };
        for (name, value) in changes {
            tracing::debug!(name = %name, value = %value, "local change detected");
            report.scheduled.push(name.clone());
            self.schedule(name, value);
        }
        Ok(report)
    }
}
