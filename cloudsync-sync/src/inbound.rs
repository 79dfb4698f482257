//! InboundSync: the slow remote poll.

use std::collections::BTreeMap;

use cloudsync_core::{RemoteEntry, VariableName};

use crate::error::SyncError;
use crate::host::Host;
use crate::remote::RemoteStore;
use crate::session::SyncSession;
use crate::state::{HostUpdate, Merge};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollReport {
    pub fetched: usize,
    /// Names whose remote value was taken into LocalState.
    pub adopted: Vec<VariableName>,
    /// Names skipped because a local write is buffered or in flight.
    pub busy: Vec<VariableName>,
    /// Remote names the host does not track.
    pub ignored: usize,
}

impl<H, R> SyncSession<H, R>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    /// Fetch the remote snapshot and merge it into LocalState and the host.
    ///
    /// No-op until bootstrap has completed.
    pub async fn poll_remote(&self) -> Result<PollReport, SyncError> {
        if !self.is_initialized() || self.is_closed() {
            return Ok(PollReport::default());
        }
        let snapshot = self.remote.fetch_snapshot().await?;
        let mut report = PollReport {
            fetched: snapshot.len(),
            ..PollReport::default()
        };
        let mut updates = Vec::new();
        let mut untracked = BTreeMap::new();

        {
            let mut local = self.local.lock();
            let coalescer = self.coalescer.lock();
            for (name, entry) in snapshot {
                if self.pending.contains(&name) || coalescer.contains(&name) {
                    report.busy.push(name);
                    continue;
                }
                match local.merge_remote(&name, &entry) {
                    Merge::Adopted(update) => {
                        report.adopted.push(name);
                        updates.extend(update);
                    }
                    Merge::KeptLocal => {}
                    Merge::Untracked => {
                        untracked.insert(name, entry);
                    }
                }
            }
        }

        if !untracked.is_empty() {
            self.adopt_untracked(untracked, &mut report, &mut updates)
                .await;
        }

        if !report.adopted.is_empty() {
            tracing::info!(adopted = ?report.adopted, "adopted remote values");
        }
        self.push_to_host(updates).await;
        Ok(report)
    }

    /// Remote names missing from LocalState are adopted only if the host
    /// tracks them (it may have added them since the last detection tick).
    async fn adopt_untracked(
        &self,
        mut untracked: BTreeMap<VariableName, RemoteEntry>,
        report: &mut PollReport,
        updates: &mut Vec<HostUpdate>,
    ) {
        let tracked = match self.tracked().await {
            Ok(tracked) => tracked,
            Err(err) => {
                tracing::warn!(error = %err, "host listing failed during remote poll");
                report.ignored += untracked.len();
                return;
            }
        };

        let mut local = self.local.lock();
        let coalescer = self.coalescer.lock();
        for host in tracked {
            let Some(entry) = untracked.remove(&host.name) else {
                continue;
            };
            if self.pending.contains(&host.name) || coalescer.contains(&host.name) {
                report.busy.push(host.name);
                continue;
            }
            let name = host.name.clone();
            if let Merge::Adopted(update) = local.adopt_tracked(host, &entry) {
                report.adopted.push(name);
                updates.extend(update);
            }
        }
        report.ignored += untracked.len();
    }
}
