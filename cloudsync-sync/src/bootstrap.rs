//! Bootstrap: one-time reconciliation at session start.

use std::sync::Arc;

use tokio::task::JoinSet;

use cloudsync_core::{RemoteSnapshot, VariableName};

use crate::error::SyncError;
use crate::host::Host;
use crate::outbound::SendOutcome;
use crate::remote::RemoteStore;
use crate::session::SyncSession;

/// Result of [`SyncSession::bootstrap`].
///
/// Seed writes run concurrently with whatever the caller starts next;
/// `seeds` lets the caller observe them.
#[derive(Debug)]
pub struct BootstrapReport {
    /// Names whose remote value was force-adopted.
    pub adopted: Vec<VariableName>,
    /// `false` when the snapshot fetch failed and every variable was seeded.
    pub snapshot_fetched: bool,
    pub seeds: JoinSet<(VariableName, SendOutcome)>,
}

impl BootstrapReport {
    /// Wait for every seed write and collect the outcomes.
    pub async fn finish(mut self) -> Vec<(VariableName, SendOutcome)> {
        let mut outcomes = Vec::with_capacity(self.seeds.len());
        while let Some(joined) = self.seeds.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) if err.is_cancelled() => {}
                Err(err) => tracing::error!(error = %err, "bootstrap seed task panicked"),
            }
        }
        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        outcomes
    }
}

impl<H, R> SyncSession<H, R>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    /// Establish initial agreement with the remote store.
    ///
    /// Remote wins unconditionally for every name the snapshot holds;
    /// local-only names are written to seed the store. A failed fetch is
    /// treated as an empty snapshot. An unreadable host or an empty tracked
    /// set is fatal and leaves the session uninitialized.
    pub async fn bootstrap(self: &Arc<Self>) -> Result<BootstrapReport, SyncError> {
        let observed = self.tracked().await?;
        if observed.is_empty() {
            return Err(SyncError::NoTrackedVariables {
                prefix: self.settings.name_prefix.clone(),
            });
        }

        let (snapshot, snapshot_fetched) = match self.remote.fetch_snapshot().await {
            Ok(snapshot) => (snapshot, true),
            Err(err) => {
                tracing::warn!(error = %err, "initial snapshot fetch failed, seeding every variable");
                (RemoteSnapshot::new(), false)
            }
        };

        let plan = {
            let mut local = self.local.lock();
            local.observe(observed, false, |_| false);
            local.bootstrap(&snapshot)
        };
        self.push_to_host(plan.host_updates).await;
        self.initialized
            .store(true, std::sync::atomic::Ordering::SeqCst);

        let mut seeds = JoinSet::new();
        for (name, value) in plan.seeds {
            let Some(guard) = self.pending.try_acquire(&name) else {
                continue;
            };
            let session = Arc::clone(self);
            seeds.spawn(async move {
                let outcome = session.send_acquired(guard, value).await;
                (name, outcome)
            });
        }

        tracing::info!(
            adopted = plan.adopted.len(),
            seeding = seeds.len(),
            snapshot_fetched,
            "bootstrap complete",
        );
        Ok(BootstrapReport {
            adopted: plan.adopted,
            snapshot_fetched,
            seeds,
        })
    }
}
