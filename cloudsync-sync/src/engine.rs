//! ReconciliationLoop: bootstrap, the two periodic tasks, shutdown.
//!
//! Delivery is best-effort. A failed write is not retried on a timer; the
//! next detection tick sees the value is still unconfirmed and sends it
//! again. Ticks never propagate errors, so one bad cycle cannot stop the
//! loop.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use cloudsync_core::VariableName;

use crate::error::SyncError;
use crate::host::Host;
use crate::outbound::SendOutcome;
use crate::remote::RemoteStore;
use crate::session::SyncSession;

pub struct ReconciliationLoop<H, R> {
    session: Arc<SyncSession<H, R>>,
    shutdown_tx: broadcast::Sender<()>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<H, R> ReconciliationLoop<H, R>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    /// Bootstrap `session`, then start the detection and poll tasks.
    ///
    /// Bootstrap errors are returned and no task is started.
    pub async fn start(session: Arc<SyncSession<H, R>>) -> Result<Self, SyncError> {
        let report = session.bootstrap().await?;
        let (shutdown_tx, _) = broadcast::channel::<()>(4);

        let seeds = tokio::spawn(drain_seeds(report.seeds));

        let detect = {
            let session = Arc::clone(&session);
            let period = session.settings().detect_interval;
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(detect_task(session, period, shutdown_rx))
        };

        let poll = {
            let session = Arc::clone(&session);
            let period = session.settings().poll_interval;
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(poll_task(session, period, shutdown_rx))
        };

        Ok(Self {
            session,
            shutdown_tx,
            tasks: Mutex::new(vec![seeds, detect, poll]),
        })
    }

    pub fn session(&self) -> &Arc<SyncSession<H, R>> {
        &self.session
    }

    /// Stop both periodic tasks, cancel debounce timers and clear the
    /// PendingSet. Safe to call more than once.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.session.shutdown();
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            task.abort();
            if let Err(err) = task.await {
                if !err.is_cancelled() {
                    tracing::error!(error = %err, "sync task failed during shutdown");
                }
            }
        }
    }
}

async fn detect_task<H, R>(
    session: Arc<SyncSession<H, R>>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                if let Err(err) = session.detect_changes().await {
                    tracing::warn!(error = %err, "local change detection failed");
                }
            }
        }
    }
}

async fn poll_task<H, R>(
    session: Arc<SyncSession<H, R>>,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Bootstrap just fetched a snapshot; skip the immediate first tick.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                match session.poll_remote().await {
                    Ok(report) => tracing::debug!(
                        fetched = report.fetched,
                        adopted = report.adopted.len(),
                        busy = report.busy.len(),
                        "remote poll complete",
                    ),
                    Err(err) => tracing::warn!(error = %err, "remote poll failed"),
                }
            }
        }
    }
}

async fn drain_seeds(mut seeds: JoinSet<(VariableName, SendOutcome)>) {
    while let Some(joined) = seeds.join_next().await {
        match joined {
            Ok((name, outcome)) => {
                tracing::debug!(name = %name, outcome = ?outcome, "bootstrap seed finished")
            }
            Err(err) if err.is_cancelled() => {}
            Err(err) => tracing::error!(error = %err, "bootstrap seed task panicked"),
        }
    }
}
