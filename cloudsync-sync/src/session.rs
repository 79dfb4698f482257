//! `SyncSession`: the state one monitoring session owns.
//!
//! LocalState, the PendingSet and the Coalescer buffer live here and are
//! shared by the detection tick, the remote poll and every in-flight write.
//! Locks are plain mutexes held only for synchronous sections; nothing holds
//! one across an `.await`. Lock order is `local` before `coalescer`, and the
//! PendingSet's own lock is innermost.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use cloudsync_core::{HostVariable, SyncConfig, Variable, VariableName};

use crate::coalescer::Coalescer;
use crate::error::SyncError;
use crate::host::Host;
use crate::pending::PendingSet;
use crate::remote::RemoteStore;
use crate::state::{HostUpdate, LocalState};

/// Timing and filtering knobs of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub coalesce_window: Duration,
    pub detect_interval: Duration,
    pub poll_interval: Duration,
    /// Only names starting with this are tracked. Empty tracks everything.
    pub name_prefix: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            coalesce_window: Duration::from_millis(100),
            detect_interval: Duration::from_millis(100),
            poll_interval: Duration::from_millis(1000),
            name_prefix: String::new(),
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            coalesce_window: config.coalesce_window(),
            detect_interval: config.detect_interval(),
            poll_interval: config.poll_interval(),
            name_prefix: config.name_prefix.clone(),
        }
    }

    pub fn tracks(&self, name: &VariableName) -> bool {
        name.as_str().starts_with(&self.name_prefix)
    }
}

/// Point-in-time view of a session, for the control socket and tests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub initialized: bool,
    pub closed: bool,
    pub tracked: usize,
    pub pending: Vec<VariableName>,
    pub buffered: Vec<VariableName>,
    pub variables: Vec<Variable>,
}

pub struct SyncSession<H, R> {
    pub(crate) host: H,
    pub(crate) remote: R,
    pub(crate) settings: EngineSettings,
    pub(crate) local: Mutex<LocalState>,
    pub(crate) pending: PendingSet,
    pub(crate) coalescer: Mutex<Coalescer>,
    pub(crate) initialized: AtomicBool,
    closed: AtomicBool,
}

impl<H, R> SyncSession<H, R>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    pub fn new(host: H, remote: R, settings: EngineSettings) -> Arc<Self> {
        let coalescer = Coalescer::new(settings.coalesce_window);
        Arc::new(Self {
            host,
            remote,
            settings,
            local: Mutex::new(LocalState::new()),
            pending: PendingSet::new(),
            coalescer: Mutex::new(coalescer),
            initialized: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn pending(&self) -> &PendingSet {
        &self.pending
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn variable(&self, name: &VariableName) -> Option<Variable> {
        self.local.lock().get(name).cloned()
    }

    pub fn is_buffered(&self, name: &VariableName) -> bool {
        self.coalescer.lock().contains(name)
    }

    pub fn status(&self) -> SessionStatus {
        let local = self.local.lock();
        let coalescer = self.coalescer.lock();
        SessionStatus {
            initialized: self.is_initialized(),
            closed: self.is_closed(),
            tracked: local.len(),
            pending: self.pending.names(),
            buffered: coalescer.names(),
            variables: local.iter().cloned().collect(),
        }
    }

    /// Host listing filtered to the tracked name prefix.
    pub(crate) async fn tracked(&self) -> Result<Vec<HostVariable>, SyncError> {
        let mut vars = self.host.list_tracked().await?;
        vars.retain(|var| self.settings.tracks(&var.name));
        Ok(vars)
    }

    /// Write adopted values through to the host. Failures are logged; the
    /// next detection tick sees the old host value and reconciles.
    pub(crate) async fn push_to_host(&self, updates: Vec<HostUpdate>) {
        for update in updates {
            if self.is_closed() {
                return;
            }
            match self.host.set_variable(&update.id, &update.value).await {
                Ok(()) => tracing::debug!(
                    name = %update.name,
                    value = %update.value,
                    "applied remote value to host",
                ),
                Err(err) => tracing::warn!(
                    name = %update.name,
                    error = %err,
                    "failed to apply remote value to host",
                ),
            }
        }
    }

    /// Close the session: cancel every debounce timer and forget buffered
    /// and pending names. Idempotent; returns `true` on the first call.
    pub fn shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        let dropped = self.coalescer.lock().clear();
        let in_flight = self.pending.len();
        self.pending.clear();
        tracing::info!(
            dropped_buffered = dropped,
            in_flight,
            "sync session closed",
        );
        true
    }
}
