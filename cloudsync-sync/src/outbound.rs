//! OutboundSync: one write per call, at most one in flight per name.

use cloudsync_core::{Timestamp, VariableName, WriteOutcome, WriteRequest};

use crate::host::Host;
use crate::pending::PendingGuard;
use crate::remote::RemoteStore;
use crate::session::SyncSession;

/// What happened to one send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    /// Nothing was sent: a write for the name was already in flight, or the
    /// session is closed.
    Skipped,
    /// The store accepted the write.
    Accepted { value: String, timestamp: Timestamp },
    /// The store rejected the write. `adopted` tells whether its value
    /// replaced ours.
    Conflict {
        adopted: bool,
        server_value: String,
        server_timestamp: Timestamp,
    },
    /// Transport failure. LocalState keeps the optimistic value.
    Failed,
}

impl<H, R> SyncSession<H, R>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    /// Send `value` for `name` unless a write for it is already in flight.
    pub async fn send(&self, name: &VariableName, value: String) -> SendOutcome {
        if self.is_closed() {
            return SendOutcome::Skipped;
        }
        let Some(guard) = self.pending.try_acquire(name) else {
            tracing::debug!(name = %name, "write already in flight, skipping send");
            return SendOutcome::Skipped;
        };
        self.send_acquired(guard, value).await
    }

    /// Send with the PendingSet slot already claimed. The slot is released
    /// when `guard` drops at the end of this call, whatever the outcome.
    pub(crate) async fn send_acquired(&self, guard: PendingGuard, value: String) -> SendOutcome {
        let name = guard.name().clone();
        if self.is_closed() {
            return SendOutcome::Skipped;
        }

        let timestamp = self.local.lock().write_timestamp(&name);
        let request = WriteRequest {
            name: name.clone(),
            value,
            timestamp,
        };
        let result = self.remote.write(&request).await;
        if self.is_closed() {
            tracing::debug!(name = %name, "session closed while writing, discarding response");
            return SendOutcome::Skipped;
        }

        match result {
            Ok(WriteOutcome::Accepted { value, timestamp }) => {
                let update =
                    self.local
                        .lock()
                        .apply_accepted(&name, &request.value, &value, timestamp);
                tracing::debug!(name = %name, value = %value, timestamp = %timestamp, "write accepted");
                self.push_to_host(update.into_iter().collect()).await;
                SendOutcome::Accepted { value, timestamp }
            }
            Ok(WriteOutcome::Rejected {
                server_value,
                server_timestamp,
                reason,
            }) => {
                let conflict =
                    self.local
                        .lock()
                        .apply_rejected(&name, &server_value, server_timestamp);
                tracing::warn!(
                    name = %name,
                    sent = %request.value,
                    server_value = %server_value,
                    server_timestamp = %server_timestamp,
                    adopted = conflict.adopted,
                    reason = reason.as_deref().unwrap_or(""),
                    "write rejected by remote store",
                );
                self.push_to_host(conflict.host_update.into_iter().collect())
                    .await;
                SendOutcome::Conflict {
                    adopted: conflict.adopted,
                    server_value,
                    server_timestamp,
                }
            }
            Err(err) => {
                tracing::warn!(name = %name, error = %err, "write failed, will retry on a later tick");
                SendOutcome::Failed
            }
        }
    }
}
