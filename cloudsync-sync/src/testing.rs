//! In-memory collaborators for driving a [`SyncSession`](crate::SyncSession)
//! without a filesystem or network.
//!
//! [`MemoryStore`] follows the HTTP store's rules: a write to an unknown
//! name first creates it as `"0"` stamped from the store clock, then the
//! write is accepted only when the client timestamp is not older than the
//! stored one. Accepted writes are stamped from the same clock.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use cloudsync_core::{
    HostVariable, RemoteEntry, RemoteSnapshot, Timestamp, VariableId, VariableName, WriteOutcome,
    WriteRequest,
};

use crate::error::SyncError;
use crate::host::Host;
use crate::remote::RemoteStore;

const CLOCK_START: u64 = 1_000;

#[derive(Debug, Default)]
struct StoreState {
    variables: RemoteSnapshot,
    clock: u64,
    writes: Vec<WriteRequest>,
    snapshot_calls: usize,
    in_flight: BTreeMap<VariableName, usize>,
    peak_in_flight: usize,
    offline: bool,
    write_delay: Duration,
}

impl StoreState {
    fn tick(&mut self) -> Timestamp {
        self.clock += 1;
        Timestamp(self.clock)
    }
}

/// Shared handle; clones observe the same store.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<StoreState>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let state = StoreState {
            clock: CLOCK_START,
            ..StoreState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn with_variable(self, name: &str, value: &str) -> Self {
        self.set_remote(name, value);
        self
    }

    /// Another client writes `value`. Returns the stamped timestamp.
    pub fn set_remote(&self, name: &str, value: &str) -> Timestamp {
        let mut state = self.state.lock();
        let timestamp = state.tick();
        state
            .variables
            .insert(VariableName::from(name), RemoteEntry::new(value, timestamp));
        timestamp
    }

    pub fn get(&self, name: &str) -> Option<RemoteEntry> {
        self.state.lock().variables.get(&VariableName::from(name)).cloned()
    }

    /// Every write request received, accepted or not, in arrival order.
    pub fn writes(&self) -> Vec<WriteRequest> {
        self.state.lock().writes.clone()
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes.len()
    }

    pub fn writes_for(&self, name: &str) -> Vec<String> {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|write| write.name.as_str() == name)
            .map(|write| write.value.clone())
            .collect()
    }

    pub fn snapshot_count(&self) -> usize {
        self.state.lock().snapshot_calls
    }

    /// Highest number of concurrent writes seen for any single name.
    pub fn peak_in_flight(&self) -> usize {
        self.state.lock().peak_in_flight
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Hold each write this long before answering.
    pub fn set_write_delay(&self, delay: Duration) {
        self.state.lock().write_delay = delay;
    }

    fn unreachable() -> SyncError {
        SyncError::Transport {
            url: "memory://store".to_string(),
            message: "store offline".to_string(),
        }
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn fetch_snapshot(&self) -> Result<RemoteSnapshot, SyncError> {
        let mut state = self.state.lock();
        state.snapshot_calls += 1;
        if state.offline {
            return Err(Self::unreachable());
        }
        Ok(state.variables.clone())
    }

    async fn write(&self, request: &WriteRequest) -> Result<WriteOutcome, SyncError> {
        let delay = {
            let mut state = self.state.lock();
            state.writes.push(request.clone());
            if state.offline {
                return Err(Self::unreachable());
            }
            let in_flight = state.in_flight.entry(request.name.clone()).or_insert(0);
            *in_flight += 1;
            let current = *in_flight;
            state.peak_in_flight = state.peak_in_flight.max(current);
            state.write_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if let Some(in_flight) = state.in_flight.get_mut(&request.name) {
            *in_flight = in_flight.saturating_sub(1);
        }
        if !state.variables.contains_key(&request.name) {
            let created = state.tick();
            state
                .variables
                .insert(request.name.clone(), RemoteEntry::new("0", created));
        }
        if let Some(current) = state.variables.get(&request.name) {
            if request.timestamp < current.last_modified {
                return Ok(WriteOutcome::Rejected {
                    server_value: current.value.clone(),
                    server_timestamp: current.last_modified,
                    reason: Some("Conflict: server has newer value".to_string()),
                });
            }
        }
        let timestamp = state.tick();
        state.variables.insert(
            request.name.clone(),
            RemoteEntry::new(request.value.clone(), timestamp),
        );
        Ok(WriteOutcome::Accepted {
            value: request.value.clone(),
            timestamp,
        })
    }
}

#[derive(Debug, Default)]
struct HostState {
    variables: BTreeMap<VariableName, HostVariable>,
    set_calls: Vec<(VariableName, String)>,
    unreachable: bool,
}

/// Host double. Variable ids equal their names.
#[derive(Debug, Clone, Default)]
pub struct MemoryHost {
    state: Arc<Mutex<HostState>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variable(self, name: &str, value: &str) -> Self {
        self.set_local(name, value);
        self
    }

    /// The user edits (or creates) a variable.
    pub fn set_local(&self, name: &str, value: &str) {
        let mut state = self.state.lock();
        let key = VariableName::from(name);
        state
            .variables
            .entry(key)
            .and_modify(|var| var.value = value.to_string())
            .or_insert_with(|| HostVariable::new(name, name, value));
    }

    pub fn remove(&self, name: &str) {
        self.state.lock().variables.remove(&VariableName::from(name));
    }

    pub fn value_of(&self, name: &str) -> Option<String> {
        self.state
            .lock()
            .variables
            .get(&VariableName::from(name))
            .map(|var| var.value.clone())
    }

    /// Every `set_variable` call made by the engine.
    pub fn set_calls(&self) -> Vec<(VariableName, String)> {
        self.state.lock().set_calls.clone()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().unreachable = unreachable;
    }
}

#[async_trait]
impl Host for MemoryHost {
    async fn list_tracked(&self) -> Result<Vec<HostVariable>, SyncError> {
        let state = self.state.lock();
        if state.unreachable {
            return Err(SyncError::Host("host unreachable".to_string()));
        }
        Ok(state.variables.values().cloned().collect())
    }

    async fn set_variable(&self, id: &VariableId, value: &str) -> Result<(), SyncError> {
        let mut state = self.state.lock();
        if state.unreachable {
            return Err(SyncError::Host("host unreachable".to_string()));
        }
        let Some(var) = state.variables.values_mut().find(|var| &var.id == id) else {
            return Err(SyncError::Host(format!("unknown variable id {}", id.0)));
        };
        var.value = value.to_string();
        let name = var.name.clone();
        state.set_calls.push((name, value.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, value: &str, timestamp: u64) -> WriteRequest {
        WriteRequest {
            name: VariableName::from(name),
            value: value.to_string(),
            timestamp: Timestamp(timestamp),
        }
    }

    #[tokio::test]
    async fn unknown_name_is_created_before_the_timestamp_check() {
        let store = MemoryStore::new();

        let outcome = store.write(&request("CloudX", "5", 0)).await.expect("write");

        assert_eq!(
            outcome,
            WriteOutcome::Rejected {
                server_value: "0".to_string(),
                server_timestamp: Timestamp(CLOCK_START + 1),
                reason: Some("Conflict: server has newer value".to_string()),
            }
        );
        assert_eq!(store.get("CloudX").map(|entry| entry.value), Some("0".to_string()));
    }

    #[tokio::test]
    async fn current_time_wins_for_unknown_name() {
        let store = MemoryStore::new();

        let outcome = store
            .write(&request("CloudX", "5", Timestamp::now().0))
            .await
            .expect("write");

        assert!(matches!(outcome, WriteOutcome::Accepted { ref value, .. } if value == "5"));
        assert_eq!(store.get("CloudX").map(|entry| entry.value), Some("5".to_string()));
    }
}
