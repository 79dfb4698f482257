//! Domain types shared by the sync engine, the daemon and the CLI.
//!
//! Variable values are opaque strings compared by exact equality; nothing in
//! this crate ever parses them as numbers.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Stable, externally assigned name of a synchronized variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableName(pub String);

impl VariableName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VariableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for VariableName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VariableName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Host-side address of a variable. Opaque to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableId(pub String);

impl fmt::Display for VariableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for VariableId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VariableId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Remote store modification time in Unix milliseconds.
///
/// `Timestamp::ZERO` means "never seen a remote timestamp for this name".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);

    /// Wall-clock now, in milliseconds.
    pub fn now() -> Self {
        Self(u64::try_from(Utc::now().timestamp_millis()).unwrap_or_default())
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    /// `None` for `ZERO` and for values chrono cannot represent.
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        if self.is_zero() {
            return None;
        }
        let millis = i64::try_from(self.0).ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u64> for Timestamp {
    fn from(ms: u64) -> Self {
        Self(ms)
    }
}

// ---------------------------------------------------------------------------
// Domain structs
// ---------------------------------------------------------------------------

/// One variable as reported by the host collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostVariable {
    pub id: VariableId,
    pub name: VariableName,
    pub value: String,
}

impl HostVariable {
    pub fn new(
        id: impl Into<VariableId>,
        name: impl Into<VariableName>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Engine-side record of a tracked variable (one LocalState entry).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub id: VariableId,
    pub name: VariableName,
    /// Newest value known locally. May be an optimistic, not yet confirmed write.
    pub value: String,
    /// Last remote timestamp associated with this name, `ZERO` if none.
    pub timestamp: Timestamp,
    /// Last value the remote store acknowledged or declared for this name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmed: Option<String>,
}

impl Variable {
    /// A freshly observed variable: no remote timestamp, nothing confirmed.
    pub fn observed(host: HostVariable) -> Self {
        Self {
            id: host.id,
            name: host.name,
            value: host.value,
            timestamp: Timestamp::ZERO,
            confirmed: None,
        }
    }

    /// `true` when the local value has not been acknowledged by the store.
    pub fn is_unconfirmed(&self) -> bool {
        self.confirmed.as_deref() != Some(self.value.as_str())
    }
}

/// Remote value of one variable as of one fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    pub value: String,
    #[serde(rename = "timestamp", alias = "lastModified")]
    pub last_modified: Timestamp,
}

impl RemoteEntry {
    pub fn new(value: impl Into<String>, last_modified: impl Into<Timestamp>) -> Self {
        Self {
            value: value.into(),
            last_modified: last_modified.into(),
        }
    }
}

/// Result of one full remote fetch. Consumed by the merge step that asked for it.
pub type RemoteSnapshot = BTreeMap<VariableName, RemoteEntry>;

/// One outbound write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub name: VariableName,
    pub value: String,
    /// Last known remote timestamp, for the store's optimistic-concurrency check.
    pub timestamp: Timestamp,
}

/// How the store answered a write that reached it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored. `value` and `timestamp` are the store's canonical view.
    Accepted { value: String, timestamp: Timestamp },
    /// The store holds a newer value and declared it.
    Rejected {
        server_value: String,
        server_timestamp: Timestamp,
        reason: Option<String>,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(VariableName::from("CloudScore").to_string(), "CloudScore");
        assert_eq!(VariableId::from("v-1").to_string(), "v-1");
        assert_eq!(Timestamp(42).to_string(), "42");
    }

    #[test]
    fn timestamp_ordering_and_zero() {
        assert!(Timestamp::ZERO.is_zero());
        assert!(Timestamp(2) > Timestamp(1));
        assert_eq!(Timestamp::default(), Timestamp::ZERO);
        assert!(Timestamp::ZERO.to_datetime().is_none());
        assert!(Timestamp(1_700_000_000_000).to_datetime().is_some());
    }

    #[test]
    fn unconfirmed_tracks_value_against_confirmed() {
        let mut var = Variable::observed(HostVariable::new("1", "CloudA", "5"));
        assert!(var.is_unconfirmed());
        var.confirmed = Some("5".to_string());
        assert!(!var.is_unconfirmed());
        var.value = "6".to_string();
        assert!(var.is_unconfirmed());
    }

    #[test]
    fn values_compare_as_strings_only() {
        let a = RemoteEntry::new("1.0", 1u64);
        let b = RemoteEntry::new("1", 1u64);
        assert_ne!(a, b);
    }
}
