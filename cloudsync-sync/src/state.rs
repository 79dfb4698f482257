//! LocalState: the engine's working set of tracked variables.
//!
//! Every function here is synchronous and side-effect free apart from the
//! map itself. Host writes that a merge requires are returned as
//! [`HostUpdate`]s for the caller to apply after releasing the lock.
//!
//! Timestamp rules:
//! - bootstrap adopts the remote value unconditionally;
//! - a write conflict adopts the store's value only when its timestamp is
//!   strictly newer than ours;
//! - an inbound poll adopts when the remote timestamp is `>=` ours, except
//!   that an equal timestamp never replaces an unconfirmed local write.

use std::collections::{BTreeMap, BTreeSet};

use cloudsync_core::{
    HostVariable, RemoteEntry, RemoteSnapshot, Timestamp, Variable, VariableId, VariableName,
};

/// A value the host collaborator must be told about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUpdate {
    pub id: VariableId,
    pub name: VariableName,
    pub value: String,
}

/// What [`LocalState::bootstrap`] decided.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BootstrapPlan {
    /// Names whose remote value was force-adopted.
    pub adopted: Vec<VariableName>,
    /// Remote values that differ from what the host currently shows.
    pub host_updates: Vec<HostUpdate>,
    /// Local-only variables that must be written to seed the store.
    pub seeds: Vec<(VariableName, String)>,
}

/// Result of merging one remote entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Merge {
    /// Remote value taken; `Some` when the host must change.
    Adopted(Option<HostUpdate>),
    /// Local state is newer, or holds an unconfirmed write at the same timestamp.
    KeptLocal,
    /// The name is not in LocalState.
    Untracked,
}

/// Result of applying a write conflict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conflict {
    pub adopted: bool,
    pub host_update: Option<HostUpdate>,
}

#[derive(Debug, Default, Clone)]
pub struct LocalState {
    vars: BTreeMap<VariableName, Variable>,
}

impl LocalState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &VariableName) -> Option<&Variable> {
        self.vars.get(name)
    }

    pub fn contains(&self, name: &VariableName) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.vars.values()
    }

    /// Last known remote timestamp, `ZERO` for unknown names.
    pub fn timestamp_of(&self, name: &VariableName) -> Timestamp {
        self.vars
            .get(name)
            .map(|var| var.timestamp)
            .unwrap_or_default()
    }

    /// Timestamp to send with a write for `name`.
    ///
    /// The store creates an unknown name as `"0"` stamped with its own
    /// clock before comparing, so a name with no known remote timestamp is
    /// sent with the wall clock instead of `ZERO`.
    pub fn write_timestamp(&self, name: &VariableName) -> Timestamp {
        let known = self.timestamp_of(name);
        if known.is_zero() {
            Timestamp::now()
        } else {
            known
        }
    }

    /// Diff the host's current variables against LocalState.
    ///
    /// Names the host no longer reports are dropped. Changed values are
    /// recorded optimistically. When `propagate` is set, returns the
    /// `(name, value)` pairs that must go to the Coalescer: new names,
    /// changed values, and unconfirmed values for which `busy` says nothing
    /// is buffered or in flight.
    pub fn observe(
        &mut self,
        observed: Vec<HostVariable>,
        propagate: bool,
        mut busy: impl FnMut(&VariableName) -> bool,
    ) -> Vec<(VariableName, String)> {
        let mut seen = BTreeSet::new();
        let mut changes = Vec::new();

        for host in observed {
            seen.insert(host.name.clone());
            match self.vars.get_mut(&host.name) {
                None => {
                    let var = Variable::observed(host);
                    if propagate {
                        changes.push((var.name.clone(), var.value.clone()));
                    }
                    self.vars.insert(var.name.clone(), var);
                }
                Some(var) => {
                    var.id = host.id;
                    if var.value != host.value {
                        var.value = host.value;
                        if propagate {
                            changes.push((var.name.clone(), var.value.clone()));
                        }
                    } else if propagate && var.is_unconfirmed() && !busy(&var.name) {
                        changes.push((var.name.clone(), var.value.clone()));
                    }
                }
            }
        }

        self.vars.retain(|name, _| seen.contains(name));
        changes
    }

    /// Initial reconciliation: remote wins unconditionally for every name it
    /// knows; everything else is returned as a seed write.
    pub fn bootstrap(&mut self, snapshot: &RemoteSnapshot) -> BootstrapPlan {
        let mut plan = BootstrapPlan::default();
        for var in self.vars.values_mut() {
            match snapshot.get(&var.name) {
                Some(entry) => {
                    if let Some(update) = adopt(var, entry) {
                        plan.host_updates.push(update);
                    }
                    plan.adopted.push(var.name.clone());
                }
                None => plan.seeds.push((var.name.clone(), var.value.clone())),
            }
        }
        plan
    }

    /// Merge one entry of a periodic remote poll.
    pub fn merge_remote(&mut self, name: &VariableName, entry: &RemoteEntry) -> Merge {
        let Some(var) = self.vars.get_mut(name) else {
            return Merge::Untracked;
        };
        let newer = entry.last_modified > var.timestamp;
        let same_age = entry.last_modified == var.timestamp;
        if newer || (same_age && !var.is_unconfirmed()) {
            Merge::Adopted(adopt(var, entry))
        } else {
            Merge::KeptLocal
        }
    }

    /// Merge a remote entry for a variable the host tracks but LocalState
    /// has not recorded yet.
    pub fn adopt_tracked(&mut self, host: HostVariable, entry: &RemoteEntry) -> Merge {
        if self.vars.contains_key(&host.name) {
            let name = host.name.clone();
            return self.merge_remote(&name, entry);
        }
        let mut var = Variable::observed(host);
        let update = adopt(&mut var, entry);
        self.vars.insert(var.name.clone(), var);
        Merge::Adopted(update)
    }

    /// The store accepted `sent`; `canonical`/`timestamp` is what it stored.
    ///
    /// A newer local edit made while the write was in flight is kept; it is
    /// still unconfirmed and the next detection tick sends it.
    pub fn apply_accepted(
        &mut self,
        name: &VariableName,
        sent: &str,
        canonical: &str,
        timestamp: Timestamp,
    ) -> Option<HostUpdate> {
        let var = self.vars.get_mut(name)?;
        var.timestamp = timestamp;
        var.confirmed = Some(canonical.to_string());
        if var.value == sent && var.value != canonical {
            var.value = canonical.to_string();
            return Some(host_update(var));
        }
        None
    }

    /// The store rejected a write and declared its own state.
    ///
    /// A strictly newer server timestamp wins over the pending local write.
    pub fn apply_rejected(
        &mut self,
        name: &VariableName,
        server_value: &str,
        server_timestamp: Timestamp,
    ) -> Conflict {
        let Some(var) = self.vars.get_mut(name) else {
            return Conflict {
                adopted: false,
                host_update: None,
            };
        };
        if server_timestamp > var.timestamp {
            let entry = RemoteEntry::new(server_value, server_timestamp);
            Conflict {
                adopted: true,
                host_update: adopt(var, &entry),
            }
        } else {
            Conflict {
                adopted: false,
                host_update: None,
            }
        }
    }
}

fn adopt(var: &mut Variable, entry: &RemoteEntry) -> Option<HostUpdate> {
    let changed = var.value != entry.value;
    var.value = entry.value.clone();
    var.timestamp = entry.last_modified;
    var.confirmed = Some(entry.value.clone());
    changed.then(|| host_update(var))
}

fn host_update(var: &Variable) -> HostUpdate {
    HostUpdate {
        id: var.id.clone(),
        name: var.name.clone(),
        value: var.value.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str, value: &str) -> HostVariable {
        HostVariable::new(format!("id-{name}"), name, value)
    }

    fn name(s: &str) -> VariableName {
        VariableName::from(s)
    }

    fn idle(_: &VariableName) -> bool {
        false
    }

    fn confirmed_state(value: &str, ts: u64) -> LocalState {
        let mut state = LocalState::new();
        state.observe(vec![host("CloudScore", value)], false, idle);
        let mut snapshot = RemoteSnapshot::new();
        snapshot.insert(name("CloudScore"), RemoteEntry::new(value, ts));
        state.bootstrap(&snapshot);
        state
    }

    #[test]
    fn observe_before_init_records_without_propagating() {
        let mut state = LocalState::new();
        let changes = state.observe(vec![host("CloudScore", "0")], false, idle);
        assert!(changes.is_empty());
        let var = state.get(&name("CloudScore")).unwrap();
        assert_eq!(var.timestamp, Timestamp::ZERO);
        assert_eq!(var.value, "0");
    }

    #[test]
    fn write_timestamp_uses_wall_clock_for_unknown_names() {
        let mut state = LocalState::new();
        state.observe(vec![host("CloudNew", "5")], false, idle);
        let before = Timestamp::now();
        assert!(state.write_timestamp(&name("CloudNew")) >= before);
        assert!(state.write_timestamp(&name("CloudMissing")) >= before);

        let state = confirmed_state("0", 10);
        assert_eq!(state.write_timestamp(&name("CloudScore")), Timestamp(10));
    }

    #[test]
    fn observe_new_and_changed_values_propagate_after_init() {
        let mut state = confirmed_state("0", 10);
        let changes = state.observe(
            vec![host("CloudScore", "1"), host("CloudLives", "3")],
            true,
            idle,
        );
        assert_eq!(
            changes,
            vec![
                (name("CloudScore"), "1".to_string()),
                (name("CloudLives"), "3".to_string()),
            ]
        );
        assert_eq!(state.get(&name("CloudScore")).unwrap().value, "1");
    }

    #[test]
    fn observe_reschedules_unconfirmed_value_only_when_idle() {
        let mut state = confirmed_state("0", 10);
        state.observe(vec![host("CloudScore", "1")], true, idle);

        let busy = state.observe(vec![host("CloudScore", "1")], true, |_| true);
        assert!(busy.is_empty());

        let retry = state.observe(vec![host("CloudScore", "1")], true, idle);
        assert_eq!(retry, vec![(name("CloudScore"), "1".to_string())]);
    }

    #[test]
    fn observe_drops_names_the_host_no_longer_reports() {
        let mut state = LocalState::new();
        state.observe(vec![host("CloudA", "1"), host("CloudB", "2")], false, idle);
        state.observe(vec![host("CloudA", "1")], false, idle);
        assert!(state.contains(&name("CloudA")));
        assert!(!state.contains(&name("CloudB")));
    }

    #[test]
    fn bootstrap_adopts_remote_and_seeds_local_only() {
        let mut state = LocalState::new();
        state.observe(vec![host("CloudScore", "0"), host("CloudX", "5")], false, idle);
        let mut snapshot = RemoteSnapshot::new();
        snapshot.insert(name("CloudScore"), RemoteEntry::new("42", 900u64));

        let plan = state.bootstrap(&snapshot);

        assert_eq!(plan.adopted, vec![name("CloudScore")]);
        assert_eq!(plan.seeds, vec![(name("CloudX"), "5".to_string())]);
        assert_eq!(plan.host_updates.len(), 1);
        assert_eq!(plan.host_updates[0].value, "42");
        let score = state.get(&name("CloudScore")).unwrap();
        assert_eq!(score.timestamp, Timestamp(900));
        assert_eq!(score.confirmed.as_deref(), Some("42"));
    }

    #[test]
    fn merge_same_value_twice_mutates_host_once() {
        let mut state = confirmed_state("0", 10);
        let entry = RemoteEntry::new("7", 20u64);

        let first = state.merge_remote(&name("CloudScore"), &entry);
        let second = state.merge_remote(&name("CloudScore"), &entry);

        assert!(matches!(first, Merge::Adopted(Some(_))));
        assert_eq!(second, Merge::Adopted(None));
    }

    #[test]
    fn merge_older_remote_keeps_local() {
        let mut state = confirmed_state("5", 50);
        let merge = state.merge_remote(&name("CloudScore"), &RemoteEntry::new("1", 40u64));
        assert_eq!(merge, Merge::KeptLocal);
        assert_eq!(state.get(&name("CloudScore")).unwrap().value, "5");
    }

    #[test]
    fn merge_equal_timestamp_keeps_unconfirmed_local_write() {
        let mut state = confirmed_state("5", 50);
        state.observe(vec![host("CloudScore", "6")], true, idle);

        let merge = state.merge_remote(&name("CloudScore"), &RemoteEntry::new("5", 50u64));
        assert_eq!(merge, Merge::KeptLocal);
        assert_eq!(state.get(&name("CloudScore")).unwrap().value, "6");
    }

    #[test]
    fn merge_unknown_name_is_untracked() {
        let mut state = LocalState::new();
        let merge = state.merge_remote(&name("CloudGhost"), &RemoteEntry::new("1", 1u64));
        assert_eq!(merge, Merge::Untracked);
    }

    #[test]
    fn accepted_write_confirms_and_keeps_newer_local_edit() {
        let mut state = confirmed_state("0", 10);
        state.observe(vec![host("CloudScore", "1")], true, idle);
        state.observe(vec![host("CloudScore", "2")], true, idle);

        let update = state.apply_accepted(&name("CloudScore"), "1", "1", Timestamp(11));

        assert!(update.is_none());
        let var = state.get(&name("CloudScore")).unwrap();
        assert_eq!(var.value, "2");
        assert_eq!(var.confirmed.as_deref(), Some("1"));
        assert_eq!(var.timestamp, Timestamp(11));
        assert!(var.is_unconfirmed());
    }

    #[test]
    fn accepted_write_adopts_normalized_value() {
        let mut state = confirmed_state("0", 10);
        state.observe(vec![host("CloudScore", " 3")], true, idle);

        let update = state
            .apply_accepted(&name("CloudScore"), " 3", "3", Timestamp(11))
            .expect("host update");
        assert_eq!(update.value, "3");
        assert!(!state.get(&name("CloudScore")).unwrap().is_unconfirmed());
    }

    #[test]
    fn rejected_write_with_newer_server_timestamp_adopts_server() {
        let mut state = confirmed_state("0", 10);
        state.observe(vec![host("CloudScore", "1")], true, idle);

        let conflict = state.apply_rejected(&name("CloudScore"), "9", Timestamp(20));

        assert!(conflict.adopted);
        assert_eq!(conflict.host_update.unwrap().value, "9");
        let var = state.get(&name("CloudScore")).unwrap();
        assert_eq!((var.value.as_str(), var.timestamp), ("9", Timestamp(20)));
    }

    #[test]
    fn rejected_write_with_equal_timestamp_keeps_local() {
        let mut state = confirmed_state("0", 10);
        state.observe(vec![host("CloudScore", "1")], true, idle);

        let conflict = state.apply_rejected(&name("CloudScore"), "9", Timestamp(10));

        assert!(!conflict.adopted);
        assert_eq!(state.get(&name("CloudScore")).unwrap().value, "1");
    }

    #[test]
    fn adopt_tracked_inserts_new_variable_from_host() {
        let mut state = LocalState::new();
        let merge = state.adopt_tracked(host("CloudNew", "0"), &RemoteEntry::new("4", 5u64));
        assert!(matches!(merge, Merge::Adopted(Some(_))));
        assert_eq!(state.get(&name("CloudNew")).unwrap().value, "4");
    }
}
