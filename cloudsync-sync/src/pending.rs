//! PendingSet: names with an outbound write in flight.
//!
//! Membership is acquired through [`PendingSet::try_acquire`], which returns
//! a [`PendingGuard`]. Dropping the guard removes the name, so release
//! happens exactly once on success, conflict, failure or task cancellation.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use cloudsync_core::VariableName;

#[derive(Debug, Default)]
struct Members {
    names: BTreeSet<VariableName>,
    /// Bumped by `clear()`; guards from an older epoch release nothing.
    epoch: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PendingSet {
    inner: Arc<Mutex<Members>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `name`. `None` if a write for it is already in flight.
    pub fn try_acquire(&self, name: &VariableName) -> Option<PendingGuard> {
        let mut members = self.inner.lock();
        if !members.names.insert(name.clone()) {
            return None;
        }
        Some(PendingGuard {
            inner: Arc::clone(&self.inner),
            name: name.clone(),
            epoch: members.epoch,
        })
    }

    pub fn contains(&self, name: &VariableName) -> bool {
        self.inner.lock().names.contains(name)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().names.is_empty()
    }

    /// Sorted copy of the current members.
    pub fn names(&self) -> Vec<VariableName> {
        self.inner.lock().names.iter().cloned().collect()
    }

    /// Forget every member. Guards handed out before the call become inert.
    pub fn clear(&self) {
        let mut members = self.inner.lock();
        members.names.clear();
        members.epoch += 1;
    }
}

/// Scoped membership of one name in a [`PendingSet`].
#[derive(Debug)]
pub struct PendingGuard {
    inner: Arc<Mutex<Members>>,
    name: VariableName,
    epoch: u64,
}

impl PendingGuard {
    pub fn name(&self) -> &VariableName {
        &self.name
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut members = self.inner.lock();
        if members.epoch == self.epoch {
            members.names.remove(&self.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_guard_alive() {
        let pending = PendingSet::new();
        let name = VariableName::from("CloudScore");

        let guard = pending.try_acquire(&name).expect("first acquire");
        assert!(pending.contains(&name));
        assert!(pending.try_acquire(&name).is_none());

        drop(guard);
        assert!(!pending.contains(&name));
        assert!(pending.try_acquire(&name).is_some());
    }

    #[test]
    fn names_are_independent() {
        let pending = PendingSet::new();
        let _a = pending.try_acquire(&VariableName::from("CloudA")).unwrap();
        let _b = pending.try_acquire(&VariableName::from("CloudB")).unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(
            pending.names(),
            vec![VariableName::from("CloudA"), VariableName::from("CloudB")]
        );
    }

    #[test]
    fn guard_from_before_clear_does_not_release_new_claim() {
        let pending = PendingSet::new();
        let name = VariableName::from("CloudScore");
        let stale = pending.try_acquire(&name).unwrap();

        pending.clear();
        assert!(pending.is_empty());

        let _fresh = pending.try_acquire(&name).unwrap();
        drop(stale);
        assert!(pending.contains(&name));
    }
}
