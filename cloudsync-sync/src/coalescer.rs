//! Coalescer: per-name debounce buffer in front of OutboundSync.
//!
//! At most one [`DebounceEntry`] exists per name. Buffering a new value for
//! a name aborts the previous entry's timer and starts a fresh window, so a
//! burst of edits produces a single send carrying the last value.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use cloudsync_core::VariableName;

use crate::host::Host;
use crate::outbound::SendOutcome;
use crate::remote::RemoteStore;
use crate::session::SyncSession;

#[derive(Debug)]
pub struct DebounceEntry {
    pub value: String,
    pub deadline: Instant,
    generation: u64,
    timer: Option<JoinHandle<()>>,
}

impl DebounceEntry {
    fn cancel(self) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
    }
}

#[derive(Debug)]
pub struct Coalescer {
    window: Duration,
    entries: BTreeMap<VariableName, DebounceEntry>,
    next_generation: u64,
}

impl Coalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: BTreeMap::new(),
            next_generation: 0,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Replace any entry for `name` with `value`, deadline `now + window`.
    ///
    /// Returns the generation and deadline the caller's timer must present
    /// to [`Coalescer::take_due`].
    pub fn buffer(&mut self, name: VariableName, value: String, now: Instant) -> (u64, Instant) {
        self.next_generation += 1;
        let generation = self.next_generation;
        let deadline = now + self.window;
        let entry = DebounceEntry {
            value,
            deadline,
            generation,
            timer: None,
        };
        if let Some(previous) = self.entries.insert(name, entry) {
            previous.cancel();
        }
        (generation, deadline)
    }

    /// Attach the timer driving `generation`. A timer for a superseded
    /// generation is aborted instead.
    pub fn attach(&mut self, name: &VariableName, generation: u64, timer: JoinHandle<()>) {
        match self.entries.get_mut(name) {
            Some(entry) if entry.generation == generation => entry.timer = Some(timer),
            _ => timer.abort(),
        }
    }

    /// Remove and return the buffered value if `generation` is still current.
    pub fn take_due(&mut self, name: &VariableName, generation: u64) -> Option<String> {
        match self.entries.get(name) {
            Some(entry) if entry.generation == generation => {
                self.entries.remove(name).map(|entry| entry.value)
            }
            _ => None,
        }
    }

    pub fn contains(&self, name: &VariableName) -> bool {
        self.entries.contains_key(name)
    }

    pub fn value_of(&self, name: &VariableName) -> Option<&str> {
        self.entries.get(name).map(|entry| entry.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> Vec<VariableName> {
        self.entries.keys().cloned().collect()
    }

    /// Drop every entry and abort its timer. Returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        for (_, entry) in std::mem::take(&mut self.entries) {
            entry.cancel();
        }
        dropped
    }
}

impl<H, R> SyncSession<H, R>
where
    H: Host + 'static,
    R: RemoteStore + 'static,
{
    /// Buffer `value` for `name` and (re)start its coalescing window.
    pub fn schedule(self: &Arc<Self>, name: VariableName, value: String) {
        if self.is_closed() {
            return;
        }
        // The lock is held across spawn + attach so the timer cannot fire
        // against a missing entry.
        let mut coalescer = self.coalescer.lock();
        let (generation, deadline) = coalescer.buffer(name.clone(), value, Instant::now());
        let session = Arc::clone(self);
        let key = name.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            session.flush(&key, generation).await;
        });
        coalescer.attach(&name, generation, timer);
    }

    /// Deadline handler: send the buffered value unless a write for the
    /// name is still in flight, in which case the send is dropped.
    pub(crate) async fn flush(&self, name: &VariableName, generation: u64) -> Option<SendOutcome> {
        let value = self.coalescer.lock().take_due(name, generation)?;
        if self.pending.contains(name) {
            tracing::debug!(name = %name, "write in flight, dropping coalesced send");
            return None;
        }
        Some(self.send(name, value).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name() -> VariableName {
        VariableName::from("CloudScore")
    }

    #[tokio::test(start_paused = true)]
    async fn rebuffering_supersedes_previous_generation() {
        let mut coalescer = Coalescer::new(Duration::from_millis(100));
        let (first, _) = coalescer.buffer(name(), "1".into(), Instant::now());
        let (second, deadline) = coalescer.buffer(name(), "2".into(), Instant::now());

        assert_eq!(coalescer.len(), 1);
        assert_eq!(deadline, Instant::now() + Duration::from_millis(100));
        assert_eq!(coalescer.take_due(&name(), first), None);
        assert_eq!(coalescer.take_due(&name(), second), Some("2".to_string()));
        assert!(coalescer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_timer_is_aborted() {
        fn parked() -> (JoinHandle<()>, tokio::sync::oneshot::Receiver<()>) {
            let (alive, dropped) = tokio::sync::oneshot::channel::<()>();
            let timer = tokio::spawn(async move {
                let _alive = alive;
                std::future::pending::<()>().await;
            });
            (timer, dropped)
        }

        let mut coalescer = Coalescer::new(Duration::from_millis(100));
        let (first, _) = coalescer.buffer(name(), "1".into(), Instant::now());
        let (timer, first_dropped) = parked();
        coalescer.attach(&name(), first, timer);

        coalescer.buffer(name(), "2".into(), Instant::now());
        assert!(first_dropped.await.is_err(), "replaced timer must be aborted");

        let (stale, stale_dropped) = parked();
        coalescer.attach(&name(), first, stale);
        assert!(stale_dropped.await.is_err(), "late timer must be aborted");
        assert_eq!(coalescer.value_of(&name()), Some("2"));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_drops_everything() {
        let mut coalescer = Coalescer::new(Duration::from_millis(100));
        coalescer.buffer(VariableName::from("CloudA"), "1".into(), Instant::now());
        coalescer.buffer(VariableName::from("CloudB"), "2".into(), Instant::now());
        assert_eq!(coalescer.clear(), 2);
        assert!(!coalescer.contains(&VariableName::from("CloudA")));
    }
}
