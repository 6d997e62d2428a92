//! Worker Registry
//!
//! The only state shared between the orchestrator's background loops, manual
//! start/stop calls and the workers themselves. Entries are keyed by topic id
//! and stamped with a generation number, so a worker that exits on its own can
//! remove its entry without clobbering a newer worker for the same topic.
//!
//! A start reserves its topic first and subscribes with the lock released.
//! Stopping the topic or draining the registry while the subscribe is in
//! flight revokes the reservation, and the starter then discards its
//! subscription instead of inserting it.

use brokerwatch_observability::metrics::ACTIVE_WORKERS;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock, RwLockWriteGuard};
use tokio::task::JoinHandle;

use crate::worker::{WorkerShared, WorkerState};

pub struct WorkerEntry {
    pub topic_id: i64,
    pub topic_name: String,
    pub generation: u64,
    pub started_at: i64,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
    shared: Arc<WorkerShared>,
}

impl WorkerEntry {
    pub fn new(
        topic_id: i64,
        topic_name: String,
        generation: u64,
        stop_tx: watch::Sender<bool>,
        handle: JoinHandle<()>,
        shared: Arc<WorkerShared>,
    ) -> Self {
        Self {
            topic_id,
            topic_name,
            generation,
            started_at: chrono::Utc::now().timestamp_millis(),
            stop_tx,
            handle,
            shared,
        }
    }

    /// Wake the worker and ask it to exit. Does not wait.
    pub fn signal_stop(&self) {
        // Err means the worker already exited and dropped its receiver.
        let _ = self.stop_tx.send(true);
    }

    /// Whether the worker's task is still running.
    pub fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            topic_id: self.topic_id,
            topic_name: self.topic_name.clone(),
            generation: self.generation,
            state: if self.is_alive() {
                WorkerState::Running
            } else {
                WorkerState::Stopped
            },
            consecutive_errors: self.shared.consecutive_errors(),
            records_persisted: self.shared.records_persisted(),
            persist_failures: self.shared.persist_failures(),
            started_at: self.started_at,
        }
    }
}

/// Read-only view of one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub topic_id: i64,
    pub topic_name: String,
    pub generation: u64,
    /// RUNNING while the task is alive, STOPPED otherwise
    pub state: WorkerState,
    pub consecutive_errors: u32,
    pub records_persisted: u64,
    pub persist_failures: u64,
    pub started_at: i64,
}

/// Result of [`WorkerRegistry::reserve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// The caller owns the start for this topic
    Reserved,
    /// A live worker already exists
    Running,
    /// Another start is subscribing right now
    InFlight,
}

#[derive(Default)]
struct Slots {
    workers: HashMap<i64, WorkerEntry>,
    starting: HashSet<i64>,
}

#[derive(Default)]
pub struct WorkerRegistry {
    slots: RwLock<Slots>,
    next_generation: AtomicU64,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Claim the right to start a worker for `topic_id`.
    ///
    /// A finished entry left behind for the topic is dropped here.
    pub async fn reserve(&self, topic_id: i64) -> Reservation {
        let mut slots = self.slots.write().await;

        if slots.starting.contains(&topic_id) {
            return Reservation::InFlight;
        }
        if let Some(existing) = slots.workers.get(&topic_id) {
            if existing.is_alive() {
                return Reservation::Running;
            }
            slots.workers.remove(&topic_id);
            ACTIVE_WORKERS.set(slots.workers.len() as i64);
        }

        slots.starting.insert(topic_id);
        Reservation::Reserved
    }

    /// Give up a reservation. Returns `false` if none was held.
    pub async fn cancel(&self, topic_id: i64) -> bool {
        self.slots.write().await.starting.remove(&topic_id)
    }

    /// Exclusive access for completing a reservation.
    pub(crate) async fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            slots: self.slots.write().await,
        }
    }

    pub async fn remove(&self, topic_id: i64) -> Option<WorkerEntry> {
        let mut slots = self.slots.write().await;
        let entry = slots.workers.remove(&topic_id);
        ACTIVE_WORKERS.set(slots.workers.len() as i64);
        entry
    }

    /// Remove the entry only if it still belongs to `generation`.
    pub async fn remove_if_generation(&self, topic_id: i64, generation: u64) -> bool {
        let mut slots = self.slots.write().await;
        let owned = slots
            .workers
            .get(&topic_id)
            .map(|e| e.generation == generation)
            .unwrap_or(false);

        if owned {
            slots.workers.remove(&topic_id);
            ACTIVE_WORKERS.set(slots.workers.len() as i64);
        }
        owned
    }

    /// Take every entry and revoke every reservation.
    pub async fn drain(&self) -> Vec<WorkerEntry> {
        let mut slots = self.slots.write().await;
        slots.starting.clear();
        let entries = slots.workers.drain().map(|(_, e)| e).collect();
        ACTIVE_WORKERS.set(0);
        entries
    }

    /// Topics with a worker or a start in flight.
    pub async fn topic_ids(&self) -> Vec<i64> {
        let slots = self.slots.read().await;
        let mut ids: Vec<i64> = slots
            .workers
            .keys()
            .chain(slots.starting.iter())
            .copied()
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub async fn alive_count(&self) -> usize {
        self.slots
            .read()
            .await
            .workers
            .values()
            .filter(|e| e.is_alive())
            .count()
    }

    pub async fn statuses(&self) -> Vec<WorkerStatus> {
        let mut statuses: Vec<WorkerStatus> = self
            .slots
            .read()
            .await
            .workers
            .values()
            .map(|e| e.status())
            .collect();
        statuses.sort_by_key(|s| s.topic_id);
        statuses
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.workers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.workers.is_empty()
    }
}

/// Write guard over the registry.
pub(crate) struct RegistryGuard<'a> {
    slots: RwLockWriteGuard<'a, Slots>,
}

impl RegistryGuard<'_> {
    /// Consume the reservation for `topic_id`. `false` means it was revoked.
    pub(crate) fn release(&mut self, topic_id: i64) -> bool {
        self.slots.starting.remove(&topic_id)
    }

    pub(crate) fn insert(&mut self, entry: WorkerEntry) {
        self.slots.workers.insert(entry.topic_id, entry);
        ACTIVE_WORKERS.set(self.slots.workers.len() as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn entry(topic_id: i64, generation: u64, handle: JoinHandle<()>) -> WorkerEntry {
        let (stop_tx, _stop_rx) = watch::channel(false);
        WorkerEntry::new(
            topic_id,
            format!("topic-{}", topic_id),
            generation,
            stop_tx,
            handle,
            Arc::new(WorkerShared::new()),
        )
    }

    #[tokio::test]
    async fn test_generation_guarded_removal() {
        let registry = WorkerRegistry::new();
        let first = registry.next_generation();
        let second = registry.next_generation();
        assert!(second > first);

        assert_eq!(registry.reserve(1).await, Reservation::Reserved);
        {
            let mut guard = registry.lock().await;
            assert!(guard.release(1));
            guard.insert(entry(1, second, tokio::spawn(async {})));
        }

        assert!(!registry.remove_if_generation(1, first).await);
        assert_eq!(registry.len().await, 1);

        assert!(registry.remove_if_generation(1, second).await);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_reservation_lifecycle() {
        let registry = WorkerRegistry::new();

        assert_eq!(registry.reserve(7).await, Reservation::Reserved);
        assert_eq!(registry.reserve(7).await, Reservation::InFlight);
        assert_eq!(registry.topic_ids().await, vec![7]);
        assert!(registry.is_empty().await);

        assert!(registry.cancel(7).await);
        assert!(!registry.cancel(7).await);
        assert_eq!(registry.reserve(7).await, Reservation::Reserved);

        // Draining revokes the reservation out from under the starter.
        assert!(registry.drain().await.is_empty());
        assert!(!registry.lock().await.release(7));
        assert!(registry.topic_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_reserve_replaces_finished_entry() {
        let registry = WorkerRegistry::new();
        registry
            .lock()
            .await
            .insert(entry(3, 1, tokio::spawn(async {})));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(registry.reserve(3).await, Reservation::Reserved);
        assert!(registry.is_empty().await);
        assert!(registry.lock().await.release(3));
    }

    #[tokio::test]
    async fn test_status_reflects_task_liveness() {
        let registry = WorkerRegistry::new();
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

        {
            let mut guard = registry.lock().await;
            guard.insert(entry(
                2,
                1,
                tokio::spawn(async move {
                    let _ = release_rx.await;
                }),
            ));
            guard.insert(entry(1, 2, tokio::spawn(async {})));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let statuses = registry.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].topic_id, 1);
        assert_eq!(statuses[0].state, WorkerState::Stopped);
        assert_eq!(statuses[1].state, WorkerState::Running);
        assert_eq!(registry.alive_count().await, 1);

        let _ = release_tx.send(());
        assert_eq!(registry.drain().await.len(), 2);
        assert!(registry.topic_ids().await.is_empty());
    }
}
