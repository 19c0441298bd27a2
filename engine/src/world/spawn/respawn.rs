use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::SpawnKey;
use crate::core::time::Timestamp;
use crate::world::grid::GridCoord;
use crate::world::map::{InstanceId, MapId};
use crate::world::services::RespawnBatch;

/// A pending respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespawnInfo {
    pub key: SpawnKey,
    pub entry: u32,
    pub due: Timestamp,
    pub grid: GridCoord,
}

/// Verdict of the respawn check for a due entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Drop the entry without spawning.
    Cancel,
    /// Keep the entry with a new due time.
    Defer(Timestamp),
}

/// Pending respawns of one map, indexed both by due time and by spawn.
///
/// The two indexes always hold the same set of spawns. Entries with equal due times pop in
/// spawn kind order, then spawn id order.
#[derive(Debug, Default)]
pub struct RespawnQueue {
    by_time: BTreeSet<(Timestamp, SpawnKey)>,
    by_spawn: HashMap<SpawnKey, RespawnInfo>,
}

impl RespawnQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `info`. A spawn keeps its earliest due time: returns false, leaving the queue
    /// untouched, when the spawn is already queued at or before `info.due`.
    pub fn add(&mut self, info: RespawnInfo) -> bool {
        if let Some(existing) = self.by_spawn.get(&info.key) {
            if existing.due <= info.due {
                return false;
            }
            self.by_time.remove(&(existing.due, info.key));
        }
        self.by_time.insert((info.due, info.key));
        self.by_spawn.insert(info.key, info);
        true
    }

    pub fn remove(&mut self, key: SpawnKey) -> Option<RespawnInfo> {
        let info = self.by_spawn.remove(&key)?;
        self.by_time.remove(&(info.due, key));
        Some(info)
    }

    /// Move an entry to a new due time, earlier or later.
    pub fn reschedule(&mut self, key: SpawnKey, due: Timestamp) -> Option<RespawnInfo> {
        let info = self.by_spawn.get_mut(&key)?;
        self.by_time.remove(&(info.due, key));
        info.due = due;
        self.by_time.insert((due, key));
        Some(*info)
    }

    pub fn get(&self, key: SpawnKey) -> Option<&RespawnInfo> {
        self.by_spawn.get(&key)
    }

    /// Earliest entry.
    pub fn peek(&self) -> Option<&RespawnInfo> {
        self.by_time.first().and_then(|(_, key)| self.by_spawn.get(key))
    }

    /// Earliest entry if it is due at `now`.
    pub fn next_due(&self, now: Timestamp) -> Option<RespawnInfo> {
        self.peek().filter(|info| info.due <= now).copied()
    }

    /// Entries in due order.
    pub fn iter(&self) -> impl Iterator<Item = &RespawnInfo> {
        self.by_time.iter().filter_map(|(_, key)| self.by_spawn.get(key))
    }

    pub fn len(&self) -> usize {
        debug_assert_eq!(self.by_time.len(), self.by_spawn.len());
        self.by_spawn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_spawn.is_empty()
    }
}

struct Pending {
    queue: RespawnQueue,
    batch: RespawnBatch,
}

/// The respawn queue of a map behind its own lock, so respawn times can be saved and queried
/// off the map thread. Persistence writes are collected into a batch the map commits once per
/// tick; maps that do not persist respawns never record any.
pub struct RespawnScheduler {
    pending: Mutex<Pending>,
    map_id: MapId,
    instance_id: InstanceId,
    persist: bool,
}

impl RespawnScheduler {
    pub fn new(map_id: MapId, instance_id: InstanceId, persist: bool) -> Self {
        Self {
            pending: Mutex::new(Pending {
                queue: RespawnQueue::new(),
                batch: RespawnBatch::new(map_id, instance_id),
            }),
            map_id,
            instance_id,
            persist,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn persists(&self) -> bool {
        self.persist
    }

    /// Queue a respawn and record it for persistence.
    pub fn schedule(&self, info: RespawnInfo) -> bool {
        let mut pending = self.lock();
        let added = pending.queue.add(info);
        if added && self.persist {
            pending.batch.save(info);
        }
        added
    }

    /// Queue a respawn read back from storage. Nothing is written.
    pub fn restore(&self, info: RespawnInfo) -> bool {
        self.lock().queue.add(info)
    }

    /// Drop a pending respawn. Storage is cleared when an entry was removed, or
    /// unconditionally with `always_delete`.
    pub fn cancel(&self, key: SpawnKey, always_delete: bool) -> Option<RespawnInfo> {
        let mut pending = self.lock();
        let removed = pending.queue.remove(key);
        if self.persist && (removed.is_some() || always_delete) {
            pending.batch.delete(key);
        }
        removed
    }

    pub fn reschedule(&self, key: SpawnKey, due: Timestamp) -> Option<RespawnInfo> {
        let mut pending = self.lock();
        let updated = pending.queue.reschedule(key, due);
        if let Some(info) = updated {
            if self.persist {
                pending.batch.save(info);
            }
        }
        updated
    }

    pub fn get(&self, key: SpawnKey) -> Option<RespawnInfo> {
        self.lock().queue.get(key).copied()
    }

    pub fn due_time(&self, key: SpawnKey) -> Option<Timestamp> {
        self.get(key).map(|info| info.due)
    }

    pub fn next_due(&self, now: Timestamp) -> Option<RespawnInfo> {
        self.lock().queue.next_due(now)
    }

    pub fn snapshot(&self) -> Vec<RespawnInfo> {
        self.lock().queue.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    /// Hand over the writes recorded since the last call, if any.
    pub fn take_batch(&self) -> Option<RespawnBatch> {
        let mut pending = self.lock();
        if pending.batch.is_empty() {
            return None;
        }
        Some(std::mem::replace(
            &mut pending.batch,
            RespawnBatch::new(self.map_id, self.instance_id),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::services::RespawnOp;
    use crate::world::spawn::SpawnKind;

    fn info(kind: SpawnKind, id: u64, due: Timestamp) -> RespawnInfo {
        RespawnInfo {
            key: SpawnKey::new(kind, id),
            entry: 1,
            due,
            grid: GridCoord::new(32, 32),
        }
    }

    #[test]
    fn earliest_due_time_wins() {
        // Given
        let mut queue = RespawnQueue::new();
        assert!(queue.add(info(SpawnKind::Creature, 1, 100)));

        // When
        let later = queue.add(info(SpawnKind::Creature, 1, 200));
        let earlier = queue.add(info(SpawnKind::Creature, 1, 50));

        // Then
        assert!(!later);
        assert!(earlier);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(SpawnKey::creature(1)).unwrap().due, 50);
    }

    #[test]
    fn due_order_breaks_ties_by_kind_then_id() {
        // Given
        let mut queue = RespawnQueue::new();
        queue.add(info(SpawnKind::GameObject, 1, 100));
        queue.add(info(SpawnKind::Creature, 9, 100));
        queue.add(info(SpawnKind::Creature, 3, 100));
        queue.add(info(SpawnKind::Creature, 1, 150));

        // Then
        let order: Vec<_> = queue.iter().map(|i| i.key).collect();
        assert_eq!(
            order,
            vec![
                SpawnKey::creature(3),
                SpawnKey::creature(9),
                SpawnKey::gameobject(1),
                SpawnKey::creature(1),
            ]
        );
    }

    #[test]
    fn next_due_respects_now() {
        let mut queue = RespawnQueue::new();
        queue.add(info(SpawnKind::Creature, 1, 100));
        assert!(queue.next_due(99).is_none());
        assert_eq!(queue.next_due(100).unwrap().key, SpawnKey::creature(1));
    }

    #[test]
    fn remove_clears_both_indexes() {
        let mut queue = RespawnQueue::new();
        queue.add(info(SpawnKind::Creature, 1, 100));
        assert!(queue.remove(SpawnKey::creature(1)).is_some());
        assert!(queue.is_empty());
        assert!(queue.peek().is_none());
        assert!(queue.remove(SpawnKey::creature(1)).is_none());
    }

    #[test]
    fn reschedule_moves_entry() {
        let mut queue = RespawnQueue::new();
        queue.add(info(SpawnKind::Creature, 1, 100));
        queue.add(info(SpawnKind::Creature, 2, 120));
        queue.reschedule(SpawnKey::creature(1), 500);
        assert_eq!(queue.peek().unwrap().key, SpawnKey::creature(2));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn scheduler_batches_persisted_writes() {
        // Given
        let scheduler = RespawnScheduler::new(1, 0, true);

        // When
        scheduler.schedule(info(SpawnKind::Creature, 1, 100));
        scheduler.cancel(SpawnKey::creature(2), true);
        scheduler.cancel(SpawnKey::creature(3), false);

        // Then
        let batch = scheduler.take_batch().unwrap();
        assert_eq!(batch.ops().len(), 2);
        assert!(matches!(batch.ops()[0], RespawnOp::Save { due: 100, .. }));
        assert!(matches!(batch.ops()[1], RespawnOp::Delete { .. }));
        assert!(scheduler.take_batch().is_none());
    }

    #[test]
    fn non_persistent_scheduler_records_nothing() {
        let scheduler = RespawnScheduler::new(1, 5, false);
        scheduler.schedule(info(SpawnKind::Creature, 1, 100));
        scheduler.cancel(SpawnKey::creature(1), true);
        assert!(scheduler.take_batch().is_none());
        assert!(scheduler.is_empty());
    }

    #[test]
    fn restore_does_not_write() {
        let scheduler = RespawnScheduler::new(1, 0, true);
        assert!(scheduler.restore(info(SpawnKind::Creature, 1, 100)));
        assert!(scheduler.take_batch().is_none());
        assert_eq!(scheduler.due_time(SpawnKey::creature(1)), Some(100));
    }
}
