use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, warn};

use crate::core::time::Timestamp;
use crate::world::entity::PlayerId;
use crate::world::map::{Difficulty, InstanceId, MapId, MapIdentity};

/// A player's binding to one instance of a map at one difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InstanceLock {
    pub player: PlayerId,
    pub map_id: MapId,
    pub difficulty: Difficulty,
    pub instance_id: InstanceId,
    pub expires_at: Option<Timestamp>,
}

impl InstanceLock {
    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    Created,
    AlreadyBound,
    /// An expired lock on another instance was replaced.
    Replaced,
    /// A live lock on another instance exists and was kept.
    Conflict,
}

/// Instance locks shared by every map of a server.
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: DashMap<(PlayerId, MapId, Difficulty), InstanceLock>,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `player` to the instance. Binding twice to the same instance is a no-op.
    pub fn bind(
        &self,
        player: PlayerId,
        identity: &MapIdentity,
        expires_at: Option<Timestamp>,
        now: Timestamp,
    ) -> BindOutcome {
        let lock = InstanceLock {
            player,
            map_id: identity.id,
            difficulty: identity.difficulty,
            instance_id: identity.instance_id,
            expires_at,
        };
        match self.locks.entry((player, identity.id, identity.difficulty)) {
            Entry::Vacant(vacant) => {
                debug!("Player {player} bound to {identity}");
                vacant.insert(lock);
                BindOutcome::Created
            }
            Entry::Occupied(occupied) if occupied.get().instance_id == identity.instance_id => {
                BindOutcome::AlreadyBound
            }
            Entry::Occupied(mut occupied) if occupied.get().is_expired(now) => {
                debug!("Player {player} rebound to {identity}");
                occupied.insert(lock);
                BindOutcome::Replaced
            }
            Entry::Occupied(occupied) => {
                warn!(
                    "Player {player} entered {identity} while bound to instance {}",
                    occupied.get().instance_id
                );
                BindOutcome::Conflict
            }
        }
    }

    pub fn lock_for(&self, player: PlayerId, map: MapId, difficulty: Difficulty) -> Option<InstanceLock> {
        self.locks.get(&(player, map, difficulty)).map(|lock| *lock)
    }

    pub fn unbind(&self, player: PlayerId, map: MapId, difficulty: Difficulty) -> Option<InstanceLock> {
        self.locks.remove(&(player, map, difficulty)).map(|(_, lock)| lock)
    }

    /// Drop every lock on an instance, returning how many were dropped.
    pub fn release_instance(&self, map: MapId, instance: InstanceId) -> usize {
        let before = self.locks.len();
        self.locks
            .retain(|_, lock| !(lock.map_id == map && lock.instance_id == instance));
        before - self.locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::map::MapKind;

    fn instance(id: InstanceId) -> MapIdentity {
        MapIdentity::new(33, id, Difficulty(1), MapKind::Instance)
    }

    #[test]
    fn bind_is_idempotent() {
        // Given
        let locks = InstanceLocks::new();

        // When
        let first = locks.bind(7, &instance(100), Some(1_000), 0);
        let second = locks.bind(7, &instance(100), Some(1_000), 0);

        // Then
        assert_eq!(first, BindOutcome::Created);
        assert_eq!(second, BindOutcome::AlreadyBound);
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn live_lock_is_not_replaced() {
        let locks = InstanceLocks::new();
        locks.bind(7, &instance(100), Some(1_000), 0);
        assert_eq!(locks.bind(7, &instance(101), None, 500), BindOutcome::Conflict);
        assert_eq!(locks.lock_for(7, 33, Difficulty(1)).unwrap().instance_id, 100);
    }

    #[test]
    fn expired_lock_is_replaced() {
        let locks = InstanceLocks::new();
        locks.bind(7, &instance(100), Some(1_000), 0);
        assert_eq!(locks.bind(7, &instance(101), None, 1_000), BindOutcome::Replaced);
        assert_eq!(locks.lock_for(7, 33, Difficulty(1)).unwrap().instance_id, 101);
    }

    #[test]
    fn release_instance_drops_its_locks() {
        let locks = InstanceLocks::new();
        locks.bind(1, &instance(100), None, 0);
        locks.bind(2, &instance(100), None, 0);
        locks.bind(3, &instance(200), None, 0);
        assert_eq!(locks.release_instance(33, 100), 2);
        assert_eq!(locks.len(), 1);
        assert!(locks.unbind(3, 33, Difficulty(1)).is_some());
        assert!(locks.is_empty());
    }
}
