use dashmap::DashMap;
use log::warn;

use super::{Entity, EntityState, Generation, Guid};
use crate::world::spawn::SpawnKey;

/// One arena slot. The generation is bumped every time the slot is vacated.
pub struct Slot {
    generation: Generation,
    entity: Option<Entity>,
}

impl Slot {
    pub fn entity(&self) -> Option<&Entity> {
        self.entity.as_ref()
    }

    pub fn entity_mut(&mut self) -> Option<&mut Entity> {
        self.entity.as_mut()
    }
}

/// Arena of every entity on a map, plus the spawn-id index.
///
/// Slots are recycled through a free list. Iteration order is slot order, which keeps parallel
/// phases deterministic: commands are merged back in chunk order.
#[derive(Default)]
pub struct Registry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    len: usize,
    by_spawn: DashMap<SpawnKey, Vec<Guid>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an entity and hand back its guid. The entity's spawn link, if any, is indexed.
    pub fn insert(&mut self, mut entity: Entity) -> Guid {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: Generation::FIRST,
                    entity: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let guid = Guid::with_generation(index, slot.generation);
        entity.state.guid = guid;
        if let Some(link) = &entity.state.spawn {
            self.by_spawn.entry(link.key).or_default().push(guid);
        }
        slot.entity = Some(entity);
        self.len += 1;
        guid
    }

    /// Take an entity out of the arena. Stale guids resolve to nothing.
    pub fn remove(&mut self, guid: Guid) -> Option<Entity> {
        let Some(slot) = self.slots.get_mut(guid.index()) else {
            warn!("Removal of unknown entity {guid}");
            return None;
        };
        if slot.generation != guid.generation() || slot.entity.is_none() {
            warn!("Removal of stale entity {guid}");
            return None;
        }
        let entity = slot.entity.take()?;
        slot.generation = slot.generation.next();
        self.free.push(guid.index() as u32);
        self.len -= 1;

        if let Some(link) = &entity.state.spawn {
            if let Some(mut guids) = self.by_spawn.get_mut(&link.key) {
                guids.retain(|g| *g != guid);
            }
            self.by_spawn.remove_if(&link.key, |_, guids| guids.is_empty());
        }
        Some(entity)
    }

    pub fn get(&self, guid: Guid) -> Option<&Entity> {
        self.slots
            .get(guid.index())
            .filter(|slot| slot.generation == guid.generation())
            .and_then(Slot::entity)
    }

    pub fn get_mut(&mut self, guid: Guid) -> Option<&mut Entity> {
        self.slots
            .get_mut(guid.index())
            .filter(|slot| slot.generation == guid.generation())
            .and_then(Slot::entity_mut)
    }

    pub fn state(&self, guid: Guid) -> Option<&EntityState> {
        self.get(guid).map(Entity::state)
    }

    pub(crate) fn state_mut(&mut self, guid: Guid) -> Option<&mut EntityState> {
        self.get_mut(guid).map(|entity| &mut entity.state)
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.get(guid).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of arena slots, occupied or not. Guid indices are below this.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.slots.iter().filter_map(Slot::entity)
    }

    pub fn guids(&self) -> Vec<Guid> {
        self.iter().map(Entity::guid).collect()
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [Slot] {
        &mut self.slots
    }

    /// Every entity created from `key`, live or not.
    pub fn instances_of(&self, key: SpawnKey) -> Vec<Guid> {
        self.by_spawn.get(&key).map(|guids| guids.clone()).unwrap_or_default()
    }

    /// The entity for a spawn id, preferring a live instance when several exist.
    pub fn find_by_spawn(&self, key: SpawnKey) -> Option<Guid> {
        let instances = self.instances_of(key);
        instances
            .iter()
            .copied()
            .find(|guid| self.state(*guid).is_some_and(|s| s.is_alive() && !s.is_destroyed()))
            .or_else(|| instances.first().copied())
    }
}
