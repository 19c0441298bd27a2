use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};

use super::config::Config;
use super::map::{Difficulty, InstanceId, Map, MapId, MapKind};
use super::services::Services;
use super::variant::{InstanceLocks, InstanceSetup, Variant};
use crate::core::tasks::Executor;

/// Owns every live map of a server and drives them from one update loop. Maps share the
/// worker pool, the collaborators and the instance locks held here.
pub struct MapManager {
    config: Arc<Config>,
    services: Services,
    executor: Arc<Executor>,
    locks: Arc<InstanceLocks>,
    maps: BTreeMap<(MapId, InstanceId), Map>,
    next_instance_id: InstanceId,
}

impl MapManager {
    pub fn new(config: Arc<Config>, services: Services, executor: Arc<Executor>, locks: Arc<InstanceLocks>) -> Self {
        Self {
            config,
            services,
            executor,
            locks,
            maps: BTreeMap::new(),
            next_instance_id: 1,
        }
    }

    fn create(&mut self, map_id: MapId, instance_id: InstanceId, difficulty: Difficulty, variant: Variant) -> &mut Map {
        let (config, services, executor) = (&self.config, &self.services, &self.executor);
        self.maps.entry((map_id, instance_id)).or_insert_with(|| {
            Map::new(
                map_id,
                instance_id,
                difficulty,
                variant,
                Arc::clone(config),
                services.clone(),
                Arc::clone(executor),
            )
        })
    }

    fn allocate_instance_id(&mut self) -> InstanceId {
        let id = self.next_instance_id;
        self.next_instance_id += 1;
        id
    }

    /// The open world copy of `map_id`, created on first use.
    pub fn create_world_map(&mut self, map_id: MapId) -> &mut Map {
        self.create(map_id, 0, Difficulty::NORMAL, Variant::open_world())
    }

    /// A setup using the shared locks and the configured unload delay.
    pub fn instance_setup(&self, max_players: usize) -> InstanceSetup {
        InstanceSetup::new(max_players, Arc::clone(&self.locks)).with_unload_delay(self.config.instance_unload_delay)
    }

    pub fn create_instance(&mut self, map_id: MapId, difficulty: Difficulty, setup: InstanceSetup) -> InstanceId {
        let instance_id = self.allocate_instance_id();
        self.create(map_id, instance_id, difficulty, Variant::instance(setup));
        instance_id
    }

    pub fn create_battleground(&mut self, map_id: MapId) -> InstanceId {
        let instance_id = self.allocate_instance_id();
        let variant = Variant::battleground(self.config.battleground_unload_delay);
        self.create(map_id, instance_id, Difficulty::NORMAL, variant);
        instance_id
    }

    pub fn map(&self, map_id: MapId, instance_id: InstanceId) -> Option<&Map> {
        self.maps.get(&(map_id, instance_id))
    }

    pub fn map_mut(&mut self, map_id: MapId, instance_id: InstanceId) -> Option<&mut Map> {
        self.maps.get_mut(&(map_id, instance_id))
    }

    pub fn maps(&self) -> impl Iterator<Item = &Map> {
        self.maps.values()
    }

    /// Ask a map to wind down. It is unloaded on the next update whose lifecycle allows it.
    pub fn close(&mut self, map_id: MapId, instance_id: InstanceId) -> bool {
        match self.maps.get_mut(&(map_id, instance_id)) {
            Some(map) => {
                map.close();
                true
            }
            None => {
                warn!("No map {map_id}/{instance_id} to close");
                false
            }
        }
    }

    /// Tick every map, then unload the ones whose lifecycle says they are done.
    pub fn update(&mut self, diff: Duration) {
        let mut expired = Vec::new();
        for (key, map) in self.maps.iter_mut() {
            map.update(diff);
            if map.can_unload(diff) {
                expired.push(*key);
            }
        }
        for key in expired {
            if let Some(mut map) = self.maps.remove(&key) {
                debug!("Unloading expired {} ({:?})", map.identity(), map.kind());
                map.unload_all();
            }
        }
    }

    /// Unload every map. Used at shutdown.
    pub fn unload_all(&mut self) {
        info!("Unloading {} maps", self.maps.len());
        for map in self.maps.values_mut() {
            map.unload_all();
        }
        self.maps.clear();
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn count(&self, kind: MapKind) -> usize {
        self.maps.values().filter(|map| map.kind() == kind).count()
    }

    pub fn locks(&self) -> &Arc<InstanceLocks> {
        &self.locks
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::world::config::Config;
    use crate::world::entity::{Entity, Inert, PlayerData};
    use crate::world::map::{Difficulty, MapKind};
    use crate::world::memory::Fixture;
    use crate::world::position::Position;
    use crate::world::services::Destination;

    #[test]
    fn empty_battleground_unloads_after_delay() {
        // Given
        let config = Config {
            battleground_unload_delay: Duration::from_millis(100),
            ..Config::default()
        };
        let fixture = Fixture::with_config(config);
        let mut manager = fixture.manager();
        manager.create_world_map(0);
        let instance = manager.create_battleground(30);
        assert_eq!(manager.count(MapKind::Battleground), 1);

        // When
        manager.update(Duration::from_millis(50));
        manager.update(Duration::from_millis(50));

        // Then
        assert!(manager.map(30, instance).is_none());
        assert_eq!(manager.count(MapKind::World), 1);
    }

    #[test]
    fn closed_battleground_evicts_to_entry_point() {
        // Given
        let fixture = Fixture::new();
        let mut manager = fixture.manager();
        let instance = manager.create_battleground(30);
        let mut data = PlayerData::new(1);
        data.battleground_instance = Some(instance);
        let player = manager
            .map_mut(30, instance)
            .unwrap()
            .add_player(Entity::player(data, Position::new(0.0, 0.0, 0.0), Inert))
            .unwrap();

        // When
        assert!(manager.close(30, instance));
        manager.update(Duration::from_millis(50));

        // Then
        assert!(manager.is_empty());
        assert_eq!(fixture.teleporter.teleports(), vec![(player, Destination::EntryPoint(None))]);
    }

    #[test]
    fn player_can_enter_a_new_instance_after_the_old_one_unloads() {
        // Given
        let config = Config {
            instance_unload_delay: Duration::from_secs(1),
            ..Config::default()
        };
        let fixture = Fixture::with_config(config);
        let mut manager = fixture.manager();
        let setup = manager.instance_setup(5);
        let first = manager.create_instance(33, Difficulty::NORMAL, setup);
        let map = manager.map_mut(33, first).unwrap();
        let guid = map
            .add_player(Entity::player(PlayerData::new(1), Position::new(0.0, 0.0, 0.0), Inert))
            .unwrap();
        assert!(map.remove_player(guid));
        assert!(manager.locks().lock_for(1, 33, Difficulty::NORMAL).is_some());

        // When
        for _ in 0..3 {
            manager.update(Duration::from_millis(600));
        }
        let setup = manager.instance_setup(5);
        let second = manager.create_instance(33, Difficulty::NORMAL, setup);

        // Then
        assert!(manager.map(33, first).is_none());
        assert!(manager.locks().lock_for(1, 33, Difficulty::NORMAL).is_none());
        let entered = manager
            .map_mut(33, second)
            .unwrap()
            .add_player(Entity::player(PlayerData::new(1), Position::new(0.0, 0.0, 0.0), Inert));
        assert!(entered.is_ok());
        assert_eq!(manager.locks().lock_for(1, 33, Difficulty::NORMAL).unwrap().instance_id, second);
    }

    #[test]
    fn instances_get_distinct_ids() {
        let fixture = Fixture::new();
        let mut manager = fixture.manager();
        let setup = manager.instance_setup(5);
        let first = manager.create_instance(33, Difficulty::NORMAL, setup);
        let setup = manager.instance_setup(5);
        let second = manager.create_instance(33, Difficulty::NORMAL, setup);
        assert_ne!(first, second);
        assert_eq!(manager.count(MapKind::Instance), 2);
        manager.unload_all();
        assert!(manager.is_empty());
    }
}
