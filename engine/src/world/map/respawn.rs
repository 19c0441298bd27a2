use log::{debug, error, info, trace, warn};
use rand::Rng;

use super::Map;
use crate::core::time::Timestamp;
use crate::world::entity::{EntityKind, EntityState, SpawnLink};
use crate::world::spawn::{Eligibility, GroupId, RespawnInfo, SpawnGroupFlags, SpawnKey, SpawnKind, SpawnMetadata};

impl Map {
    /// Record when a spawn comes back. A due time of zero clears it instead. Outside of a tick
    /// the write goes to storage immediately; during a tick it is committed at the end.
    pub fn save_respawn_time(&self, key: SpawnKey, due: Timestamp) -> bool {
        if due == 0 {
            return self.remove_respawn_time(key, false);
        }
        let Some(spawn) = self.services.catalog.spawn_metadata(key) else {
            warn!("Cannot save respawn time of unknown spawn {key} on {}", self.identity);
            return false;
        };
        let Some(grid) = spawn.grid() else {
            warn!("Spawn {key} sits outside the map, respawn time not saved");
            return false;
        };
        let added = self.respawns.schedule(RespawnInfo {
            key,
            entry: spawn.entry,
            due,
            grid,
        });
        trace!("Respawn of {key} on {} due at {due}", self.identity);
        if !self.updating {
            self.commit_respawns();
        }
        added
    }

    /// Forget a pending respawn. With `always_delete` the storage row is deleted even if
    /// nothing was pending in memory.
    pub fn remove_respawn_time(&self, key: SpawnKey, always_delete: bool) -> bool {
        let removed = self.respawns.cancel(key, always_delete).is_some();
        if !self.updating {
            self.commit_respawns();
        }
        removed
    }

    pub fn respawn_time(&self, key: SpawnKey) -> Option<Timestamp> {
        self.respawns.due_time(key)
    }

    /// Pending respawns in firing order.
    pub fn pending_respawns(&self) -> Vec<RespawnInfo> {
        self.respawns.snapshot()
    }

    pub(crate) fn commit_respawns(&self) {
        if let Some(batch) = self.respawns.take_batch() {
            self.services.persistence.commit(batch);
        }
    }

    /// Read pending respawns back from storage. Rows that point at unknown spawns or at
    /// another map are deleted.
    pub(crate) fn load_respawn_times(&mut self) {
        let (map, instance) = (self.identity.id, self.identity.instance_id);
        let rows = self.services.persistence.load_pending_respawns(map, instance);
        for row in rows {
            let spawn = self
                .services
                .catalog
                .spawn_metadata(row.key)
                .filter(|spawn| spawn.map_id == map);
            let Some((entry, grid)) = spawn.and_then(|spawn| spawn.grid().map(|grid| (spawn.entry, grid))) else {
                warn!("Deleting pending respawn of {} on {}: spawn is not on this map", row.key, self.identity);
                self.services.persistence.delete_pending_respawn(map, instance, row.key);
                continue;
            };
            if self.respawns.get(row.key).is_some() {
                error!("Duplicate pending respawn row for {} on {}", row.key, self.identity);
            }
            self.respawns.restore(RespawnInfo {
                key: row.key,
                entry,
                due: row.due,
                grid,
            });
        }
        info!("Loaded {} pending respawns for {}", self.respawns.len(), self.identity);
    }

    /// Fire every respawn that is due, earliest first. Returns the spawns that came back.
    pub fn process_respawns(&mut self) -> Vec<SpawnKey> {
        let now = self.now();
        let mut respawned = Vec::new();
        while let Some(info) = self.respawns.next_due(now) {
            if let Some(pool) = self.services.pools.pool_of(info.key) {
                self.respawns.cancel(info.key, true);
                let released = self.services.pools.update_pool(&self.identity, pool, info.key);
                for key in released {
                    if self.respawn_pooled(key) {
                        respawned.push(key);
                    }
                }
                continue;
            }
            match self.check_respawn(&info, now) {
                Eligibility::Eligible => {
                    self.respawns.cancel(info.key, true);
                    if self.do_respawn(&info) {
                        respawned.push(info.key);
                    }
                }
                Eligibility::Cancel => {
                    self.respawns.cancel(info.key, true);
                }
                Eligibility::Defer(due) => {
                    self.respawns.reschedule(info.key, due.max(now + 1));
                }
            }
        }
        if !respawned.is_empty() {
            debug!("Respawned {} spawns on {}", respawned.len(), self.identity);
        }
        if !self.updating {
            self.commit_respawns();
        }
        respawned
    }

    pub(crate) fn check_respawn(&self, info: &RespawnInfo, now: Timestamp) -> Eligibility {
        let Some(spawn) = self.services.catalog.spawn_metadata(info.key) else {
            warn!("Pending respawn of unknown spawn {} on {}", info.key, self.identity);
            return Eligibility::Cancel;
        };
        if !self.is_spawn_group_active(spawn.group) {
            debug!("Respawn of {} dropped: group {} is inactive", info.key, spawn.group);
            return Eligibility::Cancel;
        }
        if self.is_spawn_occupied(info.key) {
            debug!("Respawn of {} dropped: spawn is still occupied", info.key);
            return Eligibility::Cancel;
        }
        if let Some(linked) = self.services.catalog.linked_respawn(info.key) {
            if linked == info.key {
                return Eligibility::Defer(now + self.config.self_linked_respawn_delay);
            }
            if let Some(linked_due) = self.respawns.due_time(linked) {
                let (low, high) = self.config.linked_respawn_jitter;
                let jitter = rand::thread_rng().gen_range(low..=high.max(low));
                return Eligibility::Defer(linked_due.max(now) + jitter);
            }
        }
        Eligibility::Eligible
    }

    fn do_respawn(&mut self, info: &RespawnInfo) -> bool {
        if !self.grids.is_loaded(info.grid) {
            trace!("{} will spawn when grid {} loads", info.key, info.grid);
            return false;
        }
        let Some(spawn) = self.services.catalog.spawn_metadata(info.key) else {
            return false;
        };
        self.instantiate_spawn(&spawn, false).is_some()
    }

    fn respawn_pooled(&mut self, key: SpawnKey) -> bool {
        let Some(spawn) = self.services.catalog.spawn_metadata(key) else {
            warn!("Pool released unknown spawn {key} on {}", self.identity);
            return false;
        };
        let loaded = spawn.grid().is_some_and(|grid| self.grids.is_loaded(grid));
        loaded && self.instantiate_spawn(&spawn, false).is_some()
    }

    /// Whether a live instance holds the spawn. Escorted creatures of escort groups do not
    /// count when escort respawns are dynamic.
    pub(crate) fn is_spawn_occupied(&self, key: SpawnKey) -> bool {
        self.entities
            .instances_of(key)
            .into_iter()
            .filter_map(|guid| self.entities.state(guid))
            .any(|state| self.is_occupying(state))
    }

    pub(crate) fn is_occupying(&self, state: &EntityState) -> bool {
        if state.is_destroyed() {
            return false;
        }
        match state.kind {
            EntityKind::Creature => state.alive && !(state.escorted && self.escort_respawns_dynamic(state.spawn)),
            _ => true,
        }
    }

    fn escort_respawns_dynamic(&self, link: Option<SpawnLink>) -> bool {
        self.config.escort_respawn_dynamic
            && link.is_some_and(|link| self.group_has_flag(link.group, SpawnGroupFlags::ESCORT_QUEST_NPC))
    }

    fn group_has_flag(&self, group: GroupId, flag: SpawnGroupFlags) -> bool {
        self.services
            .catalog
            .spawn_group(group)
            .is_some_and(|template| template.flags.contains(flag))
    }

    /// Seconds until a spawn comes back. Groups with a dynamic spawn rate come back sooner
    /// the more players are on the map, down to a floor.
    pub(crate) fn respawn_delay(&self, link: &SpawnLink) -> u64 {
        let base = link.respawn_delay;
        let settings = &self.config.dynamic_respawn;
        if !settings.enabled || !self.lifecycle.scales_respawns() {
            return base;
        }
        let (rate, minimum) = match link.key.kind {
            SpawnKind::Creature => (settings.creature_rate, settings.creature_minimum),
            SpawnKind::GameObject => (settings.gameobject_rate, settings.gameobject_minimum),
            SpawnKind::AreaTrigger => return base,
        };
        if !self.group_has_flag(link.group, SpawnGroupFlags::DYNAMIC_SPAWN_RATE) || self.players.is_empty() {
            return base;
        }
        let factor = rate / self.players.len() as f64;
        if factor >= 1.0 || base <= minimum {
            return base;
        }
        ((base as f64 * factor).ceil() as u64).max(minimum)
    }

    pub(crate) fn spawn_link(spawn: &SpawnMetadata) -> SpawnLink {
        SpawnLink {
            key: spawn.key,
            group: spawn.group,
            respawn_delay: spawn.respawn_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::world::config::Config;
    use crate::world::entity::{Entity, Inert, PlayerData};
    use crate::world::memory::{FIXTURE_EPOCH, Fixture};
    use crate::world::position::Position;
    use crate::world::services::{Persistence, RespawnRow};
    use crate::world::spawn::{SpawnGroupFlags, SpawnGroupTemplate, SpawnKey, SpawnMetadata};

    fn enter(map: &mut super::Map, id: u64) {
        map.add_player(Entity::player(PlayerData::new(id), Position::new(0.0, 0.0, 0.0), Inert))
            .unwrap();
    }

    #[test]
    fn saved_respawn_is_committed_outside_tick() {
        // Given
        let fixture = Fixture::new();
        let key = SpawnKey::creature(1);
        fixture.catalog.add_spawn(SpawnMetadata::new(key, 10, 0, Position::new(1.0, 1.0, 0.0)));
        let map = fixture.world_map(0);

        // When
        assert!(map.save_respawn_time(key, 500));

        // Then
        assert_eq!(map.respawn_time(key), Some(500));
        assert_eq!(fixture.persistence.load_pending_respawns(0, 0), vec![RespawnRow { key, due: 500 }]);
        assert!(map.save_respawn_time(key, 0));
        assert_eq!(map.respawn_time(key), None);
        assert!(fixture.persistence.load_pending_respawns(0, 0).is_empty());
    }

    #[test]
    fn load_deletes_rows_of_foreign_spawns() {
        // Given
        let fixture = Fixture::new();
        let ours = SpawnKey::creature(1);
        let foreign = SpawnKey::creature(2);
        let unknown = SpawnKey::creature(3);
        fixture.catalog.add_spawn(SpawnMetadata::new(ours, 10, 0, Position::new(1.0, 1.0, 0.0)));
        fixture.catalog.add_spawn(SpawnMetadata::new(foreign, 10, 1, Position::new(1.0, 1.0, 0.0)));
        for key in [ours, foreign, unknown] {
            fixture.persistence.save_pending_respawn(0, 0, key, 900);
        }

        // When
        let map = fixture.world_map(0);

        // Then
        assert_eq!(map.respawn_time(ours), Some(900));
        assert_eq!(map.pending_respawns().len(), 1);
        assert_eq!(fixture.persistence.load_pending_respawns(0, 0), vec![RespawnRow { key: ours, due: 900 }]);
    }

    #[test]
    fn dynamic_rate_shortens_delay_down_to_minimum() {
        // Given
        let mut config = Config::default();
        config.dynamic_respawn.enabled = true;
        config.dynamic_respawn.creature_rate = 2.0;
        config.dynamic_respawn.creature_minimum = 30;
        let fixture = Fixture::with_config(config);
        fixture
            .catalog
            .add_group(SpawnGroupTemplate::new(5, "herd", Some(0), SpawnGroupFlags::DYNAMIC_SPAWN_RATE));
        let key = SpawnKey::creature(1);
        let spawn = SpawnMetadata::new(key, 10, 0, Position::new(1.0, 1.0, 0.0))
            .in_group(5)
            .with_respawn_delay(300);
        fixture.catalog.add_spawn(spawn.clone());
        let mut map = fixture.world_map(0);
        let link = super::Map::spawn_link(&spawn);

        // Then
        enter(&mut map, 1);
        assert_eq!(map.respawn_delay(&link), 300);
        for id in 2..=4 {
            enter(&mut map, id);
        }
        assert_eq!(map.respawn_delay(&link), 150);
        for id in 5..=40 {
            enter(&mut map, id);
        }
        assert_eq!(map.respawn_delay(&link), 30);
    }

    #[test]
    fn battlegrounds_never_scale() {
        let mut config = Config::default();
        config.dynamic_respawn.enabled = true;
        let fixture = Fixture::with_config(config);
        fixture
            .catalog
            .add_group(SpawnGroupTemplate::new(5, "herd", None, SpawnGroupFlags::DYNAMIC_SPAWN_RATE));
        let spawn = SpawnMetadata::new(SpawnKey::creature(1), 10, 30, Position::new(1.0, 1.0, 0.0)).in_group(5);
        let map = fixture.battleground_map(30, 1);
        assert_eq!(map.respawn_delay(&super::Map::spawn_link(&spawn)), 300);
    }

    #[test]
    fn linked_spawn_waits_for_its_partner() {
        // Given
        let fixture = Fixture::new();
        let (guard, captain) = (SpawnKey::creature(1), SpawnKey::creature(2));
        let near = Position::new(1.0, 1.0, 0.0);
        fixture
            .catalog
            .add_spawn(SpawnMetadata::new(guard, 10, 0, near).with_respawn_delay(60));
        fixture.catalog.add_spawn(SpawnMetadata::new(captain, 11, 0, near));
        fixture.catalog.link(guard, captain);
        let mut map = fixture.world_map(0);
        let captain_due = FIXTURE_EPOCH + 200;
        map.save_respawn_time(captain, captain_due);
        enter(&mut map, 1);
        let victim = map.find_by_spawn_id(guard).unwrap().guid();
        map.kill(victim);

        // When
        fixture.clock.advance(60);
        let respawned = map.process_respawns();

        // Then
        assert!(respawned.is_empty());
        let deferred = map.respawn_time(guard).unwrap();
        assert!((captain_due + 5..=captain_due + 15).contains(&deferred));
        assert!(!map.find_by_spawn_id(guard).unwrap().is_alive());

        // When
        map.remove_respawn_time(captain, false);
        fixture.clock.set(deferred);

        // Then
        assert_eq!(map.process_respawns(), vec![guard]);
        assert!(map.find_by_spawn_id(guard).unwrap().is_alive());
        assert_eq!(map.respawn_time(guard), None);
    }

    #[test]
    fn pooled_respawn_defers_to_the_pool() {
        // Given
        let fixture = Fixture::new();
        let (first, second) = (SpawnKey::creature(1), SpawnKey::creature(2));
        for (key, x) in [(first, 1.0), (second, 4.0)] {
            fixture
                .catalog
                .add_spawn(SpawnMetadata::new(key, 10, 0, Position::new(x, 1.0, 0.0)).with_respawn_delay(60));
            fixture.pools.add(3, key);
        }
        let mut map = fixture.world_map(0);
        enter(&mut map, 1);
        let victim = map.find_by_spawn_id(first).unwrap().guid();
        map.kill(victim);
        assert_eq!(fixture.persistence.len(), 1);

        // When the pool hands the slot to a member that is still up
        fixture.clock.advance(60);
        let respawned = map.process_respawns();

        // Then
        assert!(respawned.is_empty());
        assert_eq!(map.respawn_time(first), None);
        assert!(map.pending_respawns().is_empty());
        assert!(fixture.persistence.is_empty());
        assert!(!map.find_by_spawn_id(first).unwrap().is_alive());
        assert_eq!(map.entities().instances_of(second).len(), 1);

        // When the pool hands the slot back to the dead member
        let survivor = map.find_by_spawn_id(second).unwrap().guid();
        map.kill(survivor);
        fixture.clock.advance(60);
        let respawned = map.process_respawns();

        // Then
        assert_eq!(respawned, vec![first]);
        assert!(map.find_by_spawn_id(first).unwrap().is_alive());
        assert!(!map.find_by_spawn_id(second).unwrap().is_alive());
        assert!(fixture.persistence.is_empty());
    }
}
