use log::{debug, error, info, warn};

use super::Map;
use crate::world::entity::Guid;
use crate::world::spawn::{GroupId, GroupTransition, SpawnGroupState, SpawnGroupTemplate, DEFAULT_GROUP};

impl Map {
    fn spawn_group_template(&self, group: GroupId) -> Option<SpawnGroupTemplate> {
        let template = self.services.catalog.spawn_group(group);
        if template.is_none() {
            error!("Unknown spawn group {group} on {}", self.identity);
        }
        template
    }

    /// Templates of groups that bulk operations may touch on this map.
    fn toggleable_group(&self, group: GroupId) -> Option<SpawnGroupTemplate> {
        let template = self.spawn_group_template(group)?;
        if template.is_system() {
            warn!("System spawn group {group} cannot be toggled");
            return None;
        }
        if template.map_id.is_some_and(|map| map != self.identity.id) {
            error!("Spawn group {group} does not belong to {}", self.identity);
            return None;
        }
        Some(template)
    }

    pub fn is_spawn_group_active(&self, group: GroupId) -> bool {
        match self.services.catalog.spawn_group(group) {
            Some(template) => self.spawn_groups.is_active(&template),
            None if group == DEFAULT_GROUP => true,
            None => {
                error!("Unknown spawn group {group} queried on {}", self.identity);
                false
            }
        }
    }

    pub fn spawn_group_state(&self, group: GroupId) -> Option<SpawnGroupState> {
        self.services
            .catalog
            .spawn_group(group)
            .map(|template| self.spawn_groups.state(&template))
    }

    /// Flip a group's flag without spawning or despawning anything. The group is manual from
    /// then on.
    pub fn set_spawn_group_active(&mut self, group: GroupId, active: bool) -> bool {
        if self.toggleable_group(group).is_none() {
            return false;
        }
        self.spawn_groups.toggle(group, active);
        true
    }

    /// Activate a group and spawn its members in loaded grids. Members with a pending respawn
    /// are skipped unless `ignore_respawn`, which also clears their respawn time. `force`
    /// replaces live occupants. The group is manual from then on.
    pub fn spawn_group_spawn(&mut self, group: GroupId, ignore_respawn: bool, force: bool) -> Option<Vec<Guid>> {
        self.toggleable_group(group)?;
        self.spawn_groups.toggle(group, true);
        Some(self.spawn_group_members(group, ignore_respawn, force))
    }

    fn spawn_group_members(&mut self, group: GroupId, ignore_respawn: bool, force: bool) -> Vec<Guid> {
        self.spawn_groups.set_active(group, true);

        let mut spawned = Vec::new();
        for spawn in self.services.catalog.spawns_for_group(group) {
            if spawn.map_id != self.identity.id || !spawn.spawns_in(self.identity.difficulty) {
                continue;
            }
            if ignore_respawn {
                self.remove_respawn_time(spawn.key, true);
            } else if self.respawns.get(spawn.key).is_some() {
                continue;
            }
            if !spawn.grid().is_some_and(|grid| self.grids.is_loaded(grid)) {
                continue;
            }
            if let Some(guid) = self.instantiate_spawn(&spawn, force) {
                spawned.push(guid);
            }
        }
        info!("Spawn group {group} spawned {} entities on {}", spawned.len(), self.identity);
        spawned
    }

    /// Deactivate a group and remove its live members. Returns how many were removed. The group
    /// is manual from then on.
    pub fn spawn_group_despawn(&mut self, group: GroupId, delete_respawn_times: bool) -> Option<usize> {
        self.toggleable_group(group)?;
        self.spawn_groups.toggle(group, false);
        Some(self.despawn_group_members(group, delete_respawn_times))
    }

    fn despawn_group_members(&mut self, group: GroupId, delete_respawn_times: bool) -> usize {
        let mut removed = 0;
        for spawn in self.services.catalog.spawns_for_group(group) {
            if spawn.map_id != self.identity.id {
                continue;
            }
            if delete_respawn_times {
                self.remove_respawn_time(spawn.key, true);
            }
            for guid in self.entities.instances_of(spawn.key) {
                if self.mark_for_removal(guid) {
                    removed += 1;
                }
            }
        }
        self.spawn_groups.set_active(group, false);
        if !self.updating {
            self.remove_all_in_remove_list();
        }
        info!("Spawn group {group} despawned {removed} entities on {}", self.identity);
        removed
    }

    /// Seed the state of condition-driven groups before any grid loads.
    pub(crate) fn init_spawn_groups(&mut self) {
        for template in self.services.catalog.spawn_groups_for_map(self.identity.id) {
            if template.is_system() || template.is_manual() {
                continue;
            }
            let active = self
                .services
                .conditions
                .is_group_meeting_activation_conditions(template.id, &self.identity);
            if !active {
                debug!("Spawn group {} starts inactive on {}", template.id, self.identity);
            }
            self.spawn_groups.set_active(template.id, active);
        }
    }

    /// Re-evaluate activation conditions of the map's condition-driven groups.
    pub(crate) fn update_spawn_group_conditions(&mut self) {
        for template in self.services.catalog.spawn_groups_for_map(self.identity.id) {
            if template.is_system() || self.spawn_groups.is_manual(&template) {
                continue;
            }
            let active = self.spawn_groups.is_active(&template);
            let should_be_active = self
                .services
                .conditions
                .is_group_meeting_activation_conditions(template.id, &self.identity);
            let transition = GroupTransition::decide(&template, active, should_be_active);
            if transition != GroupTransition::None {
                debug!("Spawn group {} on {}: {transition:?}", template.id, self.identity);
            }
            match transition {
                GroupTransition::None => {}
                GroupTransition::Spawn => {
                    self.spawn_group_members(template.id, false, false);
                }
                GroupTransition::Despawn => {
                    self.despawn_group_members(template.id, true);
                }
                GroupTransition::Deactivate => self.spawn_groups.set_active(template.id, false),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::world::entity::{Entity, Inert, PlayerData};
    use crate::world::memory::Fixture;
    use crate::world::position::Position;
    use crate::world::spawn::{SpawnGroupFlags, SpawnGroupTemplate, SpawnKey, SpawnMetadata};

    fn fixture_with_group(flags: SpawnGroupFlags) -> Fixture {
        let fixture = Fixture::new();
        fixture.catalog.add_group(SpawnGroupTemplate::new(7, "camp", Some(0), flags));
        fixture.catalog.add_group(SpawnGroupTemplate::new(1, "system", None, SpawnGroupFlags::SYSTEM));
        for id in 1..=3 {
            let at = Position::new(10.0 * id as f32, 0.0, 0.0);
            fixture
                .catalog
                .add_spawn(SpawnMetadata::new(SpawnKey::creature(id), 50, 0, at).in_group(7));
        }
        // Far from the player, in a grid that stays unloaded.
        fixture.catalog.add_spawn(
            SpawnMetadata::new(SpawnKey::creature(4), 50, 0, Position::new(4000.0, 4000.0, 0.0)).in_group(7),
        );
        fixture
    }

    fn enter(map: &mut super::Map) {
        map.add_player(Entity::player(PlayerData::new(1), Position::new(0.0, 0.0, 0.0), Inert))
            .unwrap();
    }

    #[test]
    fn manual_group_spawns_members_in_loaded_grids() {
        // Given
        let fixture = fixture_with_group(SpawnGroupFlags::MANUAL_SPAWN);
        let mut map = fixture.world_map(0);
        enter(&mut map);
        assert!(!map.is_spawn_group_active(7));
        assert_eq!(map.entities().len(), 1);

        // When
        let spawned = map.spawn_group_spawn(7, false, false).unwrap();

        // Then
        assert_eq!(spawned.len(), 3);
        assert!(map.is_spawn_group_active(7));
        assert!(map.find_by_spawn_id(SpawnKey::creature(4)).is_none());
        assert_eq!(map.spawn_group_spawn(7, false, false).unwrap().len(), 0);
    }

    #[test]
    fn despawn_clears_members_and_respawn_times() {
        // Given
        let fixture = fixture_with_group(SpawnGroupFlags::NONE);
        let mut map = fixture.world_map(0);
        enter(&mut map);
        let victim = map.find_by_spawn_id(SpawnKey::creature(1)).unwrap().guid();
        map.kill(victim);
        assert!(map.respawn_time(SpawnKey::creature(1)).is_some());

        // When
        let removed = map.spawn_group_despawn(7, true).unwrap();

        // Then
        assert_eq!(removed, 3);
        assert!(!map.is_spawn_group_active(7));
        assert!(map.respawn_time(SpawnKey::creature(1)).is_none());
        assert_eq!(map.entities().len(), 1);
    }

    #[test]
    fn system_groups_cannot_be_toggled() {
        let fixture = fixture_with_group(SpawnGroupFlags::NONE);
        let mut map = fixture.world_map(0);
        assert!(!map.set_spawn_group_active(1, false));
        assert!(map.spawn_group_spawn(1, false, false).is_none());
        assert!(map.is_spawn_group_active(1));
        assert!(!map.is_spawn_group_active(99));
    }

    #[test]
    fn failed_conditions_despawn_flagged_group() {
        // Given
        let fixture = fixture_with_group(SpawnGroupFlags::DESPAWN_ON_CONDITION_FAILURE);
        let mut map = fixture.world_map(0);
        enter(&mut map);
        assert_eq!(map.entities().len(), 4);

        // When
        fixture.conditions.set(7, false);
        map.update_spawn_group_conditions();

        // Then
        assert!(!map.is_spawn_group_active(7));
        assert_eq!(map.entities().len(), 1);

        // When
        fixture.conditions.set(7, true);
        map.update_spawn_group_conditions();

        // Then
        assert!(map.is_spawn_group_active(7));
        assert_eq!(map.entities().len(), 4);
    }
}
