use log::{debug, error, info, warn};

use super::Map;
use crate::core::time::Timestamp;
use crate::world::entity::{Command, Entity, EntityKind, EntityState, Guid};
use crate::world::error::{EnterError, RelocateError};
use crate::world::grid::CellCoord;
use crate::world::hooks::VisibilityChange;
use crate::world::position::Position;
use crate::world::variant::AdmissionContext;

/// What a successful [`Map::relocate`] did with the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocateOutcome {
    Moved,
    /// The target grid was not loaded and the entity went back to its home position.
    MovedHome,
    /// Neither the target nor the home grid was loaded. The entity was queued for removal.
    Removed,
}

fn cell_of(position: &Position) -> Option<CellCoord> {
    if !position.is_valid() {
        return None;
    }
    CellCoord::from_position(position.x, position.y)
}

/// Players and active entities pull grids in around them. Everything else lives in
/// whatever is already there.
fn loads_grids(state: &EntityState) -> bool {
    state.is_player() || state.active
}

impl Map {
    pub(crate) fn now(&self) -> Timestamp {
        self.services.clock.now()
    }

    fn players_except_gms(&self) -> usize {
        self.players
            .iter()
            .filter_map(|guid| self.entities.state(*guid))
            .filter(|state| state.player.as_ref().is_some_and(|data| !data.is_gm))
            .count()
    }

    /// Admit a player. The map's own checks run first, then the variant's admission policy.
    pub fn add_player(&mut self, entity: Entity) -> Result<Guid, EnterError> {
        let Some(data) = entity.state.player.clone() else {
            return Err(EnterError::NotAPlayer);
        };
        if self.find_player(data.id).is_some() {
            error!("Player {} is already in {}", data.id, self.identity);
            return Err(EnterError::AlreadyInMap);
        }
        if cell_of(&entity.state.position).is_none() {
            warn!(
                "Player {} tried to enter {} at invalid position {:?}",
                data.id, self.identity, entity.state.position
            );
            return Err(EnterError::InvalidPosition);
        }

        let ctx = AdmissionContext {
            identity: &self.identity,
            players_except_gms: self.players_except_gms(),
            now: self.now(),
        };
        if let Err(err) = self.admission.can_enter(&ctx, &data) {
            debug!("Player {} refused by {}: {err}", data.id, self.identity);
            return Err(err);
        }
        self.admission.on_enter(&ctx, &data);

        let guid = self.insert_entity(entity).ok_or(EnterError::InvalidPosition)?;
        self.lifecycle.on_player_enter(guid);
        self.services.hooks.player_entered(&self.identity, guid);
        info!("Player {} entered {} as {guid}", data.id, self.identity);
        Ok(guid)
    }

    /// Take a player off the map right away.
    pub fn remove_player(&mut self, guid: Guid) -> bool {
        if !self.entities.state(guid).is_some_and(EntityState::is_player) {
            return false;
        }
        if self.remove_now(guid).is_none() {
            return false;
        }
        let remaining = self.players.len();
        self.lifecycle.on_player_leave(guid, remaining);
        self.services.hooks.player_left(&self.identity, guid);
        info!("Player {guid} left {} ({remaining} remaining)", self.identity);
        true
    }

    /// Place a non-player entity on the map.
    pub fn add_to_map(&mut self, entity: Entity) -> Option<Guid> {
        if entity.state.is_player() {
            warn!("Players enter {} through add_player", self.identity);
            return None;
        }
        self.insert_entity(entity)
    }

    pub(crate) fn insert_entity(&mut self, mut entity: Entity) -> Option<Guid> {
        let Some(cell) = cell_of(&entity.state.position) else {
            warn!(
                "Refused {:?} entry {} at invalid position {:?} on {}",
                entity.state.kind, entity.state.entry, entity.state.position, self.identity
            );
            return None;
        };
        let grid = cell.grid();
        if loads_grids(&entity.state) {
            self.ensure_grid_loaded(grid);
            self.activate_grid(grid);
        } else {
            self.grids.ensure_created(grid);
        }

        let state = &mut entity.state;
        state.cell = Some(cell);
        state.in_world = true;
        state.destroyed = false;
        state.pending_removal = false;
        state.mark_moved();
        let (kind, active) = (state.kind, state.active);

        let guid = self.entities.insert(entity);
        self.grids.insert(guid, kind.bucket(), cell);
        match kind {
            EntityKind::Player => self.players.push(guid),
            EntityKind::Transport => {
                self.transports.push(guid);
                if active {
                    self.active.push(guid);
                }
            }
            _ if active => self.active.push(guid),
            _ => {}
        }
        if let Some(state) = self.entities.state(guid) {
            self.services.hooks.entity_added(&self.identity, state);
        }
        Some(guid)
    }

    /// Queue a non-player entity for removal at the end of the tick.
    pub fn remove_from_map(&mut self, guid: Guid) -> bool {
        if self.entities.state(guid).is_some_and(EntityState::is_player) {
            return self.remove_player(guid);
        }
        self.mark_for_removal(guid)
    }

    pub(crate) fn mark_for_removal(&mut self, guid: Guid) -> bool {
        let Some(state) = self.entities.state_mut(guid) else {
            return false;
        };
        if state.is_destroyed() {
            return false;
        }
        state.pending_removal = true;
        self.detach_transport(guid);
        self.active.retain(|g| *g != guid);
        self.transports.retain(|g| *g != guid);
        self.remove_list.push(guid);
        true
    }

    pub(crate) fn remove_all_in_remove_list(&mut self) {
        let removals = std::mem::take(&mut self.remove_list);
        for guid in removals {
            if self.entities.state(guid).is_some_and(EntityState::is_player) {
                self.remove_player(guid);
            } else {
                self.remove_now(guid);
            }
        }
    }

    /// Unlink an entity from its grid, the map lists and every visible set, then drop it
    /// from the registry.
    pub(crate) fn remove_now(&mut self, guid: Guid) -> Option<Entity> {
        let (kind, cell) = {
            let state = self.entities.state(guid)?;
            (state.kind, state.cell)
        };
        self.detach_transport(guid);
        if let Some(cell) = cell {
            self.grids.remove(guid, kind.bucket(), cell);
        }
        self.players.retain(|g| *g != guid);
        self.active.retain(|g| *g != guid);
        self.transports.retain(|g| *g != guid);
        self.move_list.retain(|(g, _)| *g != guid);

        for viewer in self.players.iter().copied() {
            let Some(state) = self.entities.state_mut(viewer) else {
                continue;
            };
            if state.visible.remove(&guid) {
                let change = VisibilityChange {
                    viewer,
                    appeared: Vec::new(),
                    disappeared: vec![guid],
                };
                self.services.hooks.visibility_changed(&self.identity, &change);
            }
        }

        let mut entity = self.entities.remove(guid)?;
        let state = &mut entity.state;
        state.destroyed = true;
        state.pending_removal = false;
        state.in_world = false;
        state.cell = None;
        state.visible.clear();
        self.services.hooks.entity_removed(&self.identity, guid);
        Some(entity)
    }

    /// Kill an entity. Creatures leave a corpse that decays after the configured delay; game
    /// objects and area triggers go away at once. Spawned entities schedule their respawn.
    pub fn kill(&mut self, guid: Guid) -> bool {
        let now = self.now();
        let corpse_decay = self.config.corpse_decay;
        let Some(state) = self.entities.state_mut(guid) else {
            return false;
        };
        if !state.alive || state.is_destroyed() {
            return false;
        }
        state.alive = false;
        state.escorted = false;
        state.changed = true;
        let (kind, link) = (state.kind, state.spawn);
        if kind == EntityKind::Creature {
            state.corpse_expires_at = Some(now + corpse_decay);
        }

        if let Some(link) = link {
            let due = now + self.respawn_delay(&link);
            self.save_respawn_time(link.key, due);
        }
        match kind {
            EntityKind::Player | EntityKind::Creature => {}
            _ => {
                self.mark_for_removal(guid);
            }
        }
        debug!("{kind:?} {guid} died on {}", self.identity);
        true
    }

    /// Remove a non-player entity. A living spawned entity schedules its respawn unless one
    /// is already pending.
    pub fn despawn(&mut self, guid: Guid) -> bool {
        let Some(state) = self.entities.state(guid) else {
            return false;
        };
        if state.is_destroyed() {
            return false;
        }
        if state.is_player() {
            warn!("Player {guid} cannot be despawned");
            return false;
        }
        if let Some(link) = state.spawn.filter(|_| state.alive) {
            if self.respawns.get(link.key).is_none() {
                let due = self.now() + self.respawn_delay(&link);
                self.save_respawn_time(link.key, due);
            }
        }
        self.mark_for_removal(guid)
    }

    /// Flag an entity as active. Active entities keep the grids around them loaded and
    /// updating.
    pub fn set_active(&mut self, guid: Guid, active: bool) {
        let Some(state) = self.entities.state_mut(guid) else {
            return;
        };
        if state.active == active || state.is_destroyed() {
            return;
        }
        state.active = active;
        let (kind, cell) = (state.kind, state.cell);
        if kind == EntityKind::Player {
            return;
        }
        if active {
            self.active.push(guid);
            if let Some(cell) = cell {
                self.ensure_grid_loaded(cell.grid());
                self.activate_grid(cell.grid());
            }
        } else {
            self.active.retain(|g| *g != guid);
        }
    }

    pub fn set_escorted(&mut self, guid: Guid, escorted: bool) {
        if let Some(state) = self.entities.state_mut(guid) {
            state.escorted = escorted;
        }
    }

    pub fn set_phase_mask(&mut self, guid: Guid, phase_mask: u32) {
        if let Some(state) = self.entities.state_mut(guid) {
            if state.phase_mask != phase_mask {
                state.phase_mask = phase_mask;
                state.mark_moved();
            }
        }
    }

    pub fn board_transport(&mut self, passenger: Guid, transport: Guid) -> bool {
        if passenger == transport
            || !self.entities.contains(passenger)
            || self.entities.state(transport).is_none_or(|s| s.kind != EntityKind::Transport)
        {
            return false;
        }
        self.leave_transport(passenger);
        if let Some(state) = self.entities.state_mut(passenger) {
            state.transport = Some(transport);
        }
        if let Some(state) = self.entities.state_mut(transport) {
            state.passengers.push(passenger);
        }
        true
    }

    pub fn leave_transport(&mut self, passenger: Guid) {
        let Some(transport) = self.entities.state_mut(passenger).and_then(|s| s.transport.take()) else {
            return;
        };
        if let Some(state) = self.entities.state_mut(transport) {
            state.passengers.retain(|g| *g != passenger);
        }
    }

    fn detach_transport(&mut self, guid: Guid) {
        self.leave_transport(guid);
        let passengers = self
            .entities
            .state_mut(guid)
            .map(|state| std::mem::take(&mut state.passengers))
            .unwrap_or_default();
        for passenger in passengers {
            if let Some(state) = self.entities.state_mut(passenger) {
                state.transport = None;
            }
        }
    }

    /// Move an entity now.
    ///
    /// An invalid target leaves the entity where it was. A non-active entity crossing into an
    /// unloaded grid falls back to its home position, and is removed if that grid is not
    /// loaded either.
    pub fn relocate(&mut self, guid: Guid, position: Position) -> Result<RelocateOutcome, RelocateError> {
        let (current, can_load, home) = match self.entities.state(guid) {
            Some(state) if !state.is_destroyed() => (state.cell, loads_grids(state), state.home),
            _ => return Err(RelocateError::UnknownEntity(guid)),
        };
        let Some(cell) = cell_of(&position) else {
            warn!("Refused relocation of {guid} to invalid position {position:?} on {}", self.identity);
            return Err(RelocateError::InvalidPosition);
        };

        let grid = cell.grid();
        let crosses = current.is_none_or(|c| c.grid() != grid);
        if crosses && !self.grids.is_loaded(grid) {
            if can_load {
                self.ensure_grid_loaded(grid);
            } else {
                debug!("{guid} cannot enter unloaded grid {grid} on {}", self.identity);
                return Ok(self.relocate_home(guid, home));
            }
        }
        self.place(guid, position, cell);
        Ok(RelocateOutcome::Moved)
    }

    fn relocate_home(&mut self, guid: Guid, home: Option<Position>) -> RelocateOutcome {
        let target = home.and_then(|home| cell_of(&home).map(|cell| (home, cell)));
        match target {
            Some((home, cell)) if self.grids.is_loaded(cell.grid()) => {
                self.place(guid, home, cell);
                RelocateOutcome::MovedHome
            }
            _ => {
                debug!("{guid} has nowhere to go on {}, removing", self.identity);
                self.mark_for_removal(guid);
                RelocateOutcome::Removed
            }
        }
    }

    fn place(&mut self, guid: Guid, position: Position, cell: CellCoord) {
        let Some(state) = self.entities.state_mut(guid) else {
            return;
        };
        let previous = state.cell.replace(cell);
        state.position = position;
        state.mark_moved();
        let (bucket, activates) = (state.kind.bucket(), loads_grids(state));
        if previous == Some(cell) {
            return;
        }
        if let Some(previous) = previous {
            self.grids.remove(guid, bucket, previous);
        }
        self.grids.ensure_created(cell.grid());
        self.grids.insert(guid, bucket, cell);
        if activates {
            self.activate_grid(cell.grid());
        }
    }

    /// Defer a relocation to the move-list flush at the end of the tick.
    pub fn queue_move(&mut self, guid: Guid, position: Position) {
        self.move_list.push((guid, position));
    }

    pub(crate) fn flush_move_list(&mut self) {
        let moves = std::mem::take(&mut self.move_list);
        for (guid, position) in moves {
            if let Err(err) = self.relocate(guid, position) {
                debug!("Queued move of {guid} dropped: {err}");
            }
        }
    }

    pub(crate) fn apply_command(&mut self, guid: Guid, command: Command) {
        match command {
            Command::MoveTo(position) => self.queue_move(guid, position),
            Command::Die => {
                self.kill(guid);
            }
            Command::Despawn => {
                self.despawn(guid);
            }
            Command::SetActive(active) => self.set_active(guid, active),
            Command::LeaveMap => {
                if !self.remove_player(guid) {
                    warn!("{guid} asked to leave {} but is not a player on it", self.identity);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::Clock;
    use crate::world::entity::{Inert, PlayerData};
    use crate::world::memory::Fixture;
    use crate::world::spawn::{SpawnKey, SpawnMetadata};

    fn player(id: u64, position: Position) -> Entity {
        Entity::player(PlayerData::new(id), position, Inert)
    }

    #[test]
    fn add_player_checks_map_rules_first() {
        // Given
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);

        // When
        let first = map.add_player(player(1, Position::new(10.0, 10.0, 0.0)));
        let again = map.add_player(player(1, Position::new(20.0, 10.0, 0.0)));
        let outside = map.add_player(player(2, Position::new(1.0e6, 0.0, 0.0)));
        let creature = map.add_player(Entity::new(EntityKind::Creature, 1, Position::default(), Inert));

        // Then
        assert!(first.is_ok());
        assert_eq!(again, Err(EnterError::AlreadyInMap));
        assert_eq!(outside, Err(EnterError::InvalidPosition));
        assert_eq!(creature, Err(EnterError::NotAPlayer));
        assert_eq!(map.player_count(), 1);
    }

    #[test]
    fn player_loads_and_activates_grid() {
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        let position = Position::new(100.0, -50.0, 0.0);
        let guid = map.add_player(player(1, position)).unwrap();

        let cell = CellCoord::from_position(position.x, position.y).unwrap();
        assert!(map.is_grid_loaded(cell.grid()));
        assert_eq!(map.entity(guid).unwrap().cell(), Some(cell));
        assert!(map.grids().cell(cell).unwrap().contains(EntityKind::Player.bucket(), guid));
    }

    #[test]
    fn invalid_relocation_keeps_position() {
        // Given
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        let start = Position::new(5.0, 5.0, 0.0);
        let guid = map.add_player(player(1, start)).unwrap();

        // When
        let result = map.relocate(guid, Position::new(f32::NAN, 0.0, 0.0));

        // Then
        assert_eq!(result, Err(RelocateError::InvalidPosition));
        assert_eq!(map.entity(guid).unwrap().position(), start);
    }

    #[test]
    fn cell_move_within_grid_swaps_buckets() {
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        let guid = map.add_player(player(1, Position::new(1.0, 1.0, 0.0))).unwrap();
        let from = map.entity(guid).unwrap().cell().unwrap();

        let target = Position::new(1.0 + crate::world::grid::CELL_SIZE, 1.0, 0.0);
        assert_eq!(map.relocate(guid, target), Ok(RelocateOutcome::Moved));

        let to = map.entity(guid).unwrap().cell().unwrap();
        assert_ne!(from, to);
        assert_eq!(from.grid(), to.grid());
        assert!(!map.grids().cell(from).unwrap().contains(EntityKind::Player.bucket(), guid));
        assert!(map.grids().cell(to).unwrap().contains(EntityKind::Player.bucket(), guid));
    }

    #[test]
    fn non_active_entity_falls_back_home_then_removal() {
        // Given
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        map.add_player(player(1, Position::new(0.0, 0.0, 0.0))).unwrap();
        let home = Position::new(10.0, 10.0, 0.0);
        let wolf = map
            .add_to_map(Entity::new(EntityKind::Creature, 1, home, Inert).with_home(home))
            .unwrap();
        let stray = map
            .add_to_map(Entity::new(EntityKind::Creature, 2, Position::new(12.0, 10.0, 0.0), Inert))
            .unwrap();
        let far_away = Position::new(5000.0, 5000.0, 0.0);

        // When
        let wolf_moved = map.relocate(wolf, far_away);
        let stray_moved = map.relocate(stray, far_away);

        // Then
        assert_eq!(wolf_moved, Ok(RelocateOutcome::MovedHome));
        assert_eq!(map.entity(wolf).unwrap().position(), home);
        assert_eq!(stray_moved, Ok(RelocateOutcome::Removed));
        assert!(map.entity(stray).unwrap().is_destroyed());
        map.remove_all_in_remove_list();
        assert!(map.entity(stray).is_none());
    }

    #[test]
    fn killing_spawned_gameobject_schedules_respawn_and_removes_it() {
        // Given
        let fixture = Fixture::new();
        let key = SpawnKey::gameobject(40);
        fixture
            .catalog
            .add_spawn(SpawnMetadata::new(key, 300, 0, Position::new(3.0, 3.0, 0.0)).with_respawn_delay(60));
        let mut map = fixture.world_map(0);
        map.add_player(player(1, Position::new(0.0, 0.0, 0.0))).unwrap();
        let chest = map.find_by_spawn_id(key).unwrap().guid();

        // When
        assert!(map.kill(chest));

        // Then
        assert_eq!(map.respawn_time(key), Some(fixture.clock.now() + 60));
        assert!(map.entity(chest).unwrap().is_destroyed());
        map.remove_all_in_remove_list();
        assert!(map.entity(chest).is_none());
    }

    #[test]
    fn transport_boarding_is_cleared_on_removal() {
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        let boat = map
            .add_to_map(Entity::new(EntityKind::Transport, 9, Position::new(0.0, 0.0, 0.0), Inert))
            .unwrap();
        let guid = map.add_player(player(1, Position::new(1.0, 0.0, 0.0))).unwrap();

        assert!(map.board_transport(guid, boat));
        assert_eq!(map.entity(boat).unwrap().passengers(), &[guid]);

        map.remove_from_map(boat);
        map.remove_all_in_remove_list();
        assert_eq!(map.entity(guid).unwrap().transport(), None);
    }
}
