use std::time::Duration;

use log::{debug, error, info, trace, warn};

use super::Map;
use crate::world::entity::{EntityKind, EntityState, Guid};
use crate::world::grid::{CellArea, CellCoord, GridCoord, GridState, Interest, CELL_SIZE};
use crate::world::position::Position;
use crate::world::spawn::SpawnMetadata;

/// Callback applied to the entities of visited cells.
pub trait Visitor {
    /// Buckets this visitor wants to see.
    fn interest(&self) -> Interest {
        Interest::ALL
    }

    fn visit(&mut self, entity: &EntityState);
}

impl<F> Visitor for F
where
    F: FnMut(&EntityState),
{
    fn visit(&mut self, entity: &EntityState) {
        self(entity)
    }
}

impl Map {
    /// Make sure the grid owning `cell` exists and has its spawns loaded. Returns whether this
    /// call did the loading.
    pub fn ensure_loaded(&mut self, cell: CellCoord) -> bool {
        if !cell.is_valid() {
            return false;
        }
        self.ensure_grid_loaded(cell.grid())
    }

    pub(crate) fn ensure_grid_loaded(&mut self, coord: GridCoord) -> bool {
        if !coord.is_valid() {
            return false;
        }
        let first_load = {
            let (grid, created) = self.grids.ensure_created(coord);
            if created {
                trace!("Created grid {coord}");
            }
            grid.mark_loaded()
        };
        if !first_load {
            return false;
        }

        let spawns = self.services.catalog.spawns_in_grid(self.identity.id, coord);
        let mut loaded = 0;
        for spawn in spawns {
            if spawn.map_id != self.identity.id
                || !spawn.spawns_in(self.identity.difficulty)
                || !self.is_spawn_group_active(spawn.group)
                || self.respawns.get(spawn.key).is_some()
            {
                continue;
            }
            if self.instantiate_spawn(&spawn, false).is_some() {
                loaded += 1;
            }
        }
        self.services.hooks.grid_loaded(&self.identity, coord);
        debug!("Loaded grid {coord} of {} with {loaded} spawns", self.identity);
        true
    }

    /// Build the entity for a spawn and place it. A live occupant blocks the spawn unless
    /// `force` is set, in which case the occupant is replaced. Dead occupants are removed.
    pub(crate) fn instantiate_spawn(&mut self, spawn: &SpawnMetadata, force: bool) -> Option<Guid> {
        let mut replaced = Vec::new();
        for guid in self.entities.instances_of(spawn.key) {
            let Some(state) = self.entities.state(guid) else {
                continue;
            };
            if state.is_destroyed() {
                continue;
            }
            if self.is_occupying(state) {
                if !force {
                    trace!("Spawn {} is already occupied by {guid}", spawn.key);
                    return None;
                }
                replaced.push(guid);
            } else if !state.alive {
                replaced.push(guid);
            }
        }
        for guid in replaced {
            self.remove_now(guid);
        }

        let Some(mut entity) = self.services.factory.create_from_spawn(spawn, &self.identity) else {
            warn!("No entity could be built for spawn {} on {}", spawn.key, self.identity);
            return None;
        };
        let kind = EntityKind::from(spawn.key.kind);
        if entity.state.kind != kind {
            error!(
                "Spawn {} produced a {:?}, expected a {kind:?}",
                spawn.key, entity.state.kind
            );
            return None;
        }
        entity.state.spawn = Some(Self::spawn_link(spawn));
        entity.state.home = Some(spawn.position);
        self.insert_entity(entity)
    }

    /// Apply `visitor` to every entity in a cell of a created grid.
    pub fn visit_cell<V>(&self, cell: CellCoord, visitor: &mut V)
    where
        V: Visitor + ?Sized,
    {
        let Some(bucket) = self.grids.cell(cell) else {
            return;
        };
        let interest = visitor.interest();
        for guid in bucket.iter(interest) {
            if let Some(state) = self.entities.state(guid).filter(|s| !s.is_destroyed()) {
                visitor.visit(state);
            }
        }
    }

    pub fn visit_area<V>(&self, area: &CellArea, visitor: &mut V)
    where
        V: Visitor + ?Sized,
    {
        for cell in area.cells() {
            self.visit_cell(cell, visitor);
        }
    }

    /// Visit every entity within `radius` of `position`. With `load`, grids the area touches
    /// are loaded first; otherwise cells of unloaded grids are skipped.
    pub fn visit_nearby<V>(&mut self, position: Position, radius: f32, load: bool, visitor: &mut V)
    where
        V: Visitor + ?Sized,
    {
        let area = CellArea::around(position.x, position.y, radius);
        if load {
            for grid in area.grids() {
                self.ensure_grid_loaded(grid);
            }
        }
        for cell in area.cells().filter(|cell| self.grids.is_loaded(cell.grid())) {
            self.visit_cell(cell, visitor);
        }
    }

    /// Cells around `grid` close enough that an entity inside would see into it.
    fn grid_watch_area(&self, grid: GridCoord) -> CellArea {
        let margin = (self.visibility_range / CELL_SIZE).ceil() as u32 + 1;
        grid.surrounding(margin)
    }

    /// Whether a player or an active entity is close enough to `grid` to keep it alive.
    pub(crate) fn active_objects_near_grid(&self, grid: GridCoord) -> bool {
        let area = self.grid_watch_area(grid);
        self.players
            .iter()
            .chain(self.active.iter())
            .filter_map(|guid| self.entities.state(*guid))
            .filter_map(|state| state.cell)
            .any(|cell| area.contains(cell))
    }

    /// Unload a grid. Without `force`, a live spawned creature in the grid or a player or
    /// active entity near it refuses the unload. Creatures that belong to another loaded grid
    /// are sent home; everything else is removed.
    pub fn unload_grid(&mut self, coord: GridCoord, force: bool) -> bool {
        let Some(grid) = self.grids.get(coord) else {
            return false;
        };
        let guids = grid.guids();
        if !force {
            let holds_spawn = guids
                .iter()
                .filter_map(|guid| self.entities.state(*guid))
                .any(|state| {
                    state.kind == EntityKind::Creature
                        && state.alive
                        && !state.is_destroyed()
                        && state.spawn.is_some()
                });
            if holds_spawn {
                debug!("Grid {coord} of {} holds live spawned creatures", self.identity);
                return false;
            }
            if self.active_objects_near_grid(coord) {
                debug!("Grid {coord} of {} is still watched", self.identity);
                return false;
            }
        }

        for guid in guids {
            let Some(state) = self.entities.state(guid) else {
                continue;
            };
            if state.is_player() {
                warn!("Player {guid} was still in unloading grid {coord}");
                self.remove_player(guid);
                continue;
            }
            let home = state
                .home
                .filter(|_| state.kind == EntityKind::Creature && !state.active && state.alive)
                .and_then(|home| CellCoord::from_position(home.x, home.y).map(|cell| (home, cell)))
                .filter(|(_, cell)| cell.grid() != coord && self.grids.is_loaded(cell.grid()));
            match home {
                Some((home, _)) => {
                    let _ = self.relocate(guid, home);
                }
                None => {
                    self.remove_now(guid);
                }
            }
        }
        self.remove_list.retain(|guid| self.entities.contains(*guid));
        self.grids.release(coord);
        self.services.terrain.on_grid_unloaded(self.identity.id, coord);
        self.services.hooks.grid_unloaded(&self.identity, coord);
        info!("Unloaded grid {coord} of {}", self.identity);
        true
    }

    pub(crate) fn activate_grid(&mut self, coord: GridCoord) {
        if let Some(grid) = self.grids.get_mut(coord) {
            grid.set_state(GridState::Active);
        }
    }

    /// Advance the grid state machine by one tick.
    pub(crate) fn update_grids(&mut self, diff: Duration) {
        for coord in self.grids.coords() {
            let watched = self.active_objects_near_grid(coord);
            let Some(grid) = self.grids.get_mut(coord) else {
                continue;
            };
            match (grid.state(), watched) {
                (GridState::Active, true) | (GridState::Invalid, _) => {}
                (_, true) => grid.set_state(GridState::Active),
                (GridState::Active, false) => {
                    grid.set_state(GridState::Idle);
                    grid.reset_expiry();
                }
                (GridState::Idle, false) => {
                    grid.set_state(GridState::Removal);
                    grid.reset_expiry();
                }
                (GridState::Removal, false) => {
                    if grid.is_unload_locked() {
                        continue;
                    }
                    let expiry = grid.expiry_mut();
                    expiry.update(diff);
                    if !expiry.passed() {
                        continue;
                    }
                    if !self.unload_grid(coord, false) {
                        if let Some(grid) = self.grids.get_mut(coord) {
                            grid.retry_expiry();
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::world::config::Config;
    use crate::world::entity::{Entity, Inert, PlayerData};
    use crate::world::memory::Fixture;
    use crate::world::spawn::{SpawnKey, SpawnMetadata};

    #[test]
    fn grid_loads_its_spawns_once() {
        // Given
        let fixture = Fixture::new();
        fixture
            .catalog
            .add_spawn(SpawnMetadata::new(SpawnKey::creature(1), 10, 0, Position::new(5.0, 5.0, 0.0)));
        let mut map = fixture.world_map(0);
        let cell = CellCoord::from_position(5.0, 5.0).unwrap();

        // When
        let loads: Vec<bool> = (0..5).map(|_| map.ensure_loaded(cell)).collect();

        // Then
        assert_eq!(loads, vec![true, false, false, false, false]);
        assert_eq!(fixture.factory.created(), 1);
        assert_eq!(map.entities().len(), 1);
    }

    #[test]
    fn visitor_sees_only_its_buckets() {
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        let at = Position::new(5.0, 5.0, 0.0);
        map.add_player(Entity::player(PlayerData::new(1), at, Inert)).unwrap();
        map.add_to_map(Entity::new(EntityKind::GameObject, 2, at, Inert)).unwrap();
        let cell = CellCoord::from_position(at.x, at.y).unwrap();

        struct GridOnly(Vec<EntityKind>);
        impl Visitor for GridOnly {
            fn interest(&self) -> Interest {
                Interest::GRID
            }
            fn visit(&mut self, entity: &EntityState) {
                self.0.push(entity.kind());
            }
        }

        let mut grid_only = GridOnly(Vec::new());
        map.visit_cell(cell, &mut grid_only);
        assert_eq!(grid_only.0, vec![EntityKind::GameObject]);

        let mut all = 0;
        map.visit_cell(cell, &mut |_: &EntityState| all += 1);
        assert_eq!(all, 2);
    }

    #[test]
    fn unload_refused_while_spawned_creature_lives() {
        // Given
        let fixture = Fixture::new();
        let key = SpawnKey::creature(1);
        fixture
            .catalog
            .add_spawn(SpawnMetadata::new(key, 10, 0, Position::new(5.0, 5.0, 0.0)));
        let mut map = fixture.world_map(0);
        let grid = GridCoord::from_position(5.0, 5.0).unwrap();
        map.ensure_grid_loaded(grid);

        // Then
        assert!(!map.unload_grid(grid, false));
        let creature = map.find_by_spawn_id(key).unwrap().guid();
        map.kill(creature);
        assert!(map.unload_grid(grid, false));
        assert!(!map.is_grid_loaded(grid));
        assert!(map.entity(creature).is_none());
    }

    #[test]
    fn unload_refused_near_player() {
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        map.add_player(Entity::player(PlayerData::new(1), Position::new(5.0, 5.0, 0.0), Inert))
            .unwrap();
        let grid = GridCoord::from_position(5.0, 5.0).unwrap();
        assert!(!map.unload_grid(grid, false));
        assert!(map.unload_grid(grid, true));
        assert_eq!(map.player_count(), 0);
    }

    #[test]
    fn unwatched_grid_expires() {
        // Given
        let config = Config {
            grid_unload_delay: Duration::from_secs(10),
            ..Config::default()
        };
        let fixture = Fixture::with_config(config);
        let mut map = fixture.world_map(0);
        let grid = GridCoord::from_position(5.0, 5.0).unwrap();
        map.ensure_grid_loaded(grid);
        map.activate_grid(grid);

        // When
        map.update_grids(Duration::from_secs(1));
        assert_eq!(map.grids().get(grid).unwrap().state(), GridState::Idle);
        map.update_grids(Duration::from_secs(1));
        assert_eq!(map.grids().get(grid).unwrap().state(), GridState::Removal);
        map.update_grids(Duration::from_secs(9));
        assert!(map.is_grid_loaded(grid));
        map.update_grids(Duration::from_secs(1));

        // Then
        assert!(!map.grids().is_created(grid));
    }

    #[test]
    fn unload_lock_keeps_grid() {
        let config = Config {
            grid_unload: false,
            grid_unload_delay: Duration::from_secs(1),
            ..Config::default()
        };
        let fixture = Fixture::with_config(config);
        let mut map = fixture.world_map(0);
        let grid = GridCoord::from_position(5.0, 5.0).unwrap();
        map.ensure_grid_loaded(grid);
        for _ in 0..10 {
            map.update_grids(Duration::from_secs(5));
        }
        assert!(map.is_grid_loaded(grid));
    }
}
