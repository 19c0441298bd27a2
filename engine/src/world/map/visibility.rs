use std::collections::HashSet;
use std::time::Duration;

use fixedbitset::FixedBitSet;
use log::{error, trace};

use super::Map;
use crate::world::entity::{Guid, Registry};
use crate::world::grid::{CellArea, GridIndex, Interest, TOTAL_CELLS, TOTAL_GRIDS};
use crate::world::hooks::VisibilityChange;

/// Recomputed visible set of one player.
struct Sight {
    visible: HashSet<Guid>,
    change: VisibilityChange,
}

/// What `viewer` sees within `range`: loaded cells only, its own phases, and never itself.
fn look_around(grids: &GridIndex, entities: &Registry, viewer: Guid, range: f32) -> Option<Sight> {
    let state = entities.state(viewer)?;
    let origin = state.position;
    let mut visible = HashSet::new();
    for cell in CellArea::around(origin.x, origin.y, range).cells() {
        if !grids.is_loaded(cell.grid()) {
            continue;
        }
        let Some(bucket) = grids.cell(cell) else {
            continue;
        };
        for guid in bucket.iter(Interest::ALL) {
            if guid == viewer {
                continue;
            }
            let Some(target) = entities.state(guid) else {
                continue;
            };
            if target.is_destroyed() || !target.in_world || target.position.distance_2d(&origin) > range {
                continue;
            }
            if state.can_see(target) {
                visible.insert(guid);
            }
        }
    }

    let mut appeared: Vec<Guid> = visible.difference(&state.visible).copied().collect();
    let mut disappeared: Vec<Guid> = state.visible.difference(&visible).copied().collect();
    appeared.sort();
    disappeared.sort();
    Some(Sight {
        visible,
        change: VisibilityChange {
            viewer,
            appeared,
            disappeared,
        },
    })
}

impl Map {
    /// Recompute what players see after this tick's movement. Each grid batches its notices
    /// on its own timer; entities that moved in a grid whose timer has not fired stay dirty
    /// until it does.
    pub(crate) fn notify_relocations(&mut self, diff: Duration) {
        let mut due = FixedBitSet::with_capacity(TOTAL_GRIDS);
        for grid in self.grids.iter_mut() {
            let timer = grid.relocation_mut();
            timer.update(diff);
            if timer.passed() {
                timer.reset();
                due.insert(grid.coord().id());
            }
        }
        if due.count_ones(..) == 0 {
            return;
        }

        let dirty: Vec<Guid> = self
            .entities
            .iter()
            .map(|entity| entity.state())
            .filter(|state| state.needs_notify && state.cell.is_some_and(|cell| due.contains(cell.grid().id())))
            .map(|state| state.guid)
            .collect();
        if dirty.is_empty() {
            return;
        }
        let dirty_set: HashSet<Guid> = dirty.iter().copied().collect();
        let mut dirty_cells = FixedBitSet::with_capacity(TOTAL_CELLS);
        for state in dirty.iter().filter_map(|guid| self.entities.state(*guid)) {
            if let Some(cell) = state.cell {
                dirty_cells.insert(cell.id());
            }
        }

        let range = self.visibility_range;
        let viewers: Vec<Guid> = self
            .players
            .iter()
            .copied()
            .filter(|viewer| {
                let Some(state) = self.entities.state(*viewer) else {
                    return false;
                };
                dirty_set.contains(viewer)
                    || state.visible.iter().any(|seen| dirty_set.contains(seen))
                    || CellArea::around(state.position.x, state.position.y, range)
                        .cells()
                        .any(|cell| dirty_cells.contains(cell.id()))
            })
            .collect();

        for viewer in &viewers {
            let Some(origin) = self.entities.state(*viewer).map(|state| state.position) else {
                continue;
            };
            for grid in CellArea::around(origin.x, origin.y, range).grids() {
                self.ensure_grid_loaded(grid);
            }
        }

        let chunk = self.config.update_chunk.max(1);
        let (grids, entities) = (&self.grids, &self.entities);
        let sights: Vec<Sight> = self.executor.scope(|scope| {
            let units: Vec<_> = viewers
                .chunks(chunk)
                .map(|viewers| {
                    scope.spawn_with_result(move || {
                        viewers
                            .iter()
                            .filter_map(|viewer| look_around(grids, entities, *viewer, range))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            let mut sights = Vec::new();
            for unit in units {
                match unit.wait() {
                    Ok(mut computed) => sights.append(&mut computed),
                    Err(err) => error!("Visibility unit failed: {err}"),
                }
            }
            sights
        });

        for sight in sights {
            let Some(state) = self.entities.state_mut(sight.change.viewer) else {
                continue;
            };
            state.visible = sight.visible;
            let change = sight.change;
            if !change.appeared.is_empty() || !change.disappeared.is_empty() {
                trace!(
                    "{} sees {} new, lost {}",
                    change.viewer,
                    change.appeared.len(),
                    change.disappeared.len()
                );
                self.services.hooks.visibility_changed(&self.identity, &change);
            }
        }
        for guid in dirty {
            if let Some(state) = self.entities.state_mut(guid) {
                state.needs_notify = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::world::config::Config;
    use crate::world::entity::{Entity, EntityKind, Guid, Inert, PlayerData, DEFAULT_PHASE};
    use crate::world::hooks::{Hooks, VisibilityChange};
    use crate::world::memory::Fixture;
    use crate::world::position::Position;

    const TICK: Duration = Duration::from_millis(50);

    fn immediate() -> Config {
        Config {
            visibility_notify_period: Duration::ZERO,
            ..Config::default()
        }
    }

    #[test]
    fn players_see_entities_in_range_and_phase() {
        // Given
        let fixture = Fixture::with_config(immediate());
        let mut map = fixture.world_map(0);
        let player = map
            .add_player(Entity::player(PlayerData::new(1), Position::new(0.0, 0.0, 0.0), Inert))
            .unwrap();
        let near = map
            .add_to_map(Entity::new(EntityKind::Creature, 1, Position::new(30.0, 0.0, 0.0), Inert))
            .unwrap();
        let far = map
            .add_to_map(Entity::new(EntityKind::Creature, 2, Position::new(200.0, 0.0, 0.0), Inert))
            .unwrap();
        let phased = map
            .add_to_map(
                Entity::new(EntityKind::Creature, 3, Position::new(10.0, 0.0, 0.0), Inert).with_phase_mask(0b10),
            )
            .unwrap();

        // When
        map.update(TICK);

        // Then
        let visible = map.entity(player).unwrap().visible();
        assert!(visible.contains(&near));
        assert!(!visible.contains(&far));
        assert!(!visible.contains(&phased));

        // When
        map.set_phase_mask(player, DEFAULT_PHASE | 0b10);
        map.update(TICK);

        // Then
        assert!(map.entity(player).unwrap().visible().contains(&phased));
    }

    #[test]
    fn visibility_changes_reach_hooks() {
        // Given
        let changes: Arc<Mutex<Vec<VisibilityChange>>> = Arc::default();
        let mut hooks = Hooks::new();
        let sink = Arc::clone(&changes);
        hooks.on_visibility_change(move |_, change| sink.lock().unwrap().push(change.clone()));
        let fixture = Fixture::with_config(immediate()).with_hooks(hooks);
        let mut map = fixture.world_map(0);
        let viewer = map
            .add_player(Entity::player(PlayerData::new(1), Position::new(0.0, 0.0, 0.0), Inert))
            .unwrap();
        let wolf = map
            .add_to_map(Entity::new(EntityKind::Creature, 1, Position::new(20.0, 0.0, 0.0), Inert))
            .unwrap();
        map.update(TICK);

        // When
        map.queue_move(wolf, Position::new(150.0, 0.0, 0.0));
        map.update(TICK);
        map.update(TICK);

        // Then
        let changes = changes.lock().unwrap();
        let expected: Vec<(Vec<Guid>, Vec<Guid>)> = vec![(vec![wolf], vec![]), (vec![], vec![wolf])];
        let seen: Vec<_> = changes
            .iter()
            .filter(|change| change.viewer == viewer)
            .map(|change| (change.appeared.clone(), change.disappeared.clone()))
            .collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn notices_wait_for_the_grid_period() {
        let config = Config {
            visibility_notify_period: Duration::from_millis(200),
            ..Config::default()
        };
        let fixture = Fixture::with_config(config);
        let mut map = fixture.world_map(0);
        let player = map
            .add_player(Entity::player(PlayerData::new(1), Position::new(0.0, 0.0, 0.0), Inert))
            .unwrap();
        let wolf = map
            .add_to_map(Entity::new(EntityKind::Creature, 1, Position::new(20.0, 0.0, 0.0), Inert))
            .unwrap();

        for _ in 0..3 {
            map.update(TICK);
            assert!(map.entity(player).unwrap().visible().is_empty());
        }
        map.update(TICK);
        assert!(map.entity(player).unwrap().visible().contains(&wolf));
    }
}
