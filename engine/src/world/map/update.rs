use std::sync::Arc;
use std::time::{Duration, Instant};

use fixedbitset::FixedBitSet;
use log::{error, trace};

use super::Map;
use crate::core::tasks::Executor;
use crate::core::time::Timestamp;
use crate::world::entity::{Command, EntityKind, Guid, Slot};
use crate::world::grid::{CellArea, CellCoord, Interest, TOTAL_CELLS};
use crate::world::position::Position;
use crate::world::variant::LifecycleContext;

type Commands = Vec<(Guid, Command)>;

/// Run `f` over every registry slot, split into chunks of `chunk` slots that execute as
/// separate units of work. Returns once every unit finished, with the commands the units
/// produced in slot order.
fn for_each_slot<F>(executor: &Executor, slots: &mut [Slot], chunk: usize, f: F) -> Commands
where
    F: Fn(usize, &mut Slot, &mut Commands) + Sync,
{
    let chunk = chunk.max(1);
    let f = &f;
    executor.scope(|scope| {
        let units: Vec<_> = slots
            .chunks_mut(chunk)
            .enumerate()
            .map(|(n, slots)| {
                let base = n * chunk;
                scope.spawn_with_result(move || {
                    let mut commands = Vec::new();
                    for (offset, slot) in slots.iter_mut().enumerate() {
                        f(base + offset, slot, &mut commands);
                    }
                    commands
                })
            })
            .collect();

        let mut commands = Vec::new();
        for unit in units {
            match unit.wait() {
                Ok(mut produced) => commands.append(&mut produced),
                Err(err) => error!("Update unit failed: {err}"),
            }
        }
        commands
    })
}

impl Map {
    /// Advance the map by one tick.
    ///
    /// Phases run strictly in order and each one completes before the next starts:
    ///
    /// 1. terrain upkeep, in the background for the whole tick
    /// 2. player session pump, parallel across players
    /// 3. respawn and spawn-group condition sweep, on its own interval
    /// 4. marking of the cells around players and active entities
    /// 5. entity updates in marked cells, parallel
    /// 6. transport movement, on the serial lane
    /// 7. relocation notification, per grid on the notify period
    /// 8. move-list flush
    /// 9. object updates and personal-phase upkeep
    ///
    /// Commands issued by behaviors are applied between phases, never during one.
    pub fn update(&mut self, diff: Duration) {
        let started = Instant::now();
        self.updating = true;
        self.ticks += 1;
        let now = self.now();

        let terrain = Arc::clone(&self.services.terrain);
        let map_id = self.identity.id;
        let background = self.executor.spawn(move || terrain.update(map_id, diff));

        self.pump_sessions(diff, now);

        self.respawn_timer.update(diff);
        if self.respawn_timer.passed() {
            self.respawn_timer.reset();
            self.process_respawns();
            self.update_spawn_group_conditions();
        }
        let ctx = LifecycleContext {
            identity: &self.identity,
            now,
            diff,
            players: self.players.len(),
        };
        self.lifecycle.update(&ctx);

        self.mark_cells();
        self.update_marked(diff, now);
        self.update_transports(diff, now);
        self.notify_relocations(diff);
        self.flush_move_list();
        self.send_object_updates();
        self.despawn_orphaned_personal();

        self.update_grids(diff);
        if let Err(err) = background.wait() {
            error!("Terrain update of {} failed: {err}", self.identity);
        }
        self.remove_all_in_remove_list();
        self.updating = false;
        self.commit_respawns();
        self.services.hooks.map_updated(&self.identity, diff);
        trace!(
            "{} tick {} took {:?} ({} entities, {} marked cells)",
            self.identity,
            self.ticks,
            started.elapsed(),
            self.entities.len(),
            self.marked_cells.count_ones(..)
        );
    }

    fn apply_commands(&mut self, commands: Commands) {
        for (guid, command) in commands {
            self.apply_command(guid, command);
        }
    }

    fn pump_sessions(&mut self, diff: Duration, now: Timestamp) {
        if self.players.is_empty() {
            return;
        }
        let commands = for_each_slot(
            &self.executor,
            self.entities.slots_mut(),
            self.config.update_chunk,
            |_, slot, commands| {
                if let Some(entity) = slot.entity_mut() {
                    entity.pump_session(diff, now, commands);
                }
            },
        );
        self.apply_commands(commands);
    }

    /// Mark every cell within the activation radius of a player or active entity, then
    /// collect the entities of marked cells in loaded grids into the update set.
    fn mark_cells(&mut self) {
        let range = self.visibility_range;
        let seeds: Vec<(f32, f32, f32)> = self
            .players
            .iter()
            .chain(self.active.iter())
            .filter_map(|guid| self.entities.state(*guid))
            .filter(|state| !state.is_destroyed())
            .map(|state| {
                let radius = state.activation_radius.unwrap_or(range);
                (state.position.x, state.position.y, radius)
            })
            .collect();

        self.marked_cells.clear();
        self.marked_cells.grow(TOTAL_CELLS);
        self.update_set.clear();
        self.update_set.grow(self.entities.capacity());
        if seeds.is_empty() {
            return;
        }

        let chunk = self.config.update_chunk.max(1);
        let marked = self.executor.scope(|scope| {
            let units: Vec<_> = seeds
                .chunks(chunk)
                .map(|seeds| {
                    scope.spawn_with_result(move || {
                        let mut cells = FixedBitSet::with_capacity(TOTAL_CELLS);
                        for &(x, y, radius) in seeds {
                            for cell in CellArea::around(x, y, radius).cells() {
                                cells.insert(cell.id());
                            }
                        }
                        cells
                    })
                })
                .collect();
            units.into_iter().filter_map(|unit| unit.wait().ok()).collect::<Vec<_>>()
        });
        for cells in &marked {
            self.marked_cells.union_with(cells);
        }

        let cells: Vec<usize> = self.marked_cells.ones().collect();
        let (grids, entities) = (&self.grids, &self.entities);
        let members = self.executor.scope(|scope| {
            let units: Vec<_> = cells
                .chunks(chunk)
                .map(|cells| {
                    scope.spawn_with_result(move || {
                        let mut slots = Vec::new();
                        for &id in cells {
                            let cell = CellCoord::from_id(id);
                            if !grids.is_loaded(cell.grid()) {
                                continue;
                            }
                            let Some(bucket) = grids.cell(cell) else {
                                continue;
                            };
                            for guid in bucket.iter(Interest::ALL) {
                                let updatable = entities
                                    .state(guid)
                                    .is_some_and(|s| s.kind != EntityKind::Transport && !s.is_destroyed());
                                if updatable {
                                    slots.push(guid.index());
                                }
                            }
                        }
                        slots
                    })
                })
                .collect();
            units.into_iter().filter_map(|unit| unit.wait().ok()).collect::<Vec<_>>()
        });
        for slot in members.into_iter().flatten() {
            self.update_set.insert(slot);
        }
    }

    fn update_marked(&mut self, diff: Duration, now: Timestamp) {
        if self.update_set.count_ones(..) == 0 {
            return;
        }
        let update_set = &self.update_set;
        let commands = for_each_slot(
            &self.executor,
            self.entities.slots_mut(),
            self.config.update_chunk,
            |index, slot, commands| {
                if !update_set.contains(index) {
                    return;
                }
                if let Some(entity) = slot.entity_mut() {
                    entity.tick(diff, now, commands);
                }
            },
        );
        self.apply_commands(commands);
    }

    /// Transports tick one after another on the serial lane. Their moves apply at once and
    /// carry the passengers along.
    fn update_transports(&mut self, diff: Duration, now: Timestamp) {
        if self.transports.is_empty() {
            return;
        }
        let transports = self.transports.clone();
        let entities = &mut self.entities;
        let commands = self.lane.scope(|scope| {
            scope
                .spawn_with_result(move || {
                    let mut commands = Vec::new();
                    for guid in transports {
                        if let Some(entity) = entities.get_mut(guid) {
                            entity.tick(diff, now, &mut commands);
                        }
                    }
                    commands
                })
                .wait()
        });
        let commands = match commands {
            Ok(commands) => commands,
            Err(err) => {
                error!("Transport update of {} failed: {err}", self.identity);
                return;
            }
        };
        for (guid, command) in commands {
            match command {
                Command::MoveTo(position) => self.move_transport(guid, position),
                command => self.apply_command(guid, command),
            }
        }
    }

    fn move_transport(&mut self, guid: Guid, position: Position) {
        let Some(before) = self.entities.state(guid).map(|state| state.position) else {
            return;
        };
        if self.relocate(guid, position).is_err() {
            return;
        }
        let Some(after) = self.entities.state(guid).map(|state| state.position) else {
            return;
        };
        let (dx, dy, dz) = after.delta(&before);
        let passengers = self
            .entities
            .state(guid)
            .map(|state| state.passengers.clone())
            .unwrap_or_default();
        for passenger in passengers {
            let Some(at) = self.entities.state(passenger).map(|state| state.position) else {
                continue;
            };
            if self.relocate(passenger, at.offset(dx, dy, dz)).is_err() {
                self.leave_transport(passenger);
            }
        }
    }

    /// Report every entity changed this tick to the object update listeners, then clear the
    /// flags.
    fn send_object_updates(&mut self) {
        let changed: Vec<Guid> = self
            .entities
            .iter()
            .map(|entity| entity.state())
            .filter(|state| state.changed && !state.is_destroyed())
            .map(|state| state.guid)
            .collect();
        if changed.is_empty() {
            return;
        }
        if self.services.hooks.has_object_update_listeners() {
            self.services.hooks.objects_updated(&self.identity, &changed);
        }
        for guid in changed {
            if let Some(state) = self.entities.state_mut(guid) {
                state.changed = false;
            }
        }
    }

    /// Personal-phase entities go away with their owner.
    fn despawn_orphaned_personal(&mut self) {
        let orphans: Vec<Guid> = self
            .entities
            .iter()
            .map(|entity| entity.state())
            .filter(|state| !state.is_destroyed())
            .filter(|state| {
                state
                    .personal_owner
                    .is_some_and(|owner| self.entities.state(owner).is_none_or(|o| o.is_destroyed()))
            })
            .map(|state| state.guid)
            .collect();
        for guid in orphans {
            trace!("Personal entity {guid} lost its owner");
            self.mark_for_removal(guid);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::*;
    use crate::world::entity::{Behavior, Entity, Inert, PlayerData, TickContext};
    use crate::world::memory::Fixture;

    const TICK: Duration = Duration::from_millis(50);

    struct Counter(Arc<AtomicUsize>);

    impl Behavior for Counter {
        fn on_tick(&mut self, _ctx: &mut TickContext<'_>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn only_entities_near_players_update() {
        // Given
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        let near = Arc::new(AtomicUsize::new(0));
        let far = Arc::new(AtomicUsize::new(0));
        map.add_player(Entity::player(PlayerData::new(1), Position::new(0.0, 0.0, 0.0), Inert))
            .unwrap();
        map.add_to_map(Entity::new(
            EntityKind::Creature,
            1,
            Position::new(20.0, 0.0, 0.0),
            Counter(Arc::clone(&near)),
        ))
        .unwrap();
        map.add_to_map(Entity::new(
            EntityKind::Creature,
            2,
            Position::new(400.0, 0.0, 0.0),
            Counter(Arc::clone(&far)),
        ))
        .unwrap();

        // When
        for _ in 0..3 {
            map.update(TICK);
        }

        // Then
        assert_eq!(near.load(Ordering::SeqCst), 3);
        assert_eq!(far.load(Ordering::SeqCst), 0);
        assert_eq!(map.ticks(), 3);
    }

    struct Mover {
        target: Position,
        seen: Arc<Mutex<Vec<Position>>>,
    }

    impl Behavior for Mover {
        fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
            self.seen.lock().unwrap().push(ctx.state().position());
            ctx.move_to(self.target);
        }
    }

    #[test]
    fn moves_apply_after_the_update_phase() {
        // Given
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let start = Position::new(0.0, 0.0, 0.0);
        let target = Position::new(30.0, 0.0, 0.0);
        let guid = map
            .add_player(Entity::player(
                PlayerData::new(1),
                start,
                Mover {
                    target,
                    seen: Arc::clone(&seen),
                },
            ))
            .unwrap();

        // When
        map.update(TICK);

        // Then
        assert_eq!(seen.lock().unwrap().as_slice(), &[start]);
        assert_eq!(map.entity(guid).unwrap().position(), target);
    }

    struct Sailing;

    impl Behavior for Sailing {
        fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
            let next = ctx.state().position().offset(10.0, 0.0, 0.0);
            ctx.move_to(next);
        }
    }

    #[test]
    fn transport_carries_passengers() {
        // Given
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        let boat = map
            .add_to_map(Entity::new(EntityKind::Transport, 1, Position::new(0.0, 0.0, 0.0), Sailing))
            .unwrap();
        let rider = map
            .add_player(Entity::player(PlayerData::new(1), Position::new(2.0, 1.0, 0.0), Inert))
            .unwrap();
        map.board_transport(rider, boat);

        // When
        map.update(TICK);

        // Then
        assert_eq!(map.entity(boat).unwrap().position().x, 10.0);
        let at = map.entity(rider).unwrap().position();
        assert_eq!((at.x, at.y), (12.0, 1.0));
    }

    #[test]
    fn personal_entities_leave_with_owner() {
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        let owner = map
            .add_player(Entity::player(PlayerData::new(1), Position::new(0.0, 0.0, 0.0), Inert))
            .unwrap();
        let pet = map
            .add_to_map(Entity::new(EntityKind::Creature, 3, Position::new(1.0, 0.0, 0.0), Inert).with_personal_owner(owner))
            .unwrap();

        map.remove_player(owner);
        map.update(TICK);

        assert!(map.entity(pet).is_none());
    }

    #[test]
    fn terrain_upkeep_runs_every_tick() {
        let fixture = Fixture::new();
        let mut map = fixture.world_map(0);
        for _ in 0..4 {
            map.update(TICK);
        }
        assert_eq!(fixture.terrain.updates(), 4);
    }
}
