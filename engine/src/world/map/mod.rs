//! The map aggregate.
//!
//! A [`Map`] owns the grids, the entity registry, the respawn queue and the spawn-group state
//! of one map instance, and advances them one tick at a time through [`Map::update`]. The
//! open world, dungeon instances and battlegrounds share this type; what differs is plugged in
//! through a [`Variant`].
//!
//! ```text
//!  ┌──────────────────────────── Map ─────────────────────────────┐
//!  │ GridIndex ── Grid ── Cell[64] ── world / grid buckets (Guid)  │
//!  │ Registry  ── Slot[] (Entity = EntityState + Behavior)         │
//!  │ RespawnScheduler (due-time set + spawn index, own lock)       │
//!  │ SpawnGroups         players / active / transports lists      │
//!  │ Services (catalog, persistence, conditions, terrain, ...)     │
//!  └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entities never hold references into the map; they carry their cell coordinate and are
//! addressed by [`Guid`] everywhere else.

mod entities;
mod grids;
mod identity;
mod respawn;
mod spawn_group;
mod update;
mod visibility;

pub use entities::RelocateOutcome;
pub use grids::Visitor;
pub use identity::{Difficulty, InstanceId, MapId, MapIdentity, MapKind};

use std::sync::Arc;
use std::time::Duration;

use fixedbitset::FixedBitSet;
use log::info;

use crate::core::tasks::Executor;
use crate::core::time::IntervalTimer;
use crate::world::config::Config;
use crate::world::entity::{EntityState, Guid, PlayerId, Registry};
use crate::world::grid::{GridCoord, GridIndex, TOTAL_CELLS};
use crate::world::position::Position;
use crate::world::services::Services;
use crate::world::spawn::{RespawnScheduler, SpawnGroups, SpawnKey};
use crate::world::variant::{AdmissionPolicy, LifecyclePolicy, Variant};

pub struct Map {
    identity: MapIdentity,
    config: Arc<Config>,
    services: Services,
    executor: Arc<Executor>,
    /// Serial lane for transport updates.
    lane: Executor,
    admission: Box<dyn AdmissionPolicy>,
    lifecycle: Box<dyn LifecyclePolicy>,
    visibility_range: f32,
    grids: GridIndex,
    entities: Registry,
    respawns: RespawnScheduler,
    spawn_groups: SpawnGroups,
    players: Vec<Guid>,
    /// Non-player entities that keep their surroundings loaded and updating.
    active: Vec<Guid>,
    transports: Vec<Guid>,
    move_list: Vec<(Guid, Position)>,
    remove_list: Vec<Guid>,
    marked_cells: FixedBitSet,
    update_set: FixedBitSet,
    respawn_timer: IntervalTimer,
    updating: bool,
    ticks: u64,
}

impl Map {
    pub fn new(
        id: MapId,
        instance_id: InstanceId,
        difficulty: Difficulty,
        variant: Variant,
        config: Arc<Config>,
        services: Services,
        executor: Arc<Executor>,
    ) -> Self {
        let Variant { admission, lifecycle } = variant;
        let identity = MapIdentity::new(id, instance_id, difficulty, lifecycle.kind());
        let visibility_range = lifecycle.visibility_range(&config);
        let respawns = RespawnScheduler::new(id, instance_id, lifecycle.persists_respawns());
        let grids = GridIndex::new(
            config.grid_unload_delay,
            config.visibility_notify_period,
            !config.grid_unload,
        );
        let respawn_timer = IntervalTimer::new(config.respawn_check_interval);

        let mut map = Self {
            identity,
            config,
            services,
            executor,
            lane: Executor::single_threaded(),
            admission,
            lifecycle,
            visibility_range,
            grids,
            entities: Registry::new(),
            respawns,
            spawn_groups: SpawnGroups::new(),
            players: Vec::new(),
            active: Vec::new(),
            transports: Vec::new(),
            move_list: Vec::new(),
            remove_list: Vec::new(),
            marked_cells: FixedBitSet::with_capacity(TOTAL_CELLS),
            update_set: FixedBitSet::new(),
            respawn_timer,
            updating: false,
            ticks: 0,
        };
        map.init_spawn_groups();
        if map.respawns.persists() {
            map.load_respawn_times();
        }
        info!(
            "Created {} ({:?}, visibility {:.1})",
            map.identity, map.identity.kind, map.visibility_range
        );
        map
    }

    pub fn identity(&self) -> &MapIdentity {
        &self.identity
    }

    pub fn id(&self) -> MapId {
        self.identity.id
    }

    pub fn instance_id(&self) -> InstanceId {
        self.identity.instance_id
    }

    pub fn kind(&self) -> MapKind {
        self.identity.kind
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn visibility_range(&self) -> f32 {
        self.visibility_range
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn entities(&self) -> &Registry {
        &self.entities
    }

    pub fn entity(&self, guid: Guid) -> Option<&EntityState> {
        self.entities.state(guid)
    }

    pub fn find_by_spawn_id(&self, key: SpawnKey) -> Option<&EntityState> {
        self.entities
            .find_by_spawn(key)
            .and_then(|guid| self.entities.state(guid))
    }

    pub fn players(&self) -> &[Guid] {
        &self.players
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn find_player(&self, id: PlayerId) -> Option<Guid> {
        self.players.iter().copied().find(|guid| {
            self.entities
                .state(*guid)
                .and_then(EntityState::player)
                .is_some_and(|data| data.id == id)
        })
    }

    pub fn active_entities(&self) -> &[Guid] {
        &self.active
    }

    pub fn grids(&self) -> &GridIndex {
        &self.grids
    }

    pub fn is_grid_loaded(&self, grid: GridCoord) -> bool {
        self.grids.is_loaded(grid)
    }

    /// Whether the map's lifecycle allows it to be dropped. Advances unload timers by `diff`.
    pub fn can_unload(&mut self, diff: Duration) -> bool {
        let players = self.players.len();
        self.lifecycle.can_unload(diff, players)
    }

    /// Ask the map to wind down: instances reset, battlegrounds close.
    pub fn close(&mut self) {
        info!("Closing {}", self.identity);
        self.lifecycle.close();
    }

    /// Evict every player, force-unload every grid and flush pending respawn writes.
    pub fn unload_all(&mut self) {
        let players = self.players.clone();
        for guid in players {
            let destination = self
                .entities
                .state(guid)
                .and_then(EntityState::player)
                .and_then(|data| self.lifecycle.eviction(data));
            if let Some(destination) = destination {
                self.services.teleporter.teleport(guid, destination);
            }
            self.remove_player(guid);
        }
        self.move_list.clear();
        self.remove_all_in_remove_list();
        for grid in self.grids.coords() {
            self.unload_grid(grid, true);
        }
        self.commit_respawns();
        self.lifecycle.on_unload(&self.identity);
        info!("Unloaded {}", self.identity);
    }
}
