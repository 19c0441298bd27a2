//! In-process collaborators backed by concurrent maps.
//!
//! These stand in for the database, spawn tables and terrain data of a full server. The demo
//! binary, the benchmarks and the tests all build their maps on them; [`Fixture`] wires a
//! complete set together around a [`ManualClock`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;

use super::config::Config;
use super::entity::{Entity, Guid, Inert};
use super::grid::GridCoord;
use super::hooks::Hooks;
use super::manager::MapManager;
use super::map::{Difficulty, InstanceId, Map, MapId, MapIdentity};
use super::position::Position;
use super::services::{
    ConditionEvaluator, Destination, EntityFactory, LiquidStatus, Persistence, PoolCoordinator, RespawnBatch,
    RespawnOp, RespawnRow, Services, SpawnCatalog, Teleporter, TerrainService,
};
use super::spawn::{GroupId, PoolId, SpawnGroupTemplate, SpawnKey, SpawnMetadata};
use super::variant::{InstanceLocks, InstanceSetup, Variant};
use crate::core::tasks::Executor;
use crate::core::time::{ManualClock, Timestamp};

#[derive(Debug, Default)]
pub struct MemoryCatalog {
    spawns: DashMap<SpawnKey, SpawnMetadata>,
    by_grid: DashMap<(MapId, GridCoord), Vec<SpawnKey>>,
    groups: DashMap<GroupId, SpawnGroupTemplate>,
    links: DashMap<SpawnKey, SpawnKey>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a spawn record.
    pub fn add_spawn(&self, spawn: SpawnMetadata) {
        if let Some(previous) = self.spawns.insert(spawn.key, spawn.clone()) {
            self.unindex(&previous);
        }
        if let Some(grid) = spawn.grid() {
            self.by_grid.entry((spawn.map_id, grid)).or_default().push(spawn.key);
        }
    }

    pub fn remove_spawn(&self, key: SpawnKey) -> Option<SpawnMetadata> {
        let (_, spawn) = self.spawns.remove(&key)?;
        self.unindex(&spawn);
        Some(spawn)
    }

    fn unindex(&self, spawn: &SpawnMetadata) {
        if let Some(grid) = spawn.grid() {
            if let Some(mut keys) = self.by_grid.get_mut(&(spawn.map_id, grid)) {
                keys.retain(|key| *key != spawn.key);
            }
        }
    }

    pub fn add_group(&self, template: SpawnGroupTemplate) {
        self.groups.insert(template.id, template);
    }

    /// Hold `spawn` back while `linked_to` has a pending respawn.
    pub fn link(&self, spawn: SpawnKey, linked_to: SpawnKey) {
        self.links.insert(spawn, linked_to);
    }

    pub fn len(&self) -> usize {
        self.spawns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spawns.is_empty()
    }
}

impl SpawnCatalog for MemoryCatalog {
    fn spawn_metadata(&self, key: SpawnKey) -> Option<SpawnMetadata> {
        self.spawns.get(&key).map(|spawn| spawn.clone())
    }

    fn spawns_for_group(&self, group: GroupId) -> Vec<SpawnMetadata> {
        let mut spawns: Vec<SpawnMetadata> = self
            .spawns
            .iter()
            .filter(|spawn| spawn.group == group)
            .map(|spawn| spawn.clone())
            .collect();
        spawns.sort_by_key(|spawn| spawn.key);
        spawns
    }

    fn spawns_in_grid(&self, map: MapId, grid: GridCoord) -> Vec<SpawnMetadata> {
        let keys = match self.by_grid.get(&(map, grid)) {
            Some(keys) => keys.clone(),
            None => return Vec::new(),
        };
        let mut spawns: Vec<SpawnMetadata> = keys.into_iter().filter_map(|key| self.spawn_metadata(key)).collect();
        spawns.sort_by_key(|spawn| spawn.key);
        spawns
    }

    fn spawn_group(&self, group: GroupId) -> Option<SpawnGroupTemplate> {
        self.groups.get(&group).map(|template| template.clone())
    }

    fn spawn_groups_for_map(&self, map: MapId) -> Vec<SpawnGroupTemplate> {
        let mut groups: Vec<SpawnGroupTemplate> = self
            .groups
            .iter()
            .filter(|template| template.map_id.is_none_or(|id| id == map))
            .map(|template| template.clone())
            .collect();
        groups.sort_by_key(|template| template.id);
        groups
    }

    fn linked_respawn(&self, key: SpawnKey) -> Option<SpawnKey> {
        self.links.get(&key).map(|linked| *linked)
    }
}

/// Pending respawn rows keyed by map instance. Counts committed batches.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    rows: DashMap<(MapId, InstanceId, SpawnKey), Timestamp>,
    commits: AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl Persistence for MemoryPersistence {
    fn save_pending_respawn(&self, map: MapId, instance: InstanceId, key: SpawnKey, due: Timestamp) {
        self.rows.insert((map, instance, key), due);
    }

    fn delete_pending_respawn(&self, map: MapId, instance: InstanceId, key: SpawnKey) {
        self.rows.remove(&(map, instance, key));
    }

    fn load_pending_respawns(&self, map: MapId, instance: InstanceId) -> Vec<RespawnRow> {
        let mut rows: Vec<RespawnRow> = self
            .rows
            .iter()
            .filter(|row| row.key().0 == map && row.key().1 == instance)
            .map(|row| RespawnRow {
                key: row.key().2,
                due: *row.value(),
            })
            .collect();
        rows.sort_by_key(|row| (row.due, row.key));
        rows
    }

    fn commit(&self, batch: RespawnBatch) {
        for op in batch.ops() {
            match *op {
                RespawnOp::Save { key, due, .. } => {
                    self.save_pending_respawn(batch.map_id, batch.instance_id, key, due)
                }
                RespawnOp::Delete { key } => {
                    self.delete_pending_respawn(batch.map_id, batch.instance_id, key)
                }
            }
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
    }
}

/// Activation conditions per spawn group. Groups never set are met.
#[derive(Debug, Default)]
pub struct ConditionTable {
    groups: DashMap<GroupId, bool>,
}

impl ConditionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, group: GroupId, met: bool) {
        self.groups.insert(group, met);
    }
}

impl ConditionEvaluator for ConditionTable {
    fn is_group_meeting_activation_conditions(&self, group: GroupId, _map: &MapIdentity) -> bool {
        self.groups.get(&group).is_none_or(|met| *met)
    }
}

/// Level ground everywhere, no water, nothing blocks sight.
#[derive(Debug, Default)]
pub struct FlatTerrain {
    height: f32,
    updates: AtomicUsize,
}

impl FlatTerrain {
    pub fn new(height: f32) -> Self {
        Self {
            height,
            updates: AtomicUsize::new(0),
        }
    }

    /// Background updates run so far.
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

impl TerrainService for FlatTerrain {
    fn height(&self, _map: MapId, _phase_mask: u32, _position: &Position) -> Option<f32> {
        Some(self.height)
    }

    fn is_in_line_of_sight(&self, _map: MapId, _phase_mask: u32, _from: &Position, _to: &Position) -> bool {
        true
    }

    fn liquid_status(&self, _map: MapId, _phase_mask: u32, _position: &Position) -> LiquidStatus {
        LiquidStatus::NoWater
    }

    fn update(&self, _map: MapId, _diff: Duration) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

type Template = Arc<dyn Fn(&SpawnMetadata) -> Entity + Send + Sync>;

/// Builds entities from per-entry templates. Entries without one become [`Inert`] entities of
/// the spawn's kind.
#[derive(Default)]
pub struct TemplateFactory {
    templates: DashMap<u32, Template>,
    created: AtomicUsize,
}

impl TemplateFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, entry: u32, template: impl Fn(&SpawnMetadata) -> Entity + Send + Sync + 'static) {
        self.templates.insert(entry, Arc::new(template));
    }

    /// Entities built so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl EntityFactory for TemplateFactory {
    fn create_from_spawn(&self, spawn: &SpawnMetadata, _map: &MapIdentity) -> Option<Entity> {
        let template = self.templates.get(&spawn.entry).map(|template| template.value().clone());
        let entity = match template {
            Some(template) => template(spawn),
            None => Entity::new(spawn.key.kind.into(), spawn.entry, spawn.position, Inert),
        };
        self.created.fetch_add(1, Ordering::SeqCst);
        Some(entity)
    }
}

/// No spawn belongs to a pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPools;

impl PoolCoordinator for NoPools {
    fn pool_of(&self, _key: SpawnKey) -> Option<PoolId> {
        None
    }

    fn update_pool(&self, _map: &MapIdentity, _pool: PoolId, _released: SpawnKey) -> Vec<SpawnKey> {
        Vec::new()
    }
}

/// Pools that hand the slot of a released member to the next member in insertion order.
#[derive(Debug, Default)]
pub struct MemoryPools {
    members: DashMap<SpawnKey, PoolId>,
    pools: DashMap<PoolId, Vec<SpawnKey>>,
}

impl MemoryPools {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, pool: PoolId, key: SpawnKey) {
        self.members.insert(key, pool);
        self.pools.entry(pool).or_default().push(key);
    }
}

impl PoolCoordinator for MemoryPools {
    fn pool_of(&self, key: SpawnKey) -> Option<PoolId> {
        self.members.get(&key).map(|pool| *pool)
    }

    fn update_pool(&self, _map: &MapIdentity, pool: PoolId, released: SpawnKey) -> Vec<SpawnKey> {
        let Some(members) = self.pools.get(&pool) else {
            return vec![released];
        };
        let next = members
            .iter()
            .position(|key| *key == released)
            .map_or(0, |at| (at + 1) % members.len());
        members.get(next).copied().into_iter().collect()
    }
}

/// Records every teleport request instead of moving anyone.
#[derive(Debug, Default)]
pub struct RecordingTeleporter {
    teleports: Mutex<Vec<(Guid, Destination)>>,
}

impl RecordingTeleporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn teleports(&self) -> Vec<(Guid, Destination)> {
        self.teleports.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Teleporter for RecordingTeleporter {
    fn teleport(&self, player: Guid, destination: Destination) {
        self.teleports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((player, destination));
    }
}

/// Game time a fixture's clock starts at.
pub const FIXTURE_EPOCH: Timestamp = 1_000;

/// A complete set of in-memory collaborators around a manual clock.
pub struct Fixture {
    pub config: Arc<Config>,
    pub catalog: Arc<MemoryCatalog>,
    pub persistence: Arc<MemoryPersistence>,
    pub conditions: Arc<ConditionTable>,
    pub terrain: Arc<FlatTerrain>,
    pub factory: Arc<TemplateFactory>,
    pub pools: Arc<MemoryPools>,
    pub teleporter: Arc<RecordingTeleporter>,
    pub clock: Arc<ManualClock>,
    pub hooks: Arc<Hooks>,
    pub locks: Arc<InstanceLocks>,
    pub executor: Arc<Executor>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self::new()
    }
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let executor = Arc::new(Executor::named(config.workers.max(1), "map-worker"));
        Self {
            config: Arc::new(config),
            catalog: Arc::new(MemoryCatalog::new()),
            persistence: Arc::new(MemoryPersistence::new()),
            conditions: Arc::new(ConditionTable::new()),
            terrain: Arc::new(FlatTerrain::default()),
            factory: Arc::new(TemplateFactory::new()),
            pools: Arc::new(MemoryPools::new()),
            teleporter: Arc::new(RecordingTeleporter::new()),
            clock: Arc::new(ManualClock::new(FIXTURE_EPOCH)),
            hooks: Arc::new(Hooks::new()),
            locks: Arc::new(InstanceLocks::new()),
            executor,
        }
    }

    pub fn with_hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    pub fn services(&self) -> Services {
        Services {
            persistence: self.persistence.clone(),
            catalog: self.catalog.clone(),
            conditions: self.conditions.clone(),
            terrain: self.terrain.clone(),
            factory: self.factory.clone(),
            pools: self.pools.clone(),
            teleporter: self.teleporter.clone(),
            clock: self.clock.clone(),
            hooks: Arc::clone(&self.hooks),
        }
    }

    pub fn map(&self, map_id: MapId, instance_id: InstanceId, difficulty: Difficulty, variant: Variant) -> Map {
        Map::new(
            map_id,
            instance_id,
            difficulty,
            variant,
            Arc::clone(&self.config),
            self.services(),
            Arc::clone(&self.executor),
        )
    }

    pub fn world_map(&self, map_id: MapId) -> Map {
        self.map(map_id, 0, Difficulty::NORMAL, Variant::open_world())
    }

    pub fn instance_map(&self, map_id: MapId, instance_id: InstanceId, max_players: usize) -> Map {
        let setup = InstanceSetup::new(max_players, Arc::clone(&self.locks))
            .with_unload_delay(self.config.instance_unload_delay);
        self.map(map_id, instance_id, Difficulty::NORMAL, Variant::instance(setup))
    }

    pub fn battleground_map(&self, map_id: MapId, instance_id: InstanceId) -> Map {
        let variant = Variant::battleground(self.config.battleground_unload_delay);
        self.map(map_id, instance_id, Difficulty::NORMAL, variant)
    }

    pub fn manager(&self) -> MapManager {
        MapManager::new(
            Arc::clone(&self.config),
            self.services(),
            Arc::clone(&self.executor),
            Arc::clone(&self.locks),
        )
    }
}
