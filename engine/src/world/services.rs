//! Contracts of the collaborators a map depends on. Implementations are injected through
//! [`Services`]; `world::memory` has in-process ones.

use std::sync::Arc;
use std::time::Duration;

use super::entity::{Entity, Guid};
use super::grid::GridCoord;
use super::hooks::Hooks;
use super::map::{InstanceId, MapId, MapIdentity};
use super::position::{Position, WorldLocation};
use super::spawn::{GroupId, PoolId, RespawnInfo, SpawnGroupTemplate, SpawnKey, SpawnMetadata};
use crate::core::time::{Clock, Timestamp};

/// A persisted pending respawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RespawnRow {
    pub key: SpawnKey,
    pub due: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RespawnOp {
    Save {
        key: SpawnKey,
        entry: u32,
        due: Timestamp,
        grid: GridCoord,
    },
    Delete {
        key: SpawnKey,
    },
}

/// Respawn writes of one map, committed together.
#[derive(Debug, Clone, PartialEq)]
pub struct RespawnBatch {
    pub map_id: MapId,
    pub instance_id: InstanceId,
    ops: Vec<RespawnOp>,
}

impl RespawnBatch {
    pub fn new(map_id: MapId, instance_id: InstanceId) -> Self {
        Self {
            map_id,
            instance_id,
            ops: Vec::new(),
        }
    }

    pub fn save(&mut self, info: RespawnInfo) {
        self.ops.push(RespawnOp::Save {
            key: info.key,
            entry: info.entry,
            due: info.due,
            grid: info.grid,
        });
    }

    pub fn delete(&mut self, key: SpawnKey) {
        self.ops.push(RespawnOp::Delete { key });
    }

    pub fn ops(&self) -> &[RespawnOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Durable storage of pending respawns.
pub trait Persistence: Send + Sync {
    fn save_pending_respawn(&self, map: MapId, instance: InstanceId, key: SpawnKey, due: Timestamp);

    fn delete_pending_respawn(&self, map: MapId, instance: InstanceId, key: SpawnKey);

    fn load_pending_respawns(&self, map: MapId, instance: InstanceId) -> Vec<RespawnRow>;

    /// Apply a batch. Stores with transactions should override this to apply it atomically.
    fn commit(&self, batch: RespawnBatch) {
        for op in batch.ops() {
            match *op {
                RespawnOp::Save { key, due, .. } => {
                    self.save_pending_respawn(batch.map_id, batch.instance_id, key, due)
                }
                RespawnOp::Delete { key } => self.delete_pending_respawn(batch.map_id, batch.instance_id, key),
            }
        }
    }
}

/// Static spawn data.
pub trait SpawnCatalog: Send + Sync {
    fn spawn_metadata(&self, key: SpawnKey) -> Option<SpawnMetadata>;

    fn spawns_for_group(&self, group: GroupId) -> Vec<SpawnMetadata>;

    fn spawns_in_grid(&self, map: MapId, grid: GridCoord) -> Vec<SpawnMetadata>;

    fn spawn_group(&self, group: GroupId) -> Option<SpawnGroupTemplate>;

    fn spawn_groups_for_map(&self, map: MapId) -> Vec<SpawnGroupTemplate>;

    /// Spawn whose pending respawn holds this one back.
    fn linked_respawn(&self, _key: SpawnKey) -> Option<SpawnKey> {
        None
    }
}

pub trait ConditionEvaluator: Send + Sync {
    fn is_group_meeting_activation_conditions(&self, group: GroupId, map: &MapIdentity) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiquidStatus {
    NoWater,
    AboveWater,
    WaterWalk,
    InWater,
    UnderWater,
}

/// Height, line of sight and liquid queries.
pub trait TerrainService: Send + Sync {
    fn height(&self, map: MapId, phase_mask: u32, position: &Position) -> Option<f32>;

    fn is_in_line_of_sight(&self, map: MapId, phase_mask: u32, from: &Position, to: &Position) -> bool;

    fn liquid_status(&self, map: MapId, phase_mask: u32, position: &Position) -> LiquidStatus;

    /// Background upkeep, run concurrently with the map tick.
    fn update(&self, _map: MapId, _diff: Duration) {}

    fn on_grid_unloaded(&self, _map: MapId, _grid: GridCoord) {}
}

/// Builds runtime entities from spawn records.
pub trait EntityFactory: Send + Sync {
    fn create_from_spawn(&self, spawn: &SpawnMetadata, map: &MapIdentity) -> Option<Entity>;
}

/// Pools pick which of several candidate spawns to instantiate.
pub trait PoolCoordinator: Send + Sync {
    fn pool_of(&self, key: SpawnKey) -> Option<PoolId>;

    /// Called when a pooled spawn's respawn is due. Returns the spawns to instantiate now.
    fn update_pool(&self, map: &MapIdentity, pool: PoolId, released: SpawnKey) -> Vec<SpawnKey>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Destination {
    /// Where the player was before entering a battleground.
    EntryPoint(Option<WorldLocation>),
    Homebind(Option<WorldLocation>),
}

pub trait Teleporter: Send + Sync {
    fn teleport(&self, player: Guid, destination: Destination);
}

/// Everything a map needs from the rest of the server.
#[derive(Clone)]
pub struct Services {
    pub persistence: Arc<dyn Persistence>,
    pub catalog: Arc<dyn SpawnCatalog>,
    pub conditions: Arc<dyn ConditionEvaluator>,
    pub terrain: Arc<dyn TerrainService>,
    pub factory: Arc<dyn EntityFactory>,
    pub pools: Arc<dyn PoolCoordinator>,
    pub teleporter: Arc<dyn Teleporter>,
    pub clock: Arc<dyn Clock>,
    pub hooks: Arc<Hooks>,
}
