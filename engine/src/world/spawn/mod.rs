//! Spawn records, spawn groups and the respawn queue.

mod group;
mod respawn;

pub use group::{GroupTransition, SpawnGroupState, SpawnGroups};
pub use respawn::{Eligibility, RespawnInfo, RespawnQueue, RespawnScheduler};

use std::fmt;
use std::ops::BitOr;

use crate::world::grid::GridCoord;
use crate::world::map::{Difficulty, MapId};
use crate::world::position::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SpawnKind {
    Creature,
    GameObject,
    AreaTrigger,
}

pub type SpawnId = u64;
pub type GroupId = u32;
pub type PoolId = u32;

/// The implicit group for spawns that belong to no explicit group. Always active.
pub const DEFAULT_GROUP: GroupId = 0;

/// Identifies a spawn record. Ordered by kind, then id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpawnKey {
    pub kind: SpawnKind,
    pub id: SpawnId,
}

impl SpawnKey {
    pub const fn new(kind: SpawnKind, id: SpawnId) -> Self {
        Self { kind, id }
    }

    pub const fn creature(id: SpawnId) -> Self {
        Self::new(SpawnKind::Creature, id)
    }

    pub const fn gameobject(id: SpawnId) -> Self {
        Self::new(SpawnKind::GameObject, id)
    }
}

impl fmt::Display for SpawnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.kind, self.id)
    }
}

/// Static description of a spawn point.
#[derive(Debug, Clone, PartialEq)]
pub struct SpawnMetadata {
    pub key: SpawnKey,
    pub entry: u32,
    pub map_id: MapId,
    pub group: GroupId,
    /// Difficulties the spawn exists in. Empty means every difficulty.
    pub difficulties: Vec<Difficulty>,
    pub position: Position,
    /// Seconds between death and respawn.
    pub respawn_delay: u64,
}

impl SpawnMetadata {
    pub fn new(key: SpawnKey, entry: u32, map_id: MapId, position: Position) -> Self {
        Self {
            key,
            entry,
            map_id,
            group: DEFAULT_GROUP,
            difficulties: Vec::new(),
            position,
            respawn_delay: 300,
        }
    }

    pub fn in_group(mut self, group: GroupId) -> Self {
        self.group = group;
        self
    }

    pub fn with_respawn_delay(mut self, seconds: u64) -> Self {
        self.respawn_delay = seconds;
        self
    }

    pub fn with_difficulties(mut self, difficulties: Vec<Difficulty>) -> Self {
        self.difficulties = difficulties;
        self
    }

    pub fn spawns_in(&self, difficulty: Difficulty) -> bool {
        self.difficulties.is_empty() || self.difficulties.contains(&difficulty)
    }

    pub fn grid(&self) -> Option<GridCoord> {
        GridCoord::from_position(self.position.x, self.position.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SpawnGroupFlags(u32);

impl SpawnGroupFlags {
    pub const NONE: Self = Self(0);
    /// Always active; cannot be toggled.
    pub const SYSTEM: Self = Self(0x01);
    /// Only toggled explicitly, never by conditions.
    pub const MANUAL_SPAWN: Self = Self(0x04);
    /// Respawn delays in this group scale with player count.
    pub const DYNAMIC_SPAWN_RATE: Self = Self(0x08);
    /// Members stay alive while escorting a player.
    pub const ESCORT_QUEST_NPC: Self = Self(0x10);
    /// Despawn members when the activation conditions stop holding.
    pub const DESPAWN_ON_CONDITION_FAILURE: Self = Self(0x20);

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn contains(&self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for SpawnGroupFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnGroupTemplate {
    pub id: GroupId,
    pub name: String,
    /// Map the group is bound to. `None` for groups spanning maps.
    pub map_id: Option<MapId>,
    pub flags: SpawnGroupFlags,
}

impl SpawnGroupTemplate {
    pub fn new(id: GroupId, name: impl Into<String>, map_id: Option<MapId>, flags: SpawnGroupFlags) -> Self {
        Self {
            id,
            name: name.into(),
            map_id,
            flags,
        }
    }

    pub fn is_system(&self) -> bool {
        self.flags.contains(SpawnGroupFlags::SYSTEM)
    }

    pub fn is_manual(&self) -> bool {
        self.flags.contains(SpawnGroupFlags::MANUAL_SPAWN)
    }
}
