//! Entities living on a map.
//!
//! An [`Entity`] pairs the map-owned [`EntityState`] (position, cell, flags, visibility) with
//! a pluggable [`Behavior`]. Entities are addressed by a [`Guid`], an arena slot plus a
//! [`Generation`] so a stale handle to a removed entity never resolves to its successor:
//!
//! ```rust,ignore
//! let a = registry.insert(entity);     // Guid { index: 0, generation: 0 }
//! registry.remove(a);
//! let b = registry.insert(other);      // Guid { index: 0, generation: 1 }
//! assert!(registry.get(a).is_none());
//! ```

mod behavior;
mod registry;

pub use behavior::{Behavior, Command, Inert, TickContext};
pub use registry::{Registry, Slot};

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use crate::core::time::Timestamp;
use crate::world::grid::{Bucket, CellCoord};
use crate::world::map::InstanceId;
use crate::world::position::{Position, WorldLocation};
use crate::world::spawn::{GroupId, SpawnKey, SpawnKind};

/// Character id of a player. Stable across maps, unlike a [`Guid`].
pub type PlayerId = u64;

/// Phase bit every entity starts in.
pub const DEFAULT_PHASE: u32 = 1;

/// How many times an arena slot has been reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(u32);

impl Generation {
    pub const FIRST: Self = Self(0);

    #[inline]
    pub fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

/// Handle to an entity on one map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Guid {
    index: u32,
    generation: Generation,
}

impl Guid {
    #[inline]
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation: Generation(generation),
        }
    }

    #[inline]
    pub(crate) const fn with_generation(index: u32, generation: Generation) -> Self {
        Self { index, generation }
    }

    /// Slot of this entity in the registry arena.
    #[inline]
    pub fn index(&self) -> usize {
        self.index as usize
    }

    #[inline]
    pub fn generation(&self) -> Generation {
        self.generation
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.index, self.generation.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Player,
    Creature,
    GameObject,
    AreaTrigger,
    DynamicObject,
    Corpse,
    Transport,
}

impl EntityKind {
    pub fn bucket(self) -> Bucket {
        match self {
            EntityKind::Player | EntityKind::Creature | EntityKind::DynamicObject | EntityKind::Corpse => {
                Bucket::World
            }
            EntityKind::GameObject | EntityKind::AreaTrigger | EntityKind::Transport => Bucket::Grid,
        }
    }

    pub fn spawn_kind(self) -> Option<SpawnKind> {
        match self {
            EntityKind::Creature => Some(SpawnKind::Creature),
            EntityKind::GameObject => Some(SpawnKind::GameObject),
            EntityKind::AreaTrigger => Some(SpawnKind::AreaTrigger),
            _ => None,
        }
    }
}

impl From<SpawnKind> for EntityKind {
    fn from(kind: SpawnKind) -> Self {
        match kind {
            SpawnKind::Creature => EntityKind::Creature,
            SpawnKind::GameObject => EntityKind::GameObject,
            SpawnKind::AreaTrigger => EntityKind::AreaTrigger,
        }
    }
}

/// Session-level facts about a player that admission and eviction depend on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlayerData {
    pub id: PlayerId,
    pub is_gm: bool,
    /// Battleground instance the player was assigned to by matchmaking.
    pub battleground_instance: Option<InstanceId>,
    /// Where the player came from before entering a battleground.
    pub entry_point: Option<WorldLocation>,
    pub homebind: Option<WorldLocation>,
}

impl PlayerData {
    pub fn new(id: PlayerId) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }
}

/// Ties an entity to the spawn record it was created from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnLink {
    pub key: SpawnKey,
    pub group: GroupId,
    /// Seconds between death and respawn before any scaling.
    pub respawn_delay: u64,
}

/// Map-owned state of an entity. Behaviors read it; only the map mutates location, cell and
/// lifecycle flags.
#[derive(Debug, Clone)]
pub struct EntityState {
    pub(crate) guid: Guid,
    pub(crate) kind: EntityKind,
    pub(crate) entry: u32,
    pub(crate) position: Position,
    pub(crate) home: Option<Position>,
    pub(crate) cell: Option<CellCoord>,
    pub(crate) in_world: bool,
    pub(crate) active: bool,
    pub(crate) alive: bool,
    pub(crate) escorted: bool,
    pub(crate) destroyed: bool,
    pub(crate) pending_removal: bool,
    pub(crate) phase_mask: u32,
    pub(crate) personal_owner: Option<Guid>,
    pub(crate) activation_radius: Option<f32>,
    pub(crate) spawn: Option<SpawnLink>,
    pub(crate) transport: Option<Guid>,
    pub(crate) passengers: Vec<Guid>,
    pub(crate) visible: HashSet<Guid>,
    pub(crate) player: Option<PlayerData>,
    pub(crate) corpse_expires_at: Option<Timestamp>,
    pub(crate) needs_notify: bool,
    pub(crate) changed: bool,
}

impl EntityState {
    pub fn new(kind: EntityKind, entry: u32, position: Position) -> Self {
        Self {
            guid: Guid::new(0, 0),
            kind,
            entry,
            position,
            home: None,
            cell: None,
            in_world: false,
            active: matches!(kind, EntityKind::Transport),
            alive: true,
            escorted: false,
            destroyed: false,
            pending_removal: false,
            phase_mask: DEFAULT_PHASE,
            personal_owner: None,
            activation_radius: None,
            spawn: None,
            transport: None,
            passengers: Vec::new(),
            visible: HashSet::new(),
            player: None,
            corpse_expires_at: None,
            needs_notify: false,
            changed: false,
        }
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn entry(&self) -> u32 {
        self.entry
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn home(&self) -> Option<Position> {
        self.home
    }

    pub fn cell(&self) -> Option<CellCoord> {
        self.cell
    }

    pub fn is_in_world(&self) -> bool {
        self.in_world
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    pub fn is_escorted(&self) -> bool {
        self.escorted
    }

    /// Removed, or scheduled for removal at the end of the tick.
    pub fn is_destroyed(&self) -> bool {
        self.destroyed || self.pending_removal
    }

    pub fn is_player(&self) -> bool {
        self.kind == EntityKind::Player
    }

    pub fn phase_mask(&self) -> u32 {
        self.phase_mask
    }

    pub fn personal_owner(&self) -> Option<Guid> {
        self.personal_owner
    }

    pub fn activation_radius(&self) -> Option<f32> {
        self.activation_radius
    }

    pub fn spawn(&self) -> Option<&SpawnLink> {
        self.spawn.as_ref()
    }

    pub fn transport(&self) -> Option<Guid> {
        self.transport
    }

    pub fn passengers(&self) -> &[Guid] {
        &self.passengers
    }

    /// Entities this player currently sees.
    pub fn visible(&self) -> &HashSet<Guid> {
        &self.visible
    }

    pub fn player(&self) -> Option<&PlayerData> {
        self.player.as_ref()
    }

    pub fn has_changes(&self) -> bool {
        self.changed
    }

    /// Whether `self` may perceive `target`: overlapping phases, and personal entities only
    /// to their owner.
    pub fn can_see(&self, target: &EntityState) -> bool {
        if self.phase_mask & target.phase_mask == 0 {
            return false;
        }
        target.personal_owner.is_none_or(|owner| owner == self.guid)
    }

    pub(crate) fn mark_moved(&mut self) {
        self.needs_notify = true;
        self.changed = true;
    }
}

pub struct Entity {
    pub(crate) state: EntityState,
    pub(crate) behavior: Box<dyn Behavior>,
}

impl Entity {
    pub fn new(kind: EntityKind, entry: u32, position: Position, behavior: impl Behavior + 'static) -> Self {
        Self {
            state: EntityState::new(kind, entry, position),
            behavior: Box::new(behavior),
        }
    }

    pub fn player(data: PlayerData, position: Position, behavior: impl Behavior + 'static) -> Self {
        let mut entity = Self::new(EntityKind::Player, 0, position, behavior);
        entity.state.player = Some(data);
        entity
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.state.active = active;
        self
    }

    pub fn with_phase_mask(mut self, phase_mask: u32) -> Self {
        self.state.phase_mask = phase_mask;
        self
    }

    /// Makes the entity personal: only `owner` sees it, and it goes away with its owner.
    pub fn with_personal_owner(mut self, owner: Guid) -> Self {
        self.state.personal_owner = Some(owner);
        self
    }

    /// Radius within which this active entity keeps others updating.
    pub fn with_activation_radius(mut self, radius: f32) -> Self {
        self.state.activation_radius = Some(radius);
        self
    }

    pub fn with_home(mut self, home: Position) -> Self {
        self.state.home = Some(home);
        self
    }

    pub fn with_behavior(mut self, behavior: impl Behavior + 'static) -> Self {
        self.behavior = Box::new(behavior);
        self
    }

    pub fn state(&self) -> &EntityState {
        &self.state
    }

    pub fn guid(&self) -> Guid {
        self.state.guid
    }

    /// Advance this entity by one tick, collecting the commands it issues.
    pub(crate) fn tick(&mut self, diff: Duration, now: Timestamp, commands: &mut Vec<(Guid, Command)>) {
        let state = &mut self.state;
        if !state.in_world || state.is_destroyed() {
            return;
        }
        if !state.alive {
            if state.corpse_expires_at.is_some_and(|expires| now >= expires) {
                state.corpse_expires_at = None;
                commands.push((state.guid, Command::Despawn));
            }
            return;
        }
        let mut ctx = TickContext::new(state, diff, now, commands);
        self.behavior.on_tick(&mut ctx);
    }

    pub(crate) fn pump_session(&mut self, diff: Duration, now: Timestamp, commands: &mut Vec<(Guid, Command)>) {
        let state = &mut self.state;
        if state.kind != EntityKind::Player || !state.in_world || state.is_destroyed() {
            return;
        }
        let mut ctx = TickContext::new(state, diff, now, commands);
        self.behavior.pump_session(&mut ctx);
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entity").field("state", &self.state).finish_non_exhaustive()
    }
}
