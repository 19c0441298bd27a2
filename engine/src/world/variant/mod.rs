//! Runtime variants: what differs between an open world map, a dungeon instance and a
//! battleground is who may enter ([`AdmissionPolicy`]) and when the map resets or goes away
//! ([`LifecyclePolicy`]). The map itself is shared.

mod battleground;
mod instance;
mod locks;
mod open_world;

pub use battleground::{BattlegroundAdmission, BattlegroundLifecycle};
pub use instance::{InstanceAdmission, InstanceLifecycle, InstanceScript, InstanceSetup, NoScript};
pub use locks::{BindOutcome, InstanceLock, InstanceLocks};
pub use open_world::{OpenWorldAdmission, OpenWorldLifecycle};

use std::time::Duration;

use crate::core::time::Timestamp;
use crate::world::config::Config;
use crate::world::entity::{Guid, PlayerData};
use crate::world::error::EnterError;
use crate::world::map::{MapIdentity, MapKind};
use crate::world::services::Destination;

pub struct AdmissionContext<'a> {
    pub identity: &'a MapIdentity,
    /// Players on the map, game masters excluded.
    pub players_except_gms: usize,
    pub now: Timestamp,
}

/// Variant-specific entry checks, run after the map's own checks.
pub trait AdmissionPolicy: Send {
    fn can_enter(&self, ctx: &AdmissionContext<'_>, player: &PlayerData) -> Result<(), EnterError>;

    /// The player was admitted and placed on the map.
    fn on_enter(&mut self, _ctx: &AdmissionContext<'_>, _player: &PlayerData) {}
}

pub struct LifecycleContext<'a> {
    pub identity: &'a MapIdentity,
    pub now: Timestamp,
    pub diff: Duration,
    pub players: usize,
}

pub trait LifecyclePolicy: Send {
    fn kind(&self) -> MapKind;

    /// Whether pending respawns go to storage. Only open world maps keep them across restarts.
    fn persists_respawns(&self) -> bool {
        self.kind() == MapKind::World
    }

    /// Whether respawn delays may scale with player count.
    fn scales_respawns(&self) -> bool {
        self.kind() != MapKind::Battleground
    }

    fn visibility_range(&self, config: &Config) -> f32 {
        match self.kind() {
            MapKind::World => config.visibility_distance_world,
            MapKind::Instance => config.visibility_distance_instance,
            MapKind::Battleground => config.visibility_distance_battleground,
        }
    }

    /// Called once per tick after the update phases.
    fn update(&mut self, _ctx: &LifecycleContext<'_>) {}

    fn on_player_enter(&mut self, _player: Guid) {}

    fn on_player_leave(&mut self, _player: Guid, _remaining: usize) {}

    fn can_unload(&mut self, diff: Duration, players: usize) -> bool;

    /// Where a player still on the map goes when it unloads. `None` just removes them.
    fn eviction(&self, _player: &PlayerData) -> Option<Destination> {
        None
    }

    /// Request the map to wind down.
    fn close(&mut self) {}

    fn on_unload(&mut self, _identity: &MapIdentity) {}
}

pub struct Variant {
    pub(crate) admission: Box<dyn AdmissionPolicy>,
    pub(crate) lifecycle: Box<dyn LifecyclePolicy>,
}

impl Variant {
    pub fn new(admission: impl AdmissionPolicy + 'static, lifecycle: impl LifecyclePolicy + 'static) -> Self {
        Self {
            admission: Box::new(admission),
            lifecycle: Box::new(lifecycle),
        }
    }

    pub fn open_world() -> Self {
        Self::new(OpenWorldAdmission, OpenWorldLifecycle)
    }

    pub fn instance(setup: InstanceSetup) -> Self {
        let (admission, lifecycle) = instance::split(setup);
        Self::new(admission, lifecycle)
    }

    pub fn battleground(unload_delay: Duration) -> Self {
        Self::new(BattlegroundAdmission, BattlegroundLifecycle::new(unload_delay))
    }

    pub fn kind(&self) -> MapKind {
        self.lifecycle.kind()
    }
}
