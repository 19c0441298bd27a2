use std::time::Duration;

use super::{AdmissionContext, AdmissionPolicy, LifecyclePolicy};
use crate::world::entity::PlayerData;
use crate::world::error::EnterError;
use crate::world::map::MapKind;

/// Anyone may enter the open world.
pub struct OpenWorldAdmission;

impl AdmissionPolicy for OpenWorldAdmission {
    fn can_enter(&self, _ctx: &AdmissionContext<'_>, _player: &PlayerData) -> Result<(), EnterError> {
        Ok(())
    }
}

/// Open world maps live as long as the server.
pub struct OpenWorldLifecycle;

impl LifecyclePolicy for OpenWorldLifecycle {
    fn kind(&self) -> MapKind {
        MapKind::World
    }

    fn can_unload(&mut self, _diff: Duration, _players: usize) -> bool {
        false
    }
}
