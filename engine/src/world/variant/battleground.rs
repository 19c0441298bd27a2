use std::time::Duration;

use log::info;

use super::{AdmissionContext, AdmissionPolicy, LifecyclePolicy};
use crate::core::time::IntervalTimer;
use crate::world::entity::PlayerData;
use crate::world::error::EnterError;
use crate::world::map::{MapIdentity, MapKind};
use crate::world::services::Destination;

/// Only players matched into this battleground instance get in.
pub struct BattlegroundAdmission;

impl AdmissionPolicy for BattlegroundAdmission {
    fn can_enter(&self, ctx: &AdmissionContext<'_>, player: &PlayerData) -> Result<(), EnterError> {
        if player.battleground_instance != Some(ctx.identity.instance_id) {
            return Err(EnterError::BattlegroundMismatch);
        }
        Ok(())
    }
}

pub struct BattlegroundLifecycle {
    unload_timer: IntervalTimer,
    closed: bool,
}

impl BattlegroundLifecycle {
    pub fn new(unload_delay: Duration) -> Self {
        Self {
            unload_timer: IntervalTimer::new(unload_delay),
            closed: false,
        }
    }
}

impl LifecyclePolicy for BattlegroundLifecycle {
    fn kind(&self) -> MapKind {
        MapKind::Battleground
    }

    fn can_unload(&mut self, diff: Duration, players: usize) -> bool {
        if self.closed {
            return true;
        }
        if players > 0 {
            self.unload_timer.set_current(Duration::ZERO);
            return false;
        }
        self.unload_timer.update(diff);
        self.unload_timer.passed()
    }

    fn eviction(&self, player: &PlayerData) -> Option<Destination> {
        Some(Destination::EntryPoint(player.entry_point))
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn on_unload(&mut self, identity: &MapIdentity) {
        info!("Battleground {identity} closed");
    }
}
