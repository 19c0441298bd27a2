use std::time::Duration;

use super::{EntityState, Guid};
use crate::core::time::Timestamp;
use crate::world::position::Position;

/// Per-entity logic driven by the map tick.
///
/// Behaviors run in parallel across entities. A behavior sees only its own entity's state
/// and talks to the map through [`Command`]s, which are applied after the update phase.
pub trait Behavior: Send + Sync {
    /// Regular update, called for entities inside an active region.
    fn on_tick(&mut self, _ctx: &mut TickContext<'_>) {}

    /// Drain the player's inbound packet queue. Only called for players.
    fn pump_session(&mut self, _ctx: &mut TickContext<'_>) {}
}

/// A behavior that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct Inert;

impl Behavior for Inert {}

/// A deferred request from a behavior to the map.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Queue a relocation, applied when the move list is flushed.
    MoveTo(Position),
    Die,
    /// Remove the entity; spawned entities schedule their respawn.
    Despawn,
    SetActive(bool),
    /// Players only: leave the map.
    LeaveMap,
}

pub struct TickContext<'a> {
    state: &'a mut EntityState,
    diff: Duration,
    now: Timestamp,
    commands: &'a mut Vec<(Guid, Command)>,
}

impl<'a> TickContext<'a> {
    pub(crate) fn new(
        state: &'a mut EntityState,
        diff: Duration,
        now: Timestamp,
        commands: &'a mut Vec<(Guid, Command)>,
    ) -> Self {
        Self {
            state,
            diff,
            now,
            commands,
        }
    }

    pub fn state(&self) -> &EntityState {
        self.state
    }

    pub fn guid(&self) -> Guid {
        self.state.guid
    }

    pub fn diff(&self) -> Duration {
        self.diff
    }

    pub fn now(&self) -> Timestamp {
        self.now
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push((self.state.guid, command));
    }

    pub fn move_to(&mut self, position: Position) {
        self.push(Command::MoveTo(position));
    }

    pub fn die(&mut self) {
        self.push(Command::Die);
    }

    pub fn despawn(&mut self) {
        self.push(Command::Despawn);
    }

    /// Flag the entity for the object update batch at the end of the tick.
    pub fn mark_changed(&mut self) {
        self.state.changed = true;
    }

    pub fn set_phase_mask(&mut self, phase_mask: u32) {
        if self.state.phase_mask != phase_mask {
            self.state.phase_mask = phase_mask;
            self.state.mark_moved();
        }
    }
}
