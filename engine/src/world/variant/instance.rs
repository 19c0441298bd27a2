use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::info;

use super::{AdmissionContext, AdmissionPolicy, InstanceLocks, LifecycleContext, LifecyclePolicy};
use crate::core::time::{IntervalTimer, Timestamp, MINUTE};
use crate::world::entity::{Guid, PlayerData};
use crate::world::error::EnterError;
use crate::world::map::{MapIdentity, MapKind};
use crate::world::services::Destination;

/// Encounter logic of a dungeon.
pub trait InstanceScript: Send {
    fn update(&mut self, _diff: Duration) {}

    fn on_player_enter(&mut self, _player: Guid) {}

    fn on_player_leave(&mut self, _player: Guid) {}

    fn is_encounter_in_progress(&self) -> bool {
        false
    }
}

pub struct NoScript;

impl InstanceScript for NoScript {}

type SharedScript = Arc<Mutex<Box<dyn InstanceScript>>>;

fn lock(script: &SharedScript) -> MutexGuard<'_, Box<dyn InstanceScript>> {
    script.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct InstanceSetup {
    pub max_players: usize,
    pub script: Box<dyn InstanceScript>,
    pub locks: Arc<InstanceLocks>,
    /// When the instance resets. Locks created here expire at the same time.
    pub expires_at: Option<Timestamp>,
    pub unload_delay: Duration,
}

impl InstanceSetup {
    pub fn new(max_players: usize, locks: Arc<InstanceLocks>) -> Self {
        Self {
            max_players,
            script: Box::new(NoScript),
            locks,
            expires_at: None,
            unload_delay: Duration::from_secs(30 * MINUTE),
        }
    }

    pub fn with_script(mut self, script: impl InstanceScript + 'static) -> Self {
        self.script = Box::new(script);
        self
    }

    pub fn with_expiry(mut self, expires_at: Timestamp) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn with_unload_delay(mut self, unload_delay: Duration) -> Self {
        self.unload_delay = unload_delay;
        self
    }
}

pub(super) fn split(setup: InstanceSetup) -> (InstanceAdmission, InstanceLifecycle) {
    let script: SharedScript = Arc::new(Mutex::new(setup.script));
    (
        InstanceAdmission {
            max_players: setup.max_players,
            script: Arc::clone(&script),
            locks: Arc::clone(&setup.locks),
            expires_at: setup.expires_at,
        },
        InstanceLifecycle {
            script,
            locks: setup.locks,
            expires_at: setup.expires_at,
            unload_timer: IntervalTimer::new(setup.unload_delay),
            reset_pending: false,
        },
    )
}

pub struct InstanceAdmission {
    max_players: usize,
    script: SharedScript,
    locks: Arc<InstanceLocks>,
    expires_at: Option<Timestamp>,
}

impl AdmissionPolicy for InstanceAdmission {
    fn can_enter(&self, ctx: &AdmissionContext<'_>, player: &PlayerData) -> Result<(), EnterError> {
        if player.is_gm {
            return Ok(());
        }
        if ctx.players_except_gms >= self.max_players {
            return Err(EnterError::MaxPlayers);
        }
        if lock(&self.script).is_encounter_in_progress() {
            return Err(EnterError::EncounterInProgress);
        }
        let identity = ctx.identity;
        match self.locks.lock_for(player.id, identity.id, identity.difficulty) {
            Some(bound) if bound.instance_id != identity.instance_id && !bound.is_expired(ctx.now) => {
                Err(EnterError::InstanceBindMismatch)
            }
            _ => Ok(()),
        }
    }

    fn on_enter(&mut self, ctx: &AdmissionContext<'_>, player: &PlayerData) {
        if !player.is_gm {
            self.locks.bind(player.id, ctx.identity, self.expires_at, ctx.now);
        }
    }
}

pub struct InstanceLifecycle {
    script: SharedScript,
    locks: Arc<InstanceLocks>,
    expires_at: Option<Timestamp>,
    unload_timer: IntervalTimer,
    reset_pending: bool,
}

impl LifecyclePolicy for InstanceLifecycle {
    fn kind(&self) -> MapKind {
        MapKind::Instance
    }

    fn update(&mut self, ctx: &LifecycleContext<'_>) {
        lock(&self.script).update(ctx.diff);
        if !self.reset_pending && self.expires_at.is_some_and(|expires| ctx.now >= expires) {
            info!("{} expired, resetting", ctx.identity);
            self.reset_pending = true;
        }
    }

    fn on_player_enter(&mut self, player: Guid) {
        lock(&self.script).on_player_enter(player);
    }

    fn on_player_leave(&mut self, player: Guid, _remaining: usize) {
        lock(&self.script).on_player_leave(player);
    }

    fn can_unload(&mut self, diff: Duration, players: usize) -> bool {
        if self.reset_pending {
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
        Some(Destination::Homebind(player.homebind))
    }

    fn close(&mut self) {
        self.reset_pending = true;
    }

    /// An unloaded instance id is never handed out again, so binds to it go too.
    fn on_unload(&mut self, identity: &MapIdentity) {
        let released = self.locks.release_instance(identity.id, identity.instance_id);
        let reason = if self.reset_pending { "reset" } else { "unloaded empty" };
        info!("{identity} {reason}, released {released} locks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::map::Difficulty;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Boss(Arc<AtomicBool>);

    impl InstanceScript for Boss {
        fn is_encounter_in_progress(&self) -> bool {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn identity(instance: u32) -> MapIdentity {
        MapIdentity::new(33, instance, Difficulty(1), MapKind::Instance)
    }

    fn player(id: u64) -> PlayerData {
        PlayerData::new(id)
    }

    #[test]
    fn cap_excludes_game_masters() {
        // Given
        let (admission, _) = split(InstanceSetup::new(5, Arc::new(InstanceLocks::new())));
        let identity = identity(1);
        let ctx = AdmissionContext {
            identity: &identity,
            players_except_gms: 5,
            now: 0,
        };
        let mut gm = player(2);
        gm.is_gm = true;

        // Then
        assert_eq!(admission.can_enter(&ctx, &player(1)), Err(EnterError::MaxPlayers));
        assert_eq!(admission.can_enter(&ctx, &gm), Ok(()));
    }

    #[test]
    fn encounter_in_progress_blocks_entry() {
        // Given
        let fighting = Arc::new(AtomicBool::new(true));
        let setup = InstanceSetup::new(5, Arc::new(InstanceLocks::new())).with_script(Boss(Arc::clone(&fighting)));
        let (admission, _) = split(setup);
        let identity = identity(1);
        let ctx = AdmissionContext {
            identity: &identity,
            players_except_gms: 1,
            now: 0,
        };

        // Then
        assert_eq!(admission.can_enter(&ctx, &player(1)), Err(EnterError::EncounterInProgress));
        fighting.store(false, Ordering::SeqCst);
        assert_eq!(admission.can_enter(&ctx, &player(1)), Ok(()));
    }

    #[test]
    fn bind_mismatch() {
        // Given
        let locks = Arc::new(InstanceLocks::new());
        locks.bind(1, &identity(100), Some(1_000), 0);
        let (admission, _) = split(InstanceSetup::new(5, Arc::clone(&locks)));
        let other = identity(200);
        let ctx = AdmissionContext {
            identity: &other,
            players_except_gms: 0,
            now: 10,
        };

        // Then
        assert_eq!(admission.can_enter(&ctx, &player(1)), Err(EnterError::InstanceBindMismatch));
        assert_eq!(admission.can_enter(&ctx, &player(2)), Ok(()));
    }

    #[test]
    fn empty_instance_unloads_after_delay() {
        // Given
        let setup = InstanceSetup::new(5, Arc::new(InstanceLocks::new())).with_unload_delay(Duration::from_secs(10));
        let (_, mut lifecycle) = split(setup);

        // Then
        assert!(!lifecycle.can_unload(Duration::from_secs(6), 1));
        assert!(!lifecycle.can_unload(Duration::from_secs(6), 0));
        assert!(lifecycle.can_unload(Duration::from_secs(6), 0));
    }

    #[test]
    fn idle_unload_releases_locks() {
        // Given
        let locks = Arc::new(InstanceLocks::new());
        let identity = identity(100);
        locks.bind(1, &identity, None, 0);
        let setup = InstanceSetup::new(5, Arc::clone(&locks)).with_unload_delay(Duration::from_secs(1));
        let (_, mut lifecycle) = split(setup);

        // When
        assert!(lifecycle.can_unload(Duration::from_secs(2), 0));
        lifecycle.on_unload(&identity);

        // Then
        assert!(locks.lock_for(1, 33, Difficulty(1)).is_none());
    }

    #[test]
    fn expiry_resets_and_releases_locks() {
        // Given
        let locks = Arc::new(InstanceLocks::new());
        let identity = identity(100);
        locks.bind(1, &identity, Some(500), 0);
        let (_, mut lifecycle) = split(InstanceSetup::new(5, Arc::clone(&locks)).with_expiry(500));

        // When
        lifecycle.update(&LifecycleContext {
            identity: &identity,
            now: 500,
            diff: Duration::from_millis(50),
            players: 1,
        });

        // Then
        assert!(lifecycle.can_unload(Duration::ZERO, 1));
        assert!(matches!(lifecycle.eviction(&player(1)), Some(Destination::Homebind(None))));
        lifecycle.on_unload(&identity);
        assert!(locks.is_empty());
    }
}
