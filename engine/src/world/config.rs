use std::time::Duration;

use crate::core::time::{MINUTE, WEEK};

/// Runtime knobs for every map created by a [`MapManager`](super::MapManager).
#[derive(Debug, Clone)]
pub struct Config {
    /// Worker threads in the shared map update pool.
    pub workers: usize,
    /// Entities handed to a single worker task per parallel phase.
    pub update_chunk: usize,
    /// How long an idle grid waits before it is unloaded.
    pub grid_unload_delay: Duration,
    /// When false, grids are never unloaded once loaded.
    pub grid_unload: bool,
    /// Cadence at which the relocation notifier re-evaluates visibility per grid.
    pub visibility_notify_period: Duration,
    pub visibility_distance_world: f32,
    pub visibility_distance_instance: f32,
    pub visibility_distance_battleground: f32,
    /// Cadence of the respawn sweep and spawn-group condition re-evaluation.
    pub respawn_check_interval: Duration,
    /// Delay applied when a spawn is linked to itself.
    pub self_linked_respawn_delay: u64,
    /// Extra seconds added when deferring behind a linked spawn.
    pub linked_respawn_jitter: (u64, u64),
    pub corpse_decay: u64,
    /// Escorted members of escort groups stop blocking their own respawn.
    pub escort_respawn_dynamic: bool,
    pub instance_unload_delay: Duration,
    pub battleground_unload_delay: Duration,
    pub dynamic_respawn: DynamicRespawn,
}

/// Shortens respawn delays on busy maps. The factor is `rate / players` and only ever shrinks
/// a delay, never below the configured minimum.
#[derive(Debug, Clone)]
pub struct DynamicRespawn {
    pub enabled: bool,
    pub creature_rate: f64,
    pub creature_minimum: u64,
    pub gameobject_rate: f64,
    pub gameobject_minimum: u64,
}

impl Default for DynamicRespawn {
    fn default() -> Self {
        Self {
            enabled: false,
            creature_rate: 10.0,
            creature_minimum: 10,
            gameobject_rate: 10.0,
            gameobject_minimum: 10,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 4,
            update_chunk: 64,
            grid_unload_delay: Duration::from_secs(5 * MINUTE),
            grid_unload: true,
            visibility_notify_period: Duration::from_millis(1000),
            visibility_distance_world: 90.0,
            visibility_distance_instance: 170.0,
            visibility_distance_battleground: 533.0,
            respawn_check_interval: Duration::from_secs(5),
            self_linked_respawn_delay: WEEK,
            linked_respawn_jitter: (5, 15),
            corpse_decay: MINUTE,
            escort_respawn_dynamic: false,
            instance_unload_delay: Duration::from_secs(30 * MINUTE),
            battleground_unload_delay: Duration::from_secs(2 * MINUTE),
            dynamic_respawn: DynamicRespawn::default(),
        }
    }
}
