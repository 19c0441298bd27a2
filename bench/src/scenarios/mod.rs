//! Whole-map benchmark scenarios.
//!
//! - **Zone**: players roaming an open world map among wandering creatures
//! - **Respawn storm**: short-lived spawns that keep the respawn queue busy

pub mod respawn_storm;
pub mod zone;

pub use respawn_storm::{RespawnStormConfig, RespawnStormScenario};
pub use zone::{ZoneConfig, ZoneScenario};

pub trait Scenario {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Entities currently on the map.
    fn entity_count(&self) -> usize;

    /// Build the map and populate it.
    fn setup(&mut self);

    /// Run one map tick.
    fn update(&mut self);

    fn teardown(&mut self);
}
