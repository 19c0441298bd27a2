//! Short-lived spawns around a single player. Creatures die after a few seconds, their corpses
//! decay and the respawn queue brings them back, so every phase of the tick has churn.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rusty_world::core::sim_loop::TICK_50MS;
use rusty_world::world::entity::{Entity, EntityKind, Inert, PlayerData};
use rusty_world::world::memory::Fixture;
use rusty_world::world::spawn::{SpawnKey, SpawnMetadata};
use rusty_world::world::{Config, Map, Position};

use crate::behaviors::Mortal;
use crate::scenarios::Scenario;

const MAYFLY: u32 = 2000;
const TICKS_PER_SECOND: u64 = 20;

#[derive(Clone)]
pub struct RespawnStormConfig {
    pub spawn_count: usize,
    pub lifetime: Duration,
    /// Respawn delays are drawn from this range, in seconds.
    pub respawn_delay: (u64, u64),
    pub seed: u64,
}

impl Default for RespawnStormConfig {
    fn default() -> Self {
        Self {
            spawn_count: 2_000,
            lifetime: Duration::from_secs(3),
            respawn_delay: (2, 10),
            seed: 7,
        }
    }
}

pub struct RespawnStormScenario {
    config: RespawnStormConfig,
    fixture: Option<Fixture>,
    map: Option<Map>,
    ticks: u64,
}

impl RespawnStormScenario {
    pub fn new() -> Self {
        Self::with_config(RespawnStormConfig::default())
    }

    pub fn with_config(config: RespawnStormConfig) -> Self {
        Self {
            config,
            fixture: None,
            map: None,
            ticks: 0,
        }
    }

    pub fn pending_respawns(&self) -> usize {
        self.map.as_ref().map_or(0, |map| map.pending_respawns().len())
    }
}

impl Default for RespawnStormScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for RespawnStormScenario {
    fn name(&self) -> &'static str {
        "respawn_storm"
    }

    fn description(&self) -> &'static str {
        "Spawns that die and respawn continuously around one player"
    }

    fn entity_count(&self) -> usize {
        self.map.as_ref().map_or(0, |map| map.entities().len())
    }

    fn setup(&mut self) {
        let config = Config {
            corpse_decay: 1,
            respawn_check_interval: Duration::from_secs(1),
            ..Config::default()
        };
        let fixture = Fixture::with_config(config);
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let lifetime = self.config.lifetime;
        fixture.factory.register(MAYFLY, move |spawn| {
            Entity::new(EntityKind::Creature, spawn.entry, spawn.position, Mortal::new(lifetime))
        });
        let (low, high) = self.config.respawn_delay;
        for id in 0..self.config.spawn_count {
            let at = Position::new(rng.gen_range(0.0..500.0), rng.gen_range(0.0..500.0), 0.0);
            fixture.catalog.add_spawn(
                SpawnMetadata::new(SpawnKey::creature(id as u64), MAYFLY, 0, at)
                    .with_respawn_delay(rng.gen_range(low..=high.max(low))),
            );
        }

        let mut map = fixture.world_map(0);
        let watcher = Entity::player(PlayerData::new(1), Position::new(250.0, 250.0, 0.0), Inert)
            .with_activation_radius(400.0);
        map.add_player(watcher).ok();
        self.map = Some(map);
        self.fixture = Some(fixture);
        self.ticks = 0;
    }

    fn update(&mut self) {
        let (Some(map), Some(fixture)) = (self.map.as_mut(), self.fixture.as_ref()) else {
            return;
        };
        self.ticks += 1;
        if self.ticks % TICKS_PER_SECOND == 0 {
            fixture.clock.advance(1);
        }
        map.update(TICK_50MS);
    }

    fn teardown(&mut self) {
        if let Some(mut map) = self.map.take() {
            map.unload_all();
        }
        self.fixture = None;
    }
}
