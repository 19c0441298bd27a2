//! An open world zone: players walking among wandering creatures, spread over several grids.
//!
//! Exercises cell marking, parallel entity updates, relocation across cells and grids, and
//! visibility recomputation.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rusty_world::core::sim_loop::TICK_50MS;
use rusty_world::world::entity::{Entity, EntityKind, PlayerData};
use rusty_world::world::memory::Fixture;
use rusty_world::world::spawn::{SpawnKey, SpawnMetadata};
use rusty_world::world::{Config, Map, Position};

use crate::behaviors::Drifter;
use crate::scenarios::Scenario;

const CREATURE_ENTRY: u32 = 1000;

#[derive(Clone)]
pub struct ZoneConfig {
    pub player_count: usize,
    pub creature_count: usize,
    /// Half-width of the square the zone is populated in.
    pub spread: f32,
    pub seed: u64,
    pub workers: usize,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            player_count: 50,
            creature_count: 5_000,
            spread: 1_000.0,
            seed: 42,
            workers: 4,
        }
    }
}

pub struct ZoneScenario {
    config: ZoneConfig,
    fixture: Option<Fixture>,
    map: Option<Map>,
}

impl ZoneScenario {
    pub fn new() -> Self {
        Self::with_config(ZoneConfig::default())
    }

    pub fn with_config(config: ZoneConfig) -> Self {
        Self {
            config,
            fixture: None,
            map: None,
        }
    }

    pub fn map(&self) -> Option<&Map> {
        self.map.as_ref()
    }

    fn random_position(rng: &mut ChaCha8Rng, spread: f32) -> Position {
        Position::new(rng.gen_range(-spread..spread), rng.gen_range(-spread..spread), 0.0)
    }
}

impl Default for ZoneScenario {
    fn default() -> Self {
        Self::new()
    }
}

impl Scenario for ZoneScenario {
    fn name(&self) -> &'static str {
        "zone"
    }

    fn description(&self) -> &'static str {
        "Players roaming an open world map among wandering creatures"
    }

    fn entity_count(&self) -> usize {
        self.map.as_ref().map_or(0, |map| map.entities().len())
    }

    fn setup(&mut self) {
        let config = Config {
            workers: self.config.workers,
            ..Config::default()
        };
        let fixture = Fixture::with_config(config);
        let mut rng = ChaCha8Rng::seed_from_u64(self.config.seed);

        let seed = self.config.seed;
        fixture.factory.register(CREATURE_ENTRY, move |spawn| {
            let behavior = Drifter::new(seed ^ spawn.key.id, Duration::from_secs(2), 4.0);
            Entity::new(EntityKind::Creature, spawn.entry, spawn.position, behavior)
        });
        for id in 0..self.config.creature_count {
            let at = Self::random_position(&mut rng, self.config.spread);
            fixture
                .catalog
                .add_spawn(SpawnMetadata::new(SpawnKey::creature(id as u64), CREATURE_ENTRY, 0, at));
        }

        let mut map = fixture.world_map(0);
        for id in 0..self.config.player_count {
            let at = Self::random_position(&mut rng, self.config.spread);
            let behavior = Drifter::new(rng.gen_range(0..u64::MAX), TICK_50MS, 1.5);
            map.add_player(Entity::player(PlayerData::new(id as u64), at, behavior)).ok();
        }
        self.map = Some(map);
        self.fixture = Some(fixture);
    }

    fn update(&mut self) {
        if let Some(map) = self.map.as_mut() {
            map.update(TICK_50MS);
        }
    }

    fn teardown(&mut self) {
        if let Some(mut map) = self.map.take() {
            map.unload_all();
        }
        self.fixture = None;
    }
}
