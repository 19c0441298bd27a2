use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{info, LevelFilter};
use rand::Rng;

use rusty_world::core::log::ChannelLogger;
use rusty_world::core::sim_loop::{SimLoop, TICK_50MS};
use rusty_world::core::tasks::Executor;
use rusty_world::core::time::SystemClock;
use rusty_world::world::entity::{Behavior, Entity, EntityKind, PlayerData, TickContext};
use rusty_world::world::memory::{
    ConditionTable, FlatTerrain, MemoryCatalog, MemoryPersistence, NoPools, RecordingTeleporter, TemplateFactory,
};
use rusty_world::world::spawn::{SpawnGroupFlags, SpawnGroupTemplate, SpawnKey, SpawnMetadata};
use rusty_world::world::variant::InstanceLocks;
use rusty_world::world::{Config, Hooks, MapManager, Position, Services};

const WOLF: u32 = 299;
const CHEST: u32 = 2843;

/// Wanders a few yards at a time around wherever it stands.
struct Wander {
    cooldown: Duration,
}

impl Behavior for Wander {
    fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
        self.cooldown = self.cooldown.saturating_sub(ctx.diff());
        if !self.cooldown.is_zero() {
            return;
        }
        let mut rng = rand::thread_rng();
        self.cooldown = Duration::from_millis(rng.gen_range(500..=3000));
        let step = ctx
            .state()
            .position()
            .offset(rng.gen_range(-5.0..=5.0), rng.gen_range(-5.0..=5.0), 0.0);
        ctx.move_to(step);
    }
}

/// Walks a straight line east, then turns back after a while.
struct Patrol {
    heading: f32,
    walked: f32,
}

impl Behavior for Patrol {
    fn pump_session(&mut self, ctx: &mut TickContext<'_>) {
        let stride = 7.0 * ctx.diff().as_secs_f32();
        self.walked += stride;
        if self.walked > 400.0 {
            self.walked = 0.0;
            self.heading = -self.heading;
        }
        let next = ctx.state().position().offset(self.heading * stride, 0.0, 0.0);
        ctx.move_to(next);
    }
}

fn seed(catalog: &MemoryCatalog) {
    catalog.add_group(SpawnGroupTemplate::new(1, "forest wolves", Some(0), SpawnGroupFlags::NONE));
    catalog.add_group(SpawnGroupTemplate::new(2, "buried treasure", Some(0), SpawnGroupFlags::MANUAL_SPAWN));
    let mut rng = rand::thread_rng();
    for id in 1..=200 {
        let at = Position::new(rng.gen_range(-600.0..600.0), rng.gen_range(-600.0..600.0), 0.0);
        catalog.add_spawn(
            SpawnMetadata::new(SpawnKey::creature(id), WOLF, 0, at)
                .in_group(1)
                .with_respawn_delay(rng.gen_range(20..=60)),
        );
    }
    for id in 1..=10 {
        let at = Position::new(20.0 * id as f32, 15.0, 0.0);
        catalog.add_spawn(SpawnMetadata::new(SpawnKey::gameobject(id), CHEST, 0, at).in_group(2));
    }
}

fn main() {
    let logs = match ChannelLogger::install(LevelFilter::Info) {
        Ok(logs) => logs,
        Err(err) => {
            eprintln!("Failed to install logger: {err}");
            return;
        }
    };
    thread::spawn(move || {
        for message in logs {
            println!("[{:<5}] {}: {}", message.level, message.target, message.message);
        }
    });

    let seconds = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(10u64);

    let config = Arc::new(Config::default());
    let catalog = Arc::new(MemoryCatalog::new());
    seed(&catalog);
    let factory = Arc::new(TemplateFactory::new());
    factory.register(WOLF, |spawn| {
        Entity::new(EntityKind::Creature, spawn.entry, spawn.position, Wander { cooldown: Duration::ZERO })
    });

    let mut hooks = Hooks::new();
    hooks.on_player_enter(|map, player| info!("Welcome {player} to {map}"));
    hooks.on_grid_unloaded(|map, grid| info!("{map} released grid {grid}"));

    let services = Services {
        persistence: Arc::new(MemoryPersistence::new()),
        catalog,
        conditions: Arc::new(ConditionTable::new()),
        terrain: Arc::new(FlatTerrain::default()),
        factory,
        pools: Arc::new(NoPools),
        teleporter: Arc::new(RecordingTeleporter::new()),
        clock: Arc::new(SystemClock),
        hooks: Arc::new(hooks),
    };
    let executor = Arc::new(Executor::named(config.workers, "map-worker"));
    let mut manager = MapManager::new(config, services, executor, Arc::new(InstanceLocks::new()));

    let world = manager.create_world_map(0);
    for id in 1..=3 {
        let start = Position::new(-150.0 * id as f32, 50.0 * id as f32, 0.0);
        let patrol = Patrol {
            heading: 1.0,
            walked: 0.0,
        };
        if let Err(err) = world.add_player(Entity::player(PlayerData::new(id), start, patrol)) {
            info!("Player {id} could not enter: {err}");
        }
    }
    world.spawn_group_spawn(2, false, false);

    let stop = Arc::new(AtomicBool::new(false));
    let stopper = Arc::clone(&stop);
    thread::spawn(move || {
        thread::sleep(Duration::from_secs(seconds));
        stopper.store(true, Ordering::Relaxed);
    });

    info!("Running the world for {seconds}s");
    let (mut manager, ticks) = SimLoop::start(TICK_50MS, manager, |diff, manager| manager.update(diff), stop);
    for map in manager.maps() {
        info!(
            "{} after {ticks} ticks: {} entities, {} grids loaded, {} pending respawns",
            map.identity(),
            map.entities().len(),
            map.grids().loaded_count(),
            map.pending_respawns().len()
        );
    }
    manager.unload_all();
    // Let the log thread drain.
    thread::sleep(Duration::from_millis(100));
}
