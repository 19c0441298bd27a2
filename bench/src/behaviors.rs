//! Entity behaviors used to give benchmark maps something to do.

use std::time::Duration;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rusty_world::world::entity::{Behavior, TickContext};

/// Steps a few yards in a random direction on a fixed cadence.
pub struct Drifter {
    rng: ChaCha8Rng,
    every: Duration,
    elapsed: Duration,
    stride: f32,
}

impl Drifter {
    pub fn new(seed: u64, every: Duration, stride: f32) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            every,
            elapsed: Duration::ZERO,
            stride,
        }
    }
}

impl Behavior for Drifter {
    fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
        self.elapsed += ctx.diff();
        if self.elapsed < self.every {
            return;
        }
        self.elapsed = Duration::ZERO;
        let dx = self.rng.gen_range(-self.stride..=self.stride);
        let dy = self.rng.gen_range(-self.stride..=self.stride);
        let next = ctx.state().position().offset(dx, dy, 0.0);
        ctx.move_to(next);
    }

    fn pump_session(&mut self, ctx: &mut TickContext<'_>) {
        self.on_tick(ctx);
    }
}

/// Dies after a fixed lifetime, so its spawn goes through the respawn queue.
pub struct Mortal {
    remaining: Duration,
}

impl Mortal {
    pub fn new(lifetime: Duration) -> Self {
        Self { remaining: lifetime }
    }
}

impl Behavior for Mortal {
    fn on_tick(&mut self, ctx: &mut TickContext<'_>) {
        self.remaining = self.remaining.saturating_sub(ctx.diff());
        if self.remaining.is_zero() {
            ctx.die();
        }
    }
}
