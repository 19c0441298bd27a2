//! Map runtime for a multiplayer world server.
//!
//! `core` carries the engine plumbing (worker pool, clock, logging, fixed-step loop) and
//! `world` carries the map runtime built on it: spatial grids, the entity registry, respawn
//! scheduling, spawn groups, the phased tick and the open world / instance / battleground
//! variants.

pub mod core;
pub mod world;
