pub mod config;
pub mod entity;
pub mod error;
pub mod grid;
pub mod hooks;
pub mod manager;
pub mod map;
pub mod memory;
pub mod position;
pub mod services;
pub mod spawn;
pub mod variant;

pub use config::{Config, DynamicRespawn};
pub use error::{EnterError, RelocateError};
pub use hooks::{Hooks, VisibilityChange};
pub use manager::MapManager;
pub use map::{Difficulty, InstanceId, Map, MapId, MapIdentity, MapKind, RelocateOutcome, Visitor};
pub use position::{Position, WorldLocation};
pub use services::Services;
pub use variant::Variant;
