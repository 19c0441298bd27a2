//! Typed listener lists for map events.
//!
//! Listeners are registered while the server starts, before the hooks are shared with maps,
//! and are invoked synchronously on the map's update thread in registration order.
//!
//! ```rust,ignore
//! let mut hooks = Hooks::default();
//! hooks.on_player_enter(|map, player| info!("{player} entered map {}", map.id));
//! let services = Services { hooks: Arc::new(hooks), .. };
//! ```

use std::fmt;
use std::time::Duration;

use super::entity::{EntityState, Guid};
use super::grid::GridCoord;
use super::map::MapIdentity;

/// What a player started and stopped seeing during one relocation notify pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisibilityChange {
    pub viewer: Guid,
    pub appeared: Vec<Guid>,
    pub disappeared: Vec<Guid>,
}

type PlayerListener = Box<dyn Fn(&MapIdentity, Guid) + Send + Sync>;
type EntityListener = Box<dyn Fn(&MapIdentity, &EntityState) + Send + Sync>;
type RemovalListener = Box<dyn Fn(&MapIdentity, Guid) + Send + Sync>;
type VisibilityListener = Box<dyn Fn(&MapIdentity, &VisibilityChange) + Send + Sync>;
type UpdatesListener = Box<dyn Fn(&MapIdentity, &[Guid]) + Send + Sync>;
type GridListener = Box<dyn Fn(&MapIdentity, GridCoord) + Send + Sync>;
type TickListener = Box<dyn Fn(&MapIdentity, Duration) + Send + Sync>;

#[derive(Default)]
pub struct Hooks {
    player_enter: Vec<PlayerListener>,
    player_leave: Vec<PlayerListener>,
    entity_added: Vec<EntityListener>,
    entity_removed: Vec<RemovalListener>,
    visibility: Vec<VisibilityListener>,
    object_updates: Vec<UpdatesListener>,
    grid_loaded: Vec<GridListener>,
    grid_unloaded: Vec<GridListener>,
    map_updated: Vec<TickListener>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_player_enter(&mut self, f: impl Fn(&MapIdentity, Guid) + Send + Sync + 'static) {
        self.player_enter.push(Box::new(f));
    }

    pub fn on_player_leave(&mut self, f: impl Fn(&MapIdentity, Guid) + Send + Sync + 'static) {
        self.player_leave.push(Box::new(f));
    }

    pub fn on_entity_added(&mut self, f: impl Fn(&MapIdentity, &EntityState) + Send + Sync + 'static) {
        self.entity_added.push(Box::new(f));
    }

    pub fn on_entity_removed(&mut self, f: impl Fn(&MapIdentity, Guid) + Send + Sync + 'static) {
        self.entity_removed.push(Box::new(f));
    }

    pub fn on_visibility_change(&mut self, f: impl Fn(&MapIdentity, &VisibilityChange) + Send + Sync + 'static) {
        self.visibility.push(Box::new(f));
    }

    /// Entities that changed during a tick, reported once at the end of it.
    pub fn on_object_updates(&mut self, f: impl Fn(&MapIdentity, &[Guid]) + Send + Sync + 'static) {
        self.object_updates.push(Box::new(f));
    }

    pub fn on_grid_loaded(&mut self, f: impl Fn(&MapIdentity, GridCoord) + Send + Sync + 'static) {
        self.grid_loaded.push(Box::new(f));
    }

    pub fn on_grid_unloaded(&mut self, f: impl Fn(&MapIdentity, GridCoord) + Send + Sync + 'static) {
        self.grid_unloaded.push(Box::new(f));
    }

    pub fn on_map_updated(&mut self, f: impl Fn(&MapIdentity, Duration) + Send + Sync + 'static) {
        self.map_updated.push(Box::new(f));
    }

    pub(crate) fn player_entered(&self, map: &MapIdentity, player: Guid) {
        self.player_enter.iter().for_each(|f| f(map, player));
    }

    pub(crate) fn player_left(&self, map: &MapIdentity, player: Guid) {
        self.player_leave.iter().for_each(|f| f(map, player));
    }

    pub(crate) fn entity_added(&self, map: &MapIdentity, entity: &EntityState) {
        self.entity_added.iter().for_each(|f| f(map, entity));
    }

    pub(crate) fn entity_removed(&self, map: &MapIdentity, entity: Guid) {
        self.entity_removed.iter().for_each(|f| f(map, entity));
    }

    pub(crate) fn visibility_changed(&self, map: &MapIdentity, change: &VisibilityChange) {
        self.visibility.iter().for_each(|f| f(map, change));
    }

    pub(crate) fn objects_updated(&self, map: &MapIdentity, changed: &[Guid]) {
        self.object_updates.iter().for_each(|f| f(map, changed));
    }

    pub(crate) fn grid_loaded(&self, map: &MapIdentity, grid: GridCoord) {
        self.grid_loaded.iter().for_each(|f| f(map, grid));
    }

    pub(crate) fn grid_unloaded(&self, map: &MapIdentity, grid: GridCoord) {
        self.grid_unloaded.iter().for_each(|f| f(map, grid));
    }

    pub(crate) fn map_updated(&self, map: &MapIdentity, diff: Duration) {
        self.map_updated.iter().for_each(|f| f(map, diff));
    }

    pub fn has_object_update_listeners(&self) -> bool {
        !self.object_updates.is_empty()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("player_enter", &self.player_enter.len())
            .field("player_leave", &self.player_leave.len())
            .field("entity_added", &self.entity_added.len())
            .field("entity_removed", &self.entity_removed.len())
            .field("visibility", &self.visibility.len())
            .field("object_updates", &self.object_updates.len())
            .field("grid_loaded", &self.grid_loaded.len())
            .field("grid_unloaded", &self.grid_unloaded.len())
            .field("map_updated", &self.map_updated.len())
            .finish()
    }
}
