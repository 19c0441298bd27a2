use std::collections::HashMap;

use super::{GroupId, SpawnGroupFlags, SpawnGroupTemplate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnGroupState {
    pub group: GroupId,
    pub active: bool,
    /// Set by explicit toggles. Condition sweeps leave such groups alone.
    pub manual: bool,
}

/// What a condition re-evaluation asks of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupTransition {
    None,
    Spawn,
    /// Despawn members and forget their respawn times.
    Despawn,
    /// Mark inactive, leaving live members alone.
    Deactivate,
}

impl GroupTransition {
    /// Decide the transition for a non-system, non-manual group.
    pub fn decide(template: &SpawnGroupTemplate, is_active: bool, should_be_active: bool) -> Self {
        match (is_active, should_be_active) {
            (false, true) => GroupTransition::Spawn,
            (true, false) if template.flags.contains(SpawnGroupFlags::DESPAWN_ON_CONDITION_FAILURE) => {
                GroupTransition::Despawn
            }
            (true, false) => GroupTransition::Deactivate,
            _ => GroupTransition::None,
        }
    }
}

/// Activation state of the spawn groups of one map. Groups never touched fall back to
/// "active unless manual"; system groups are always active.
#[derive(Debug, Default)]
pub struct SpawnGroups {
    states: HashMap<GroupId, SpawnGroupState>,
}

impl SpawnGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self, template: &SpawnGroupTemplate) -> bool {
        if template.is_system() {
            return true;
        }
        self.states
            .get(&template.id)
            .map_or(!template.is_manual(), |state| state.active)
    }

    /// Whether only explicit calls may change the group.
    pub fn is_manual(&self, template: &SpawnGroupTemplate) -> bool {
        template.is_manual() || self.states.get(&template.id).is_some_and(|state| state.manual)
    }

    /// Record the outcome of a condition evaluation. Keeps an earlier manual toggle.
    pub fn set_active(&mut self, group: GroupId, active: bool) {
        self.states
            .entry(group)
            .and_modify(|state| state.active = active)
            .or_insert(SpawnGroupState {
                group,
                active,
                manual: false,
            });
    }

    /// Record an explicit toggle.
    pub fn toggle(&mut self, group: GroupId, active: bool) {
        self.states.insert(group, SpawnGroupState { group, active, manual: true });
    }

    pub fn state(&self, template: &SpawnGroupTemplate) -> SpawnGroupState {
        SpawnGroupState {
            group: template.id,
            active: self.is_active(template),
            manual: self.is_manual(template),
        }
    }
}
