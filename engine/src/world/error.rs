use std::fmt;

use super::entity::Guid;

/// Why a player was refused entry to a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnterError {
    /// The player is already on this map.
    AlreadyInMap,
    /// The entry position is outside the map or not finite.
    InvalidPosition,
    /// `add_player` was handed an entity without player data.
    NotAPlayer,
    /// The instance is at its player cap.
    MaxPlayers,
    /// An encounter is running and the instance is locked for newcomers.
    EncounterInProgress,
    /// The player holds a live lock on a different instance of this map.
    InstanceBindMismatch,
    /// The player is not assigned to this battleground instance.
    BattlegroundMismatch,
}

impl fmt::Display for EnterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnterError::AlreadyInMap => write!(f, "player is already in this map"),
            EnterError::InvalidPosition => write!(f, "entry position is invalid"),
            EnterError::NotAPlayer => write!(f, "entity is not a player"),
            EnterError::MaxPlayers => write!(f, "instance is full"),
            EnterError::EncounterInProgress => write!(f, "an encounter is in progress"),
            EnterError::InstanceBindMismatch => write!(f, "player is bound to another instance"),
            EnterError::BattlegroundMismatch => write!(f, "player is not assigned to this battleground"),
        }
    }
}

impl std::error::Error for EnterError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocateError {
    InvalidPosition,
    UnknownEntity(Guid),
}

impl fmt::Display for RelocateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelocateError::InvalidPosition => write!(f, "target position is invalid"),
            RelocateError::UnknownEntity(guid) => write!(f, "entity {guid} is not in this map"),
        }
    }
}

impl std::error::Error for RelocateError {}
