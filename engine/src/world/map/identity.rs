use std::fmt;

pub type MapId = u32;
pub type InstanceId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Difficulty(pub u8);

impl Difficulty {
    pub const NORMAL: Self = Self(0);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MapKind {
    World,
    Instance,
    Battleground,
}

/// Which map this is. Open world maps use instance id 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapIdentity {
    pub id: MapId,
    pub instance_id: InstanceId,
    pub difficulty: Difficulty,
    pub kind: MapKind,
}

impl MapIdentity {
    pub const fn new(id: MapId, instance_id: InstanceId, difficulty: Difficulty, kind: MapKind) -> Self {
        Self {
            id,
            instance_id,
            difficulty,
            kind,
        }
    }
}

impl fmt::Display for MapIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "map {} instance {}", self.id, self.instance_id)
    }
}
