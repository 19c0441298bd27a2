use crate::world::entity::Guid;

/// Which of the two per-cell containers an entity lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Players, creatures, dynamic objects and corpses.
    World,
    /// Gameobjects, area triggers and transports.
    Grid,
}

/// The buckets a visitor wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub world: bool,
    pub grid: bool,
}

impl Interest {
    pub const ALL: Interest = Interest { world: true, grid: true };
    pub const WORLD: Interest = Interest { world: true, grid: false };
    pub const GRID: Interest = Interest { world: false, grid: true };

    pub fn includes(&self, bucket: Bucket) -> bool {
        match bucket {
            Bucket::World => self.world,
            Bucket::Grid => self.grid,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Cell {
    world: Vec<Guid>,
    grid: Vec<Guid>,
}

impl Cell {
    pub fn insert(&mut self, bucket: Bucket, guid: Guid) {
        let list = self.bucket_mut(bucket);
        if !list.contains(&guid) {
            list.push(guid);
        }
    }

    pub fn remove(&mut self, bucket: Bucket, guid: Guid) -> bool {
        let list = self.bucket_mut(bucket);
        match list.iter().position(|g| *g == guid) {
            Some(at) => {
                list.swap_remove(at);
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, bucket: Bucket, guid: Guid) -> bool {
        self.bucket(bucket).contains(&guid)
    }

    pub fn bucket(&self, bucket: Bucket) -> &[Guid] {
        match bucket {
            Bucket::World => &self.world,
            Bucket::Grid => &self.grid,
        }
    }

    fn bucket_mut(&mut self, bucket: Bucket) -> &mut Vec<Guid> {
        match bucket {
            Bucket::World => &mut self.world,
            Bucket::Grid => &mut self.grid,
        }
    }

    pub fn iter(&self, interest: Interest) -> impl Iterator<Item = Guid> + '_ {
        let world: &[Guid] = if interest.world { &self.world } else { &[] };
        let grid: &[Guid] = if interest.grid { &self.grid } else { &[] };
        world.iter().chain(grid.iter()).copied()
    }

    pub fn len(&self) -> usize {
        self.world.len() + self.grid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.world.is_empty() && self.grid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_are_independent() {
        // Given
        let mut cell = Cell::default();
        let a = Guid::new(1, 0);
        let b = Guid::new(2, 0);

        // When
        cell.insert(Bucket::World, a);
        cell.insert(Bucket::World, a);
        cell.insert(Bucket::Grid, b);

        // Then
        assert_eq!(cell.len(), 2);
        assert_eq!(cell.iter(Interest::WORLD).collect::<Vec<_>>(), vec![a]);
        assert_eq!(cell.iter(Interest::GRID).collect::<Vec<_>>(), vec![b]);
        assert!(!cell.remove(Bucket::Grid, a));
        assert!(cell.remove(Bucket::World, a));
        assert_eq!(cell.iter(Interest::ALL).collect::<Vec<_>>(), vec![b]);
    }
}
