use super::grid::{MAP_HALF_SIZE, MAX_HEIGHT};
use super::map::MapId;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub orientation: f32,
}

impl Position {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self {
            x,
            y,
            z,
            orientation: 0.0,
        }
    }

    pub const fn with_orientation(mut self, orientation: f32) -> Self {
        self.orientation = orientation;
        self
    }

    /// Finite and inside the playable square of the map.
    pub fn is_valid(&self) -> bool {
        is_valid_map_coord(self.x, self.y) && self.z.is_finite() && self.z.abs() <= MAX_HEIGHT
    }

    pub fn distance_2d(&self, other: &Position) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    pub fn offset(&self, dx: f32, dy: f32, dz: f32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
            orientation: self.orientation,
        }
    }

    /// Component-wise difference `self - other`.
    pub fn delta(&self, other: &Position) -> (f32, f32, f32) {
        (self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

pub fn is_valid_map_coord(x: f32, y: f32) -> bool {
    let limit = MAP_HALF_SIZE - 0.5;
    x.is_finite() && y.is_finite() && x.abs() <= limit && y.abs() <= limit
}

/// A position on a specific map, used for teleport destinations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldLocation {
    pub map_id: MapId,
    pub position: Position,
}

impl WorldLocation {
    pub const fn new(map_id: MapId, position: Position) -> Self {
        Self { map_id, position }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validity_bounds() {
        assert!(Position::new(0.0, 0.0, 0.0).is_valid());
        assert!(Position::new(MAP_HALF_SIZE - 1.0, -(MAP_HALF_SIZE - 1.0), 10.0).is_valid());
        assert!(!Position::new(MAP_HALF_SIZE, 0.0, 0.0).is_valid());
        assert!(!Position::new(f32::NAN, 0.0, 0.0).is_valid());
        assert!(!Position::new(0.0, f32::INFINITY, 0.0).is_valid());
        assert!(!Position::new(0.0, 0.0, f32::NAN).is_valid());
    }

    #[test]
    fn distance_ignores_height() {
        let a = Position::new(0.0, 0.0, 0.0);
        let b = Position::new(3.0, 4.0, 100.0);
        assert_eq!(a.distance_2d(&b), 5.0);
    }
}
