//! Chunk coordinates and the eight-neighbor direction table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Chunk coordinate (identifies a chunk in the unbounded terrain grid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ChunkCoord {
    /// X coordinate in chunk space
    pub x: i32,
    /// Y coordinate in chunk space
    pub y: i32,
}

impl ChunkCoord {
    /// The origin chunk.
    pub const ORIGIN: Self = Self::new(0, 0);

    /// Creates a new chunk coordinate.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Returns this coordinate shifted by `(dx, dy)`.
    #[must_use]
    pub const fn offset(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
        }
    }

    /// Returns the adjacent chunk in the given direction.
    #[must_use]
    pub const fn neighbor(self, direction: Direction) -> Self {
        let (dx, dy) = direction.offset();
        self.offset(dx, dy)
    }

    /// Returns all eight neighbors, in [`Direction::ALL`] order.
    #[must_use]
    pub fn neighbors(self) -> [Self; 8] {
        Direction::ALL.map(|d| self.neighbor(d))
    }

    /// Converts a horizontal world position to the chunk containing it.
    ///
    /// `visual_size` is the world-space width of one chunk. A position exactly
    /// on a chunk boundary rounds to the even chunk index.
    #[must_use]
    pub fn from_world_position(x: f32, z: f32, visual_size: f32) -> Self {
        Self {
            x: (x / visual_size - 0.5).round_ties_even() as i32,
            y: (z / visual_size - 0.5).round_ties_even() as i32,
        }
    }
}

impl fmt::Display for ChunkCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

impl From<(i32, i32)> for ChunkCoord {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

/// One of the eight chunks surrounding a chunk.
///
/// `y` grows towards [`Direction::Top`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// (-1, -1)
    BottomLeft,
    /// (0, -1)
    Bottom,
    /// (1, -1)
    BottomRight,
    /// (1, 0)
    Right,
    /// (1, 1)
    TopRight,
    /// (0, 1)
    Top,
    /// (-1, 1)
    TopLeft,
    /// (-1, 0)
    Left,
}

impl Direction {
    /// All directions, counter-clockwise starting at the bottom-left corner.
    pub const ALL: [Self; 8] = [
        Self::BottomLeft,
        Self::Bottom,
        Self::BottomRight,
        Self::Right,
        Self::TopRight,
        Self::Top,
        Self::TopLeft,
        Self::Left,
    ];

    /// Returns the `(dx, dy)` step towards this neighbor.
    #[must_use]
    pub const fn offset(self) -> (i32, i32) {
        match self {
            Self::BottomLeft => (-1, -1),
            Self::Bottom => (0, -1),
            Self::BottomRight => (1, -1),
            Self::Right => (1, 0),
            Self::TopRight => (1, 1),
            Self::Top => (0, 1),
            Self::TopLeft => (-1, 1),
            Self::Left => (-1, 0),
        }
    }

    /// Position of this direction in [`Direction::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_neighbors_are_distinct_and_adjacent() {
        let center = ChunkCoord::new(-3, 7);
        let neighbors = center.neighbors();
        for (i, a) in neighbors.iter().enumerate() {
            assert!((a.x - center.x).abs() <= 1 && (a.y - center.y).abs() <= 1);
            assert_ne!(*a, center);
            for b in &neighbors[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_direction_index_matches_table() {
        for (i, d) in Direction::ALL.iter().enumerate() {
            assert_eq!(d.index(), i);
        }
    }

    #[test]
    fn test_from_world_position() {
        assert_eq!(ChunkCoord::from_world_position(5.0, 5.0, 10.0), ChunkCoord::ORIGIN);
        assert_eq!(ChunkCoord::from_world_position(15.0, -5.0, 10.0), ChunkCoord::new(1, -1));
        assert_eq!(ChunkCoord::from_world_position(-15.0, 25.0, 10.0), ChunkCoord::new(-2, 2));
    }

    #[test]
    fn test_world_position_on_boundary_rounds_to_even_chunk() {
        assert_eq!(ChunkCoord::from_world_position(0.0, 0.0, 10.0), ChunkCoord::ORIGIN);
        assert_eq!(ChunkCoord::from_world_position(10.0, 20.0, 10.0), ChunkCoord::new(0, 2));
        assert_eq!(ChunkCoord::from_world_position(30.0, -10.0, 10.0), ChunkCoord::new(2, -2));
        assert_eq!(ChunkCoord::from_world_position(-30.0, 40.0, 10.0), ChunkCoord::new(-4, 4));
        // Just inside either side of a boundary.
        assert_eq!(ChunkCoord::from_world_position(10.5, 9.5, 10.0), ChunkCoord::new(1, 0));
    }

    proptest! {
        #[test]
        fn prop_neighbor_follows_offset(x in -1000i32..1000, y in -1000i32..1000, i in 0usize..8) {
            let d = Direction::ALL[i];
            let (dx, dy) = d.offset();
            let c = ChunkCoord::new(x, y);
            prop_assert_eq!(c.neighbor(d), ChunkCoord::new(x + dx, y + dy));
            prop_assert_eq!(c.neighbors()[d.index()], c.neighbor(d));
        }
    }
}
