//! Interfaces of the collaborators the streaming core drives, and the data
//! they exchange.
//!
//! The core never samples noise, computes normals or builds meshes itself; it
//! only decides when those happen. See [`crate::reference`] for simple
//! implementations.

use glam::Vec3;
use std::fmt;
use terra_common::{ChunkCoord, Direction, GenerationError, WorldError};

/// Square grid of height samples, row-major with `y` growing towards
/// [`Direction::Top`].
///
/// Adjacent chunks share their border row/column.
#[derive(Debug, Clone, PartialEq)]
pub struct HeightMap {
    size: usize,
    samples: Vec<f32>,
}

impl HeightMap {
    /// Builds a map by evaluating `f(x, y)` for every sample.
    #[must_use]
    pub fn from_fn(size: usize, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let size = size.max(3);
        let mut samples = Vec::with_capacity(size * size);
        for y in 0..size {
            for x in 0..size {
                samples.push(f(x, y));
            }
        }
        Self { size, samples }
    }

    /// Samples per side.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// All samples.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sample at `(x, y)`.
    #[must_use]
    pub fn get(&self, x: usize, y: usize) -> Option<f32> {
        (x < self.size && y < self.size).then(|| self.samples[y * self.size + x])
    }

    /// Samples this chunk hands to a requester when this chunk lies on `side`
    /// of it.
    ///
    /// Taken one sample in from the shared border. Edge neighbors give a full
    /// row or column ordered by increasing coordinate; corner neighbors give a
    /// single sample.
    #[must_use]
    pub fn edge_towards(&self, side: Direction) -> Vec<f32> {
        let n = self.size;
        let near = 1;
        let far = n - 2;
        let at = |x: usize, y: usize| self.samples[y * n + x];
        match side {
            Direction::Bottom => (0..n).map(|x| at(x, far)).collect(),
            Direction::Top => (0..n).map(|x| at(x, near)).collect(),
            Direction::Left => (0..n).map(|y| at(far, y)).collect(),
            Direction::Right => (0..n).map(|y| at(near, y)).collect(),
            Direction::BottomLeft => vec![at(far, far)],
            Direction::BottomRight => vec![at(near, far)],
            Direction::TopRight => vec![at(near, near)],
            Direction::TopLeft => vec![at(far, near)],
        }
    }
}

/// Output of the terrain provider for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkData {
    /// Height samples
    pub heights: HeightMap,
    /// Biome index per height sample
    pub biomes: Vec<u8>,
}

/// Border samples of all eight neighbors, indexed by [`Direction`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NeighborEdges {
    edges: [Vec<f32>; 8],
}

impl NeighborEdges {
    /// Records the samples of the neighbor lying in `side`.
    pub fn set(&mut self, side: Direction, samples: Vec<f32>) {
        self.edges[side.index()] = samples;
    }

    /// Samples of the neighbor lying in `side`.
    #[must_use]
    pub fn get(&self, side: Direction) -> &[f32] {
        &self.edges[side.index()]
    }
}

/// Opaque handle to a built visual, owned by the [`MeshBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisualHandle(pub u64);

impl fmt::Display for VisualHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "visual#{}", self.0)
    }
}

/// Produces height and biome samples for a chunk.
///
/// Must be deterministic for a fixed seed and coordinate, and callable from
/// the background worker thread.
pub trait TerrainProvider: Send + Sync {
    /// Generates the data for `coord`.
    fn generate(&self, coord: ChunkCoord) -> Result<ChunkData, GenerationError>;
}

/// Computes per-sample normals from heights plus the neighbors' borders.
pub trait NormalGenerator {
    /// Returns one normal per height sample.
    fn compute_normals(&self, heights: &HeightMap, edges: &NeighborEdges) -> Vec<Vec3>;
}

/// Turns generated chunk data into a visual resource.
///
/// Only called from the scheduling thread.
pub trait MeshBuilder {
    /// Builds a visual for `coord` at detail level `lod` (0 = finest).
    fn build(
        &mut self,
        coord: ChunkCoord,
        data: &ChunkData,
        normals: &[Vec3],
        lod: usize,
    ) -> Result<VisualHandle, WorldError>;

    /// Releases a visual previously returned by [`MeshBuilder::build`].
    fn release(&mut self, handle: VisualHandle);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(size: usize) -> HeightMap {
        HeightMap::from_fn(size, |x, y| (y * 10 + x) as f32)
    }

    #[test]
    fn test_heightmap_size_is_at_least_three() {
        let map = HeightMap::from_fn(1, |_, _| 0.0);
        assert_eq!(map.size(), 3);
        assert_eq!(map.samples().len(), 9);
    }

    #[test]
    fn test_edges_are_one_in_from_shared_border() {
        let map = indexed(4);
        // Neighbor below: its row y = 2.
        assert_eq!(map.edge_towards(Direction::Bottom), vec![20.0, 21.0, 22.0, 23.0]);
        // Neighbor above: its row y = 1.
        assert_eq!(map.edge_towards(Direction::Top), vec![10.0, 11.0, 12.0, 13.0]);
        // Neighbor to the left: its column x = 2.
        assert_eq!(map.edge_towards(Direction::Left), vec![2.0, 12.0, 22.0, 32.0]);
        // Neighbor to the right: its column x = 1.
        assert_eq!(map.edge_towards(Direction::Right), vec![1.0, 11.0, 21.0, 31.0]);

        assert_eq!(map.edge_towards(Direction::BottomLeft), vec![22.0]);
        assert_eq!(map.edge_towards(Direction::BottomRight), vec![21.0]);
        assert_eq!(map.edge_towards(Direction::TopRight), vec![11.0]);
        assert_eq!(map.edge_towards(Direction::TopLeft), vec![12.0]);
    }

    #[test]
    fn test_neighbor_edges_indexing() {
        let mut edges = NeighborEdges::default();
        edges.set(Direction::Top, vec![1.0, 2.0]);
        assert_eq!(edges.get(Direction::Top), &[1.0, 2.0]);
        assert!(edges.get(Direction::Bottom).is_empty());
    }
}
