//! Reference collaborators.
//!
//! Enough to run the engine headless and in tests: Perlin heights, central
//! difference normals and a mesh builder that only keeps books.

use ahash::AHashMap;
use glam::Vec3;
use noise::{NoiseFn, Perlin};
use terra_common::{ChunkCoord, Direction, GenerationError, WorldError};

use crate::collaborators::{
    ChunkData, HeightMap, MeshBuilder, NeighborEdges, NormalGenerator, TerrainProvider,
    VisualHandle,
};

/// Perlin terrain provider configuration.
#[derive(Debug, Clone)]
pub struct PerlinConfig {
    /// World seed
    pub seed: u32,
    /// Samples per chunk side
    pub resolution: usize,
    /// Horizontal noise scale in samples (larger = smoother)
    pub terrain_scale: f64,
    /// Vertical scale of the output heights
    pub height_scale: f64,
    /// Number of distinct biome indices
    pub biome_count: u8,
}

impl Default for PerlinConfig {
    fn default() -> Self {
        Self {
            seed: 12345,
            resolution: 33,
            terrain_scale: 100.0,
            height_scale: 50.0,
            biome_count: 4,
        }
    }
}

/// Heights from two octaves of Perlin noise, biomes from a low-frequency one.
pub struct PerlinTerrainProvider {
    config: PerlinConfig,
    terrain_noise: Perlin,
    detail_noise: Perlin,
    biome_noise: Perlin,
}

impl PerlinTerrainProvider {
    /// Creates a provider with the given config.
    #[must_use]
    pub fn new(config: PerlinConfig) -> Self {
        Self {
            terrain_noise: Perlin::new(config.seed),
            detail_noise: Perlin::new(config.seed.wrapping_add(1)),
            biome_noise: Perlin::new(config.seed.wrapping_add(2)),
            config,
        }
    }
}

impl TerrainProvider for PerlinTerrainProvider {
    fn generate(&self, coord: ChunkCoord) -> Result<ChunkData, GenerationError> {
        let n = self.config.resolution.max(3);
        // Neighboring chunks share their border samples.
        let stride = (n - 1) as f64;
        let origin_x = f64::from(coord.x) * stride;
        let origin_y = f64::from(coord.y) * stride;
        let scale = self.config.terrain_scale;
        let biomes = f64::from(self.config.biome_count.max(1));

        let mut biome_samples = Vec::with_capacity(n * n);
        let heights = HeightMap::from_fn(n, |x, y| {
            let wx = (origin_x + x as f64) / scale;
            let wy = (origin_y + y as f64) / scale;
            let height = self.terrain_noise.get([wx, wy]);
            let detail = self.detail_noise.get([wx * 4.0, wy * 4.0]) * 0.1;

            let b = (self.biome_noise.get([wx * 0.25, wy * 0.25]) + 1.0) / 2.0;
            biome_samples.push(((b * biomes) as u8).min(self.config.biome_count.saturating_sub(1)));

            ((height + detail) * self.config.height_scale) as f32
        });

        Ok(ChunkData {
            heights,
            biomes: biome_samples,
        })
    }
}

/// Central-difference normals; border samples read the neighbors' edges.
#[derive(Debug, Clone, Copy)]
pub struct FiniteDifferenceNormals {
    /// Horizontal distance between samples
    pub spacing: f32,
}

impl Default for FiniteDifferenceNormals {
    fn default() -> Self {
        Self { spacing: 1.0 }
    }
}

impl NormalGenerator for FiniteDifferenceNormals {
    fn compute_normals(&self, heights: &HeightMap, edges: &NeighborEdges) -> Vec<Vec3> {
        let n = heights.size();
        let samples = heights.samples();
        let at = |x: usize, y: usize| samples[y * n + x];
        // Falls back to the sample itself when an edge is missing.
        let edge = |side: Direction, i: usize, fallback: f32| {
            edges.get(side).get(i).copied().unwrap_or(fallback)
        };

        let mut normals = Vec::with_capacity(n * n);
        for y in 0..n {
            for x in 0..n {
                let h = at(x, y);
                let left = if x == 0 { edge(Direction::Left, y, h) } else { at(x - 1, y) };
                let right = if x + 1 == n { edge(Direction::Right, y, h) } else { at(x + 1, y) };
                let down = if y == 0 { edge(Direction::Bottom, x, h) } else { at(x, y - 1) };
                let up = if y + 1 == n { edge(Direction::Top, x, h) } else { at(x, y + 1) };
                normals.push(Vec3::new(left - right, 2.0 * self.spacing, down - up).normalize());
            }
        }
        normals
    }
}

/// A built visual as tracked by [`HeadlessMeshBuilder`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadlessVisual {
    /// Chunk the visual belongs to
    pub coord: ChunkCoord,
    /// Detail level it was built at
    pub lod: usize,
    /// Vertices a grid mesh at that level would have
    pub vertices: usize,
}

/// Mesh builder that allocates handles and counts vertices, nothing else.
#[derive(Debug, Default)]
pub struct HeadlessMeshBuilder {
    next_handle: u64,
    live: AHashMap<VisualHandle, HeadlessVisual>,
    built: u64,
    released: u64,
}

impl HeadlessMeshBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Visuals built and not yet released.
    #[must_use]
    pub fn live(&self) -> usize {
        self.live.len()
    }

    /// Looks up a live visual.
    #[must_use]
    pub fn visual(&self, handle: VisualHandle) -> Option<&HeadlessVisual> {
        self.live.get(&handle)
    }

    /// Total build calls that succeeded.
    #[must_use]
    pub const fn built(&self) -> u64 {
        self.built
    }

    /// Total release calls for known handles.
    #[must_use]
    pub const fn released(&self) -> u64 {
        self.released
    }

    /// Vertices in the live visuals.
    #[must_use]
    pub fn live_vertices(&self) -> usize {
        self.live.values().map(|v| v.vertices).sum()
    }
}

impl MeshBuilder for HeadlessMeshBuilder {
    fn build(
        &mut self,
        coord: ChunkCoord,
        data: &ChunkData,
        normals: &[Vec3],
        lod: usize,
    ) -> Result<VisualHandle, WorldError> {
        let size = data.heights.size();
        if normals.len() != size * size {
            return Err(WorldError::MeshBuildFailed {
                coord,
                reason: format!("expected {} normals, got {}", size * size, normals.len()),
            });
        }
        // Each level halves the samples per side of a 2^k + 1 grid.
        let side = ((size - 1) >> lod.min(usize::BITS as usize - 1)).max(1) + 1;
        let handle = VisualHandle(self.next_handle);
        self.next_handle += 1;
        self.built += 1;
        self.live.insert(
            handle,
            HeadlessVisual {
                coord,
                lod,
                vertices: side * side,
            },
        );
        Ok(handle)
    }

    fn release(&mut self, handle: VisualHandle) {
        if self.live.remove(&handle).is_some() {
            self.released += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(seed: u32) -> PerlinTerrainProvider {
        PerlinTerrainProvider::new(PerlinConfig {
            seed,
            ..Default::default()
        })
    }

    #[test]
    fn test_generation_deterministic() {
        let a = seeded(42);
        let b = seeded(42);
        let coord = ChunkCoord::new(3, -2);
        assert_eq!(a.generate(coord), b.generate(coord));
    }

    #[test]
    fn test_different_seeds_different_terrain() {
        let a = seeded(42);
        let b = seeded(999);
        let coord = ChunkCoord::new(1, 1);
        assert_ne!(a.generate(coord), b.generate(coord));
    }

    #[test]
    fn test_neighbors_share_border_samples() {
        let provider = seeded(7);
        let left = provider.generate(ChunkCoord::new(0, 0)).expect("generate");
        let right = provider.generate(ChunkCoord::new(1, 0)).expect("generate");
        let n = left.heights.size();
        for y in 0..n {
            assert_eq!(left.heights.get(n - 1, y), right.heights.get(0, y));
        }
        assert_eq!(left.biomes.len(), n * n);
        assert!(left.biomes.iter().all(|b| *b < 4));
    }

    #[test]
    fn test_flat_heights_point_up() {
        let heights = HeightMap::from_fn(5, |_, _| 2.0);
        let normals = FiniteDifferenceNormals::default()
            .compute_normals(&heights, &NeighborEdges::default());
        assert_eq!(normals.len(), 25);
        for normal in normals {
            assert!((normal - Vec3::Y).length() < 1e-6);
        }
    }

    #[test]
    fn test_slope_uses_neighbor_edges() {
        // Heights rise with x; the left neighbor continues the slope.
        let heights = HeightMap::from_fn(3, |x, _| x as f32);
        let mut edges = NeighborEdges::default();
        edges.set(Direction::Left, vec![-1.0; 3]);
        edges.set(Direction::Right, vec![3.0; 3]);
        let normals = FiniteDifferenceNormals::default().compute_normals(&heights, &edges);
        let first = normals[0];
        let middle = normals[1];
        assert!((first - middle).length() < 1e-6);
        assert!(first.x < 0.0);
    }

    #[test]
    fn test_headless_builder_tracks_handles() {
        let provider = seeded(1);
        let data = provider.generate(ChunkCoord::ORIGIN).expect("generate");
        let normals = vec![Vec3::Y; data.heights.size() * data.heights.size()];
        let mut builder = HeadlessMeshBuilder::new();

        let fine = builder.build(ChunkCoord::ORIGIN, &data, &normals, 0).expect("build");
        let coarse = builder.build(ChunkCoord::ORIGIN, &data, &normals, 2).expect("build");
        assert_eq!(builder.visual(fine).map(|v| v.vertices), Some(33 * 33));
        assert_eq!(builder.visual(coarse).map(|v| v.vertices), Some(9 * 9));

        builder.release(fine);
        builder.release(fine);
        assert_eq!(builder.live(), 1);
        assert_eq!(builder.released(), 1);

        assert!(builder.build(ChunkCoord::ORIGIN, &data, &[], 0).is_err());
    }
}
