//! # Terra Stream
//!
//! Chunk lifecycle and scheduling for level-of-detail terrain streamed around
//! moving viewers.
//!
//! This crate handles:
//! - Time-boxed priority scheduling of chunk work
//! - The per-chunk generation state machine and its neighbor dependency
//! - Reference-counted LOD activation driven by viewer positions
//! - Sparse storage over signed chunk coordinates
//! - Off-thread terrain data generation

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod activation;
pub mod chunk;
pub mod clock;
pub mod collaborators;
pub mod config;
pub mod grid;
pub mod pipeline;
pub mod reference;
pub mod scheduler;
pub mod store;
pub mod world;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::activation::*;
    pub use crate::chunk::*;
    pub use crate::clock::*;
    pub use crate::collaborators::*;
    pub use crate::config::*;
    pub use crate::grid::*;
    pub use crate::pipeline::*;
    pub use crate::reference::*;
    pub use crate::scheduler::*;
    pub use crate::store::*;
    pub use crate::world::*;
}

pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use terra_common::ChunkCoord;

    #[test]
    fn test_world_creation() {
        let config = StreamingConfig {
            generation_mode: GenerationMode::Inline,
            ..Default::default()
        };
        let world = TerrainWorld::new(
            config,
            Arc::new(PerlinTerrainProvider::new(PerlinConfig::default())),
            Box::new(FiniteDifferenceNormals::default()),
            HeadlessMeshBuilder::new(),
        )
        .expect("create world");
        assert!(world.chunk(ChunkCoord::ORIGIN).is_none());
        assert_eq!(world.stats(), WorldStats::default());
    }
}
