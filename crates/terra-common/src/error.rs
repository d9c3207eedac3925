//! Error types for Terra.

use thiserror::Error;

use crate::coords::ChunkCoord;

/// Top-level error type for Terra operations.
#[derive(Debug, Error)]
pub enum TerraError {
    /// World/chunk errors
    #[error("World error: {0}")]
    World(#[from] WorldError),

    /// Terrain data generation errors
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunk lifecycle and viewer errors.
#[derive(Debug, Error)]
pub enum WorldError {
    /// A viewer id that was never registered, or was already removed
    #[error("Unknown viewer {0}")]
    UnknownViewer(u64),

    /// A footprint defines more rings than the world has detail levels
    #[error("Footprint has {rings} rings but only {detail_levels} detail levels are configured")]
    TooManyRings {
        /// Rings in the footprint
        rings: usize,
        /// Configured detail levels
        detail_levels: usize,
    },

    /// Footprint thresholds are empty, non-positive or not strictly ascending
    #[error("Invalid viewer footprint: {0}")]
    InvalidFootprint(String),

    /// A neighbor has not produced its heights yet
    #[error("Neighbor {neighbor} of chunk {coord} has not generated heights")]
    NeighborNotReady {
        /// Chunk whose normals were requested
        coord: ChunkCoord,
        /// Neighbor lacking height data
        neighbor: ChunkCoord,
    },

    /// A stage ran on a chunk whose data is missing
    #[error("Chunk {0} has no generated data")]
    MissingData(ChunkCoord),

    /// The mesh builder could not produce a visual
    #[error("Failed to build visual for chunk {coord}: {reason}")]
    MeshBuildFailed {
        /// Chunk being visualized
        coord: ChunkCoord,
        /// Builder-provided reason
        reason: String,
    },
}

/// Terrain data generation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    /// The provider could not produce data for a chunk
    #[error("Provider failed for chunk {coord}: {reason}")]
    ProviderFailed {
        /// Requested chunk
        coord: ChunkCoord,
        /// Provider-specified reason
        reason: String,
    },

    /// The background worker is gone
    #[error("Background generation pipeline is shut down")]
    PipelineClosed,
}

/// Result type alias for Terra operations.
pub type TerraResult<T> = Result<T, TerraError>;
