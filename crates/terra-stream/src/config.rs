//! Streaming configuration.
//!
//! All values are plain data so hosts can embed this struct in their own
//! serde-loaded settings file.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Where the "generate heights" stage calls the terrain provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Call the provider synchronously inside the scheduled task.
    Inline,
    /// Hand the coordinate to the background worker and apply the result when
    /// it is drained on a later tick.
    #[default]
    Background,
}

/// Time budget for the cooperative task loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum time spent running tasks per tick, in milliseconds
    pub run_budget_ms: f64,
    /// Pause after an exhausted tick before running again, in milliseconds
    pub inter_tick_delay_ms: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            run_budget_ms: 4.0,
            inter_tick_delay_ms: 0.0,
        }
    }
}

impl SchedulerConfig {
    /// Run budget as a [`Duration`].
    #[must_use]
    pub fn run_budget(&self) -> Duration {
        Duration::from_secs_f64(self.run_budget_ms.max(0.0) / 1000.0)
    }

    /// Inter-tick delay as a [`Duration`].
    #[must_use]
    pub fn inter_tick_delay(&self) -> Duration {
        Duration::from_secs_f64(self.inter_tick_delay_ms.max(0.0) / 1000.0)
    }
}

/// Scheduler priorities of the chunk stages (lower runs earlier).
///
/// The defaults run "surrounding heights" before any pending "heights" task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagePriorities {
    /// Generate this chunk's heights
    pub heights: i32,
    /// Mark the surrounding chunks' heights as required
    pub surrounding_heights: i32,
    /// Generate normals from this chunk and its neighbors' edges
    pub normals: i32,
    /// Build (or rebuild) the chunk's visual
    pub visualize: i32,
}

impl Default for StagePriorities {
    fn default() -> Self {
        Self {
            heights: 1,
            surrounding_heights: 0,
            normals: 2,
            visualize: 3,
        }
    }
}

/// Configuration for a [`TerrainWorld`](crate::world::TerrainWorld).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Task loop budget
    pub scheduler: SchedulerConfig,
    /// Stage priorities
    pub priorities: StagePriorities,
    /// World-space width of one chunk
    pub chunk_visual_size: f32,
    /// Number of LOD rings a chunk tracks
    pub detail_levels: usize,
    /// Samples per side of a chunk's height map
    pub heightmap_resolution: usize,
    /// Where heights are generated
    pub generation_mode: GenerationMode,
    /// Attempts made after a failed heights generation
    pub max_generation_retries: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            priorities: StagePriorities::default(),
            chunk_visual_size: 64.0,
            detail_levels: 4,
            heightmap_resolution: 33,
            generation_mode: GenerationMode::default(),
            max_generation_retries: 2,
        }
    }
}

impl StreamingConfig {
    /// Clamp values to sensible ranges.
    pub fn validate(&mut self) {
        self.scheduler.run_budget_ms = self.scheduler.run_budget_ms.clamp(0.1, 1000.0);
        self.scheduler.inter_tick_delay_ms = self.scheduler.inter_tick_delay_ms.clamp(0.0, 1000.0);
        if !self.chunk_visual_size.is_finite() || self.chunk_visual_size <= 0.0 {
            self.chunk_visual_size = 64.0;
        }
        self.detail_levels = self.detail_levels.clamp(1, 16);
        self.heightmap_resolution = self.heightmap_resolution.clamp(3, 1025);
        self.max_generation_retries = self.max_generation_retries.min(16);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priorities_keep_source_order() {
        let p = StagePriorities::default();
        assert!(p.surrounding_heights < p.heights);
        assert!(p.heights < p.normals);
        assert!(p.normals < p.visualize);
    }

    #[test]
    fn test_validate_clamps() {
        let mut config = StreamingConfig {
            chunk_visual_size: -2.0,
            detail_levels: 0,
            heightmap_resolution: 1,
            ..Default::default()
        };
        config.scheduler.run_budget_ms = 0.0;
        config.validate();
        assert!((config.chunk_visual_size - 64.0).abs() < f32::EPSILON);
        assert_eq!(config.detail_levels, 1);
        assert_eq!(config.heightmap_resolution, 3);
        assert!(config.scheduler.run_budget() > Duration::ZERO);
    }
}
