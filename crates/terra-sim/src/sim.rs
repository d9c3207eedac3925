//! The viewer walk.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use terra_common::{ChunkCoord, TerraError, TerraResult};
use terra_stream::{
    FiniteDifferenceNormals, HeadlessMeshBuilder, PerlinConfig, PerlinTerrainProvider, SystemClock,
    TerrainWorld, ViewerFootprint, WorldStats,
};
use tracing::{debug, info};

use crate::config::SimConfig;

/// Outcome of a simulation run.
#[derive(Debug, Clone, Copy)]
pub struct SimSummary {
    /// Ticks simulated
    pub ticks: u64,
    /// World statistics after the last tick
    pub stats: WorldStats,
    /// Vertices in the visuals alive at the end
    pub live_vertices: usize,
}

/// Runs the configured walk to completion.
pub fn run(config: &SimConfig) -> TerraResult<SimSummary> {
    if config.view_distances.len() > config.streaming.detail_levels {
        return Err(TerraError::Config(format!(
            "{} view distances but only {} detail levels",
            config.view_distances.len(),
            config.streaming.detail_levels
        )));
    }
    let streaming = config.streaming.clone();
    let resolution = streaming.heightmap_resolution;
    let chunk_size = streaming.chunk_visual_size;

    let provider = PerlinTerrainProvider::new(PerlinConfig {
        seed: config.seed,
        resolution,
        terrain_scale: config.terrain_scale,
        height_scale: config.height_scale,
        ..Default::default()
    });
    let normals = FiniteDifferenceNormals {
        spacing: chunk_size / (resolution.saturating_sub(1).max(1) as f32),
    };
    let mut world = TerrainWorld::new(
        streaming,
        Arc::new(provider),
        Box::new(normals),
        HeadlessMeshBuilder::new(),
    )?;

    let mut position = (0.0_f32, 0.0_f32);
    let anchor = ChunkCoord::from_world_position(position.0, position.1, chunk_size);
    let footprint = ViewerFootprint::from_view_distances(anchor, &config.view_distances)?;
    let viewer = world.add_viewer(footprint)?;
    info!(x = anchor.x, y = anchor.y, rings = config.view_distances.len(), "Viewer placed");

    let frame = Duration::from_secs_f64(config.frame_ms / 1000.0);
    let clock = SystemClock;
    for tick in 1..=config.ticks {
        let frame_start = Instant::now();

        position.0 += config.viewer_speed;
        let anchor = ChunkCoord::from_world_position(position.0, position.1, chunk_size);
        world.update_viewer_position(viewer, anchor)?;

        let report = world.tick(&clock);
        debug!(
            tick,
            executed = report.executed,
            failed = report.failed,
            elapsed_us = report.elapsed.as_micros(),
            "Tick"
        );
        if tick % config.report_interval == 0 {
            info!(tick, x = anchor.x, y = anchor.y, "{}", world.stats());
        }

        if let Some(rest) = frame.checked_sub(frame_start.elapsed()) {
            thread::sleep(rest);
        }
    }

    world.shutdown();
    Ok(SimSummary {
        ticks: config.ticks,
        stats: world.stats(),
        live_vertices: world.meshes().live_vertices(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use terra_stream::GenerationMode;

    fn small_config(mode: GenerationMode) -> SimConfig {
        let mut config = SimConfig {
            view_distances: vec![20.0, 40.0],
            viewer_speed: 2.0,
            ticks: 40,
            frame_ms: 0.0,
            report_interval: 10,
            ..Default::default()
        };
        config.streaming.generation_mode = mode;
        config.streaming.chunk_visual_size = 16.0;
        config.streaming.heightmap_resolution = 9;
        // Generous budget so every tick drains the queue.
        config.streaming.scheduler.run_budget_ms = 1000.0;
        config.validate();
        config
    }

    #[test]
    fn test_inline_walk_keeps_viewer_area_visualized() {
        let summary = run(&small_config(GenerationMode::Inline)).expect("run simulation");
        assert_eq!(summary.ticks, 40);
        assert_eq!(summary.stats.viewers, 1);
        assert_eq!(summary.stats.generation_failures, 0);
        assert!(summary.stats.visualized > 0);
        assert!(summary.live_vertices > 0);
    }

    #[test]
    fn test_rejects_more_rings_than_detail_levels() {
        let mut config = small_config(GenerationMode::Inline);
        config.view_distances = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        assert!(matches!(run(&config), Err(TerraError::Config(_))));
    }

    #[test]
    fn test_background_walk_completes() {
        let summary = run(&small_config(GenerationMode::Background)).expect("run simulation");
        assert_eq!(summary.stats.in_flight, 0);
        assert!(summary.stats.chunks > 0);
        assert!(summary.stats.grid_slots >= summary.stats.chunks);
    }
}
