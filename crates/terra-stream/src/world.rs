//! The owning orchestrator.
//!
//! [`TerrainWorld`] holds every chunk record, the task scheduler, the viewer
//! tracker, the optional background pipeline and the collaborators. It turns
//! the [`Effect`]s produced by chunk transitions into scheduler calls and
//! executes chunk tasks when ticked. All mutation happens on the thread that
//! owns the world.

use ahash::AHashSet;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use terra_common::{ChunkCoord, Direction, TerraError, TerraResult, WorldError};
use tracing::{debug, info, trace, warn};

use crate::activation::{ActivationDelta, ActivationTracker, ViewerFootprint, ViewerId};
use crate::chunk::{ChunkRecord, ChunkState, Effect, Effects, Outstanding, Stage};
use crate::clock::Clock;
use crate::collaborators::{MeshBuilder, NeighborEdges, NormalGenerator, TerrainProvider};
use crate::config::{GenerationMode, StagePriorities, StreamingConfig};
use crate::pipeline::BackgroundPipeline;
use crate::scheduler::{TaskId, TaskScheduler, TickReport};
use crate::store::ChunkStore;

/// Payload of a scheduled chunk task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkTask {
    /// Chunk the task works on
    pub coord: ChunkCoord,
    /// What it does
    pub stage: Stage,
}

/// Snapshot of world counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorldStats {
    /// Chunk records ever created
    pub chunks: usize,
    /// Chunks with a live visual
    pub visualized: usize,
    /// Tasks waiting in the scheduler
    pub pending_tasks: usize,
    /// Background requests not yet drained
    pub in_flight: usize,
    /// Chunks whose normals wait on neighbors
    pub parked: usize,
    /// Registered viewers
    pub viewers: usize,
    /// Stages completed since creation
    pub stages_completed: u64,
    /// Failed heights generations since creation
    pub generation_failures: u64,
    /// Calls to [`TerrainWorld::tick`]
    pub ticks: u64,
    /// Slots the sparse grid has allocated
    pub grid_slots: usize,
}

impl fmt::Display for WorldStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} chunks, {} visualized, {} pending, {} in flight, {} parked",
            self.chunks, self.visualized, self.pending_tasks, self.in_flight, self.parked
        )
    }
}

#[derive(Debug, Default)]
struct Counters {
    stages_completed: u64,
    generation_failures: u64,
    ticks: u64,
}

/// Streams terrain chunks around a set of viewers.
pub struct TerrainWorld<M> {
    config: StreamingConfig,
    store: ChunkStore,
    scheduler: TaskScheduler<ChunkTask>,
    tracker: ActivationTracker,
    pipeline: Option<BackgroundPipeline>,
    provider: Arc<dyn TerrainProvider>,
    normals: Box<dyn NormalGenerator>,
    meshes: M,
    /// Chunks whose normals wait on neighbor heights, with the heights
    /// epoch at parking time
    parked: Vec<(ChunkCoord, u64)>,
    /// Bumped whenever a chunk gains heights
    heights_epoch: u64,
    counters: Counters,
}

impl<M> fmt::Debug for TerrainWorld<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerrainWorld")
            .field("config", &self.config)
            .field("chunks", &self.store.len())
            .field("scheduler", &self.scheduler)
            .field("pipeline", &self.pipeline)
            .field("parked", &self.parked.len())
            .finish_non_exhaustive()
    }
}

impl<M: MeshBuilder> TerrainWorld<M> {
    /// Creates a world. Spawns the background worker in
    /// [`GenerationMode::Background`].
    pub fn new(
        mut config: StreamingConfig,
        provider: Arc<dyn TerrainProvider>,
        normals: Box<dyn NormalGenerator>,
        meshes: M,
    ) -> TerraResult<Self> {
        config.validate();
        let pipeline = match config.generation_mode {
            GenerationMode::Background => Some(BackgroundPipeline::spawn(Arc::clone(&provider))?),
            GenerationMode::Inline => None,
        };
        info!(
            mode = ?config.generation_mode,
            detail_levels = config.detail_levels,
            chunk_size = config.chunk_visual_size,
            "Terrain world created"
        );

        Ok(Self {
            store: ChunkStore::new(config.detail_levels),
            scheduler: TaskScheduler::new(&config.scheduler),
            tracker: ActivationTracker::new(config.chunk_visual_size),
            pipeline,
            provider,
            normals,
            meshes,
            parked: Vec::new(),
            heights_epoch: 0,
            counters: Counters::default(),
            config,
        })
    }

    /// Effective configuration after validation.
    #[must_use]
    pub const fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Looks up a chunk record.
    #[must_use]
    pub fn chunk(&self, coord: ChunkCoord) -> Option<&ChunkRecord> {
        self.store.get(coord)
    }

    /// Iterates over every chunk record.
    pub fn chunks(&self) -> impl Iterator<Item = &ChunkRecord> + '_ {
        self.store.iter()
    }

    /// The task scheduler.
    #[must_use]
    pub const fn scheduler(&self) -> &TaskScheduler<ChunkTask> {
        &self.scheduler
    }

    /// The viewer tracker.
    #[must_use]
    pub const fn tracker(&self) -> &ActivationTracker {
        &self.tracker
    }

    /// The mesh builder.
    #[must_use]
    pub const fn meshes(&self) -> &M {
        &self.meshes
    }

    /// Registers a viewer and activates the chunks around it.
    pub fn add_viewer(&mut self, footprint: ViewerFootprint) -> TerraResult<ViewerId> {
        if footprint.ring_count() > self.config.detail_levels {
            return Err(WorldError::TooManyRings {
                rings: footprint.ring_count(),
                detail_levels: self.config.detail_levels,
            }
            .into());
        }
        let (id, deltas) = self.tracker.add_viewer(footprint)?;
        debug!(viewer = id.raw(), chunks = deltas.len(), "Viewer added");
        self.apply_activation(&deltas);
        Ok(id)
    }

    /// Unregisters a viewer and releases its chunks.
    pub fn remove_viewer(&mut self, id: ViewerId) -> TerraResult<()> {
        let deltas = self.tracker.remove_viewer(id)?;
        debug!(viewer = id.raw(), chunks = deltas.len(), "Viewer removed");
        self.apply_activation(&deltas);
        Ok(())
    }

    /// Moves a viewer to a new anchor chunk.
    pub fn update_viewer_position(&mut self, id: ViewerId, anchor: ChunkCoord) -> TerraResult<()> {
        let deltas = self.tracker.update_viewer_position(id, anchor)?;
        if !deltas.is_empty() {
            trace!(viewer = id.raw(), x = anchor.x, y = anchor.y, changes = deltas.len(), "Viewer moved");
        }
        self.apply_activation(&deltas);
        Ok(())
    }

    /// Sets the target state of a chunk directly, bypassing viewers.
    pub fn set_chunk_target(&mut self, coord: ChunkCoord, target: ChunkState) {
        let effects = self.store.get_or_create(coord).set_target(target);
        self.apply(coord, effects);
    }

    /// Applies counter changes first, then re-evaluates each touched chunk
    /// once.
    fn apply_activation(&mut self, deltas: &[ActivationDelta]) {
        let mut seen = AHashSet::new();
        let mut touched = Vec::new();
        for delta in deltas {
            self.store
                .get_or_create(delta.coord)
                .adjust_activation(delta.ring, delta.delta);
            if seen.insert(delta.coord) {
                touched.push(delta.coord);
            }
        }
        for coord in touched {
            let effects = self.store.get_or_create(coord).refresh_demand();
            self.apply(coord, effects);
        }
    }

    fn apply(&mut self, coord: ChunkCoord, effects: Effects) {
        apply_effects(
            &mut self.store,
            &mut self.scheduler,
            &mut self.meshes,
            &self.config.priorities,
            coord,
            effects,
        );
    }

    /// Runs one frame of work.
    ///
    /// Applies finished background results, resumes parked chunks, then runs
    /// queued tasks until the run budget is spent.
    pub fn tick<C: Clock + ?Sized>(&mut self, clock: &C) -> TickReport {
        self.collect_background();
        self.resume_parked();

        let Self {
            config,
            store,
            scheduler,
            pipeline,
            provider,
            normals,
            meshes,
            parked,
            heights_epoch,
            counters,
            ..
        } = self;
        let mut stages = StageRunner {
            config,
            store,
            pipeline: pipeline.as_ref(),
            provider: &**provider,
            normals: &**normals,
            meshes,
            parked,
            heights_epoch,
            counters,
        };
        let report = scheduler.run_tick(clock, |scheduler, id, task| stages.run(scheduler, id, task));

        self.counters.ticks += 1;
        report
    }

    /// Applies every finished background generation.
    fn collect_background(&mut self) {
        let Some(pipeline) = &self.pipeline else {
            return;
        };
        for done in pipeline.drain() {
            let Some(record) = self.store.get_mut(done.coord) else {
                warn!(x = done.coord.x, y = done.coord.y, "Background result for unknown chunk");
                continue;
            };
            if record.outstanding() != Some(Outstanding::Background) {
                trace!(x = done.coord.x, y = done.coord.y, "Stale background result");
            }
            let effects = match done.result {
                Ok(data) => {
                    self.counters.stages_completed += 1;
                    self.heights_epoch += 1;
                    record.complete_heights(data)
                },
                Err(e) => {
                    warn!(x = done.coord.x, y = done.coord.y, "Heights generation failed: {e}");
                    self.counters.generation_failures += 1;
                    record.generation_failed(self.config.max_generation_retries)
                },
            };
            self.apply(done.coord, effects);
        }
    }

    /// Lets parked chunks reschedule their normals once heights arrived
    /// after they were parked.
    fn resume_parked(&mut self) {
        let epoch = self.heights_epoch;
        let (ready, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.parked)
            .into_iter()
            .partition(|(_, parked_at)| *parked_at < epoch);
        self.parked = waiting;
        for (coord, _) in ready {
            if let Some(record) = self.store.get_mut(coord) {
                let effects = record.unpark();
                self.apply(coord, effects);
            }
        }
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> WorldStats {
        let mut parked = 0;
        let mut visualized = 0;
        for record in self.store.iter() {
            if record.outstanding() == Some(Outstanding::Parked) {
                parked += 1;
            }
            if record.visual().is_some() {
                visualized += 1;
            }
        }
        WorldStats {
            chunks: self.store.len(),
            visualized,
            pending_tasks: self.scheduler.pending_len(),
            in_flight: self.pipeline.as_ref().map_or(0, BackgroundPipeline::in_flight),
            parked,
            viewers: self.tracker.viewer_count(),
            stages_completed: self.counters.stages_completed,
            generation_failures: self.counters.generation_failures,
            ticks: self.counters.ticks,
            grid_slots: self.store.grid_slots(),
        }
    }

    /// Stops the background worker, if any.
    ///
    /// Results the worker already produced are applied. Chunks whose requests
    /// were still queued fall back to inline generation on later ticks.
    pub fn shutdown(&mut self) {
        let Some(pipeline) = &self.pipeline else {
            return;
        };
        pipeline.shutdown();
        self.collect_background();
        self.pipeline = None;

        let stranded: Vec<ChunkCoord> = self
            .store
            .iter()
            .filter(|record| record.outstanding() == Some(Outstanding::Background))
            .map(ChunkRecord::coord)
            .collect();
        if !stranded.is_empty() {
            info!(chunks = stranded.len(), "Rescheduling queued heights inline");
        }
        for coord in stranded {
            if let Some(record) = self.store.get_mut(coord) {
                let effects = record.abandon_background();
                self.apply(coord, effects);
            }
        }
    }
}

/// Applies `effects` of the chunk at `coord`, including the effects of
/// neighbors raised along the way.
fn apply_effects(
    store: &mut ChunkStore,
    scheduler: &mut TaskScheduler<ChunkTask>,
    meshes: &mut dyn MeshBuilder,
    priorities: &StagePriorities,
    coord: ChunkCoord,
    effects: Effects,
) {
    let mut work = VecDeque::from([(coord, effects)]);
    while let Some((coord, effects)) = work.pop_front() {
        for effect in effects {
            match effect {
                Effect::Schedule(stage) => {
                    let id = scheduler.submit(ChunkTask { coord, stage }, stage.priority(priorities));
                    store.get_or_create(coord).mark_scheduled(stage, id);
                },
                Effect::Cancel(id) => {
                    scheduler.cancel(id);
                },
                Effect::RaiseNeighbors => {
                    for neighbor in coord.neighbors() {
                        let raised = store
                            .get_or_create(neighbor)
                            .raise_target(ChunkState::HeightsGenerated);
                        if !raised.is_empty() {
                            work.push_back((neighbor, raised));
                        }
                    }
                },
                Effect::Release(handle) => meshes.release(handle),
            }
        }
    }
}

/// Result of running one stage.
enum Step {
    /// The stage completed; apply these effects
    Done(Effects),
    /// The work was handed off (background request or parked)
    Deferred,
    /// The stage failed; the effects are still applied
    Failed(Effects, TerraError),
}

impl Step {
    fn fail(error: impl Into<TerraError>) -> Self {
        Self::Failed(Effects::new(), error.into())
    }
}

/// Disjoint borrows of the world used while the scheduler runs tasks.
struct StageRunner<'a, M> {
    config: &'a StreamingConfig,
    store: &'a mut ChunkStore,
    pipeline: Option<&'a BackgroundPipeline>,
    provider: &'a dyn TerrainProvider,
    normals: &'a dyn NormalGenerator,
    meshes: &'a mut M,
    parked: &'a mut Vec<(ChunkCoord, u64)>,
    heights_epoch: &'a mut u64,
    counters: &'a mut Counters,
}

impl<M: MeshBuilder> StageRunner<'_, M> {
    fn run(
        &mut self,
        scheduler: &mut TaskScheduler<ChunkTask>,
        id: TaskId,
        task: ChunkTask,
    ) -> TerraResult<()> {
        let ChunkTask { coord, stage } = task;
        let Some(record) = self.store.get(coord) else {
            return Err(WorldError::MissingData(coord).into());
        };
        if !record.owns_task(id) {
            trace!(task = id.raw(), x = coord.x, y = coord.y, "Skipping superseded task");
            return Ok(());
        }
        trace!(task = id.raw(), x = coord.x, y = coord.y, ?stage, "Running chunk task");

        let step = match stage {
            Stage::Heights => self.run_heights(coord),
            Stage::SurroundingHeights => match self.store.get_mut(coord) {
                Some(record) => Step::Done(record.complete(stage)),
                None => Step::fail(WorldError::MissingData(coord)),
            },
            Stage::Normals => self.run_normals(coord),
            Stage::Visualize | Stage::Rebuild => self.run_visualize(coord, stage),
        };
        let (effects, outcome) = match step {
            Step::Done(effects) => {
                self.counters.stages_completed += 1;
                (effects, Ok(()))
            },
            Step::Deferred => (Effects::new(), Ok(())),
            Step::Failed(effects, e) => (effects, Err(e)),
        };
        apply_effects(
            self.store,
            scheduler,
            &mut *self.meshes,
            &self.config.priorities,
            coord,
            effects,
        );
        outcome
    }

    fn run_heights(&mut self, coord: ChunkCoord) -> Step {
        let Some(record) = self.store.get_mut(coord) else {
            return Step::fail(WorldError::MissingData(coord));
        };

        if let Some(pipeline) = self.pipeline {
            match pipeline.request(coord) {
                Ok(()) => {
                    record.mark_background();
                    return Step::Deferred;
                },
                Err(e) => warn!(x = coord.x, y = coord.y, "Background pipeline unavailable: {e}"),
            }
        }

        match self.provider.generate(coord) {
            Ok(data) => {
                *self.heights_epoch += 1;
                Step::Done(record.complete_heights(data))
            },
            Err(e) => {
                self.counters.generation_failures += 1;
                let effects = record.generation_failed(self.config.max_generation_retries);
                Step::Failed(effects, e.into())
            },
        }
    }

    fn run_normals(&mut self, coord: ChunkCoord) -> Step {
        let mut edges = NeighborEdges::default();
        let mut generating = false;
        let mut missing = None;
        for side in Direction::ALL {
            let neighbor = coord.neighbor(side);
            match self.store.get(neighbor) {
                Some(record) if record.has_heights() => {
                    if let Some(data) = record.data() {
                        edges.set(side, data.heights.edge_towards(side));
                    }
                },
                Some(record) if is_generating_heights(record) => generating = true,
                _ => missing = missing.or(Some(neighbor)),
            }
        }

        if missing.is_some() || generating {
            let Some(record) = self.store.get_mut(coord) else {
                return Step::fail(WorldError::MissingData(coord));
            };
            // Parked work waits for heights that complete after this point.
            record.mark_parked();
            self.parked.push((coord, *self.heights_epoch));
            if let Some(neighbor) = missing {
                return Step::fail(WorldError::NeighborNotReady { coord, neighbor });
            }
            debug!(x = coord.x, y = coord.y, "Normals parked until neighbors finish");
            return Step::Deferred;
        }

        let Some(data) = self.store.get(coord).and_then(ChunkRecord::data) else {
            return Step::fail(WorldError::MissingData(coord));
        };
        let computed = self.normals.compute_normals(&data.heights, &edges);
        match self.store.get_mut(coord) {
            Some(record) => Step::Done(record.complete_normals(computed)),
            None => Step::fail(WorldError::MissingData(coord)),
        }
    }

    fn run_visualize(&mut self, coord: ChunkCoord, stage: Stage) -> Step {
        let Some(record) = self.store.get(coord) else {
            return Step::fail(WorldError::MissingData(coord));
        };
        let lod = record.demanded_lod().unwrap_or(0);
        let built = match (record.data(), record.normals()) {
            (Some(data), Some(normals)) => self.meshes.build(coord, data, normals, lod),
            _ => Err(WorldError::MissingData(coord)),
        };

        let Some(record) = self.store.get_mut(coord) else {
            return Step::fail(WorldError::MissingData(coord));
        };
        match built {
            Ok(handle) => Step::Done(record.complete_visual(stage, handle, lod)),
            Err(e) => {
                record.stage_failed();
                Step::fail(e)
            },
        }
    }
}

/// Returns true if the chunk will gain heights without further demand.
fn is_generating_heights(record: &ChunkRecord) -> bool {
    matches!(
        record.outstanding(),
        Some(Outstanding::Background | Outstanding::Task { stage: Stage::Heights, .. })
    )
}
