//! Per-chunk generation state machine.
//!
//! A [`ChunkRecord`] never talks to the scheduler, the grid or the mesh
//! builder. Every transition returns the [`Effect`]s it needs applied and the
//! owning world performs them, so transitions can be tested in isolation.

use glam::Vec3;
use std::fmt;
use terra_common::ChunkCoord;
use tracing::{debug, error, warn};

use crate::collaborators::{ChunkData, VisualHandle};
use crate::config::StagePriorities;
use crate::scheduler::TaskId;

/// Generation stages a chunk moves through, strictly ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChunkState {
    /// Nothing computed
    NotGenerated,
    /// Own height and biome samples exist
    HeightsGenerated,
    /// All eight neighbors have been asked for their heights
    SurroundingChunksGenerated,
    /// Normals computed from own heights and neighbor edges
    NormalsGenerated,
    /// A visual exists
    Visualized,
}

impl ChunkState {
    /// The stage that advances a chunk out of this state.
    #[must_use]
    pub const fn next_stage(self) -> Option<Stage> {
        match self {
            Self::NotGenerated => Some(Stage::Heights),
            Self::HeightsGenerated => Some(Stage::SurroundingHeights),
            Self::SurroundingChunksGenerated => Some(Stage::Normals),
            Self::NormalsGenerated => Some(Stage::Visualize),
            Self::Visualized => None,
        }
    }
}

impl fmt::Display for ChunkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A unit of chunk work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Obtain heights and biomes from the terrain provider
    Heights,
    /// Require heights from all eight neighbors
    SurroundingHeights,
    /// Compute normals
    Normals,
    /// Build the visual
    Visualize,
    /// Replace the visual with one at the currently demanded detail level
    Rebuild,
}

impl Stage {
    /// Scheduler priority of this stage.
    #[must_use]
    pub const fn priority(self, priorities: &StagePriorities) -> i32 {
        match self {
            Self::Heights => priorities.heights,
            Self::SurroundingHeights => priorities.surrounding_heights,
            Self::Normals => priorities.normals,
            Self::Visualize | Self::Rebuild => priorities.visualize,
        }
    }

    /// State reached when this stage completes.
    #[must_use]
    pub const fn completes(self) -> ChunkState {
        match self {
            Self::Heights => ChunkState::HeightsGenerated,
            Self::SurroundingHeights => ChunkState::SurroundingChunksGenerated,
            Self::Normals => ChunkState::NormalsGenerated,
            Self::Visualize | Self::Rebuild => ChunkState::Visualized,
        }
    }
}

/// Work currently owed to a chunk. At most one at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outstanding {
    /// A task sits in the scheduler
    Task {
        /// Scheduler id, for cancellation
        id: TaskId,
        /// What the task does
        stage: Stage,
    },
    /// Heights were requested from the background pipeline
    Background,
    /// Normals are waiting for neighbors to finish their heights
    Parked,
}

/// Side effect requested by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Submit a task for this stage and record it via
    /// [`ChunkRecord::mark_scheduled`]
    Schedule(Stage),
    /// Cancel a task that is no longer wanted
    Cancel(TaskId),
    /// Raise all eight neighbors' targets to at least `HeightsGenerated`
    RaiseNeighbors,
    /// Hand a visual back to the mesh builder
    Release(VisualHandle),
}

/// Effects produced by one transition, in application order.
pub type Effects = Vec<Effect>;

/// Everything known about one chunk.
#[derive(Debug)]
pub struct ChunkRecord {
    coord: ChunkCoord,
    current: ChunkState,
    target: ChunkState,
    /// Viewers requiring this chunk, per detail ring
    activation: Vec<u32>,
    /// Lowest ring with a positive count
    demanded_lod: Option<usize>,
    outstanding: Option<Outstanding>,
    data: Option<ChunkData>,
    normals: Option<Vec<Vec3>>,
    /// Built visual and the detail level it was built at
    visual: Option<(VisualHandle, usize)>,
    failed_generations: u32,
    generation_abandoned: bool,
}

impl ChunkRecord {
    /// Creates an idle record tracking `detail_levels` rings.
    #[must_use]
    pub fn new(coord: ChunkCoord, detail_levels: usize) -> Self {
        Self {
            coord,
            current: ChunkState::NotGenerated,
            target: ChunkState::NotGenerated,
            activation: vec![0; detail_levels],
            demanded_lod: None,
            outstanding: None,
            data: None,
            normals: None,
            visual: None,
            failed_generations: 0,
            generation_abandoned: false,
        }
    }

    /// Chunk coordinate.
    #[must_use]
    pub const fn coord(&self) -> ChunkCoord {
        self.coord
    }

    /// What has actually been computed.
    #[must_use]
    pub const fn current(&self) -> ChunkState {
        self.current
    }

    /// What activation demand requires.
    #[must_use]
    pub const fn target(&self) -> ChunkState {
        self.target
    }

    /// Detail level viewers currently demand, if any.
    #[must_use]
    pub const fn demanded_lod(&self) -> Option<usize> {
        self.demanded_lod
    }

    /// Per-ring activation counts.
    #[must_use]
    pub fn activation(&self) -> &[u32] {
        &self.activation
    }

    /// Outstanding work, if any.
    #[must_use]
    pub const fn outstanding(&self) -> Option<Outstanding> {
        self.outstanding
    }

    /// Generated height and biome samples.
    #[must_use]
    pub const fn data(&self) -> Option<&ChunkData> {
        self.data.as_ref()
    }

    /// Generated normals.
    #[must_use]
    pub fn normals(&self) -> Option<&[Vec3]> {
        self.normals.as_deref()
    }

    /// Current visual and its detail level.
    #[must_use]
    pub const fn visual(&self) -> Option<(VisualHandle, usize)> {
        self.visual
    }

    /// Returns true once heights may be read by neighbors.
    #[must_use]
    pub fn has_heights(&self) -> bool {
        self.current >= ChunkState::HeightsGenerated && self.data.is_some()
    }

    /// Applies the retention rule to a requested target.
    fn clamp_target(&self, requested: ChunkState) -> ChunkState {
        // Heights already used by a neighbor's normals are kept.
        if self.current >= ChunkState::SurroundingChunksGenerated {
            requested.max(ChunkState::SurroundingChunksGenerated)
        } else {
            requested
        }
    }

    /// Sets the target state and returns the resulting effects.
    ///
    /// Lowering the target cancels outstanding work and drops computed
    /// stages down to `max(SurroundingChunksGenerated, target)`.
    pub fn set_target(&mut self, requested: ChunkState) -> Effects {
        let mut effects = Effects::new();
        let new = self.clamp_target(requested);
        let old = self.target;
        self.target = new;

        if new < old {
            match self.outstanding {
                Some(Outstanding::Task { id, .. }) => {
                    effects.push(Effect::Cancel(id));
                    self.outstanding = None;
                },
                Some(Outstanding::Parked) => self.outstanding = None,
                // Already sent to the worker; the result is applied on arrival.
                Some(Outstanding::Background) | None => {},
            }

            let floor = new.max(ChunkState::SurroundingChunksGenerated);
            if self.current > floor {
                if let Some((handle, _)) = self.visual.take() {
                    effects.push(Effect::Release(handle));
                }
                if floor < ChunkState::NormalsGenerated {
                    self.normals = None;
                }
                debug!(x = self.coord.x, y = self.coord.y, from = %self.current, to = %floor, "Chunk demoted");
                self.current = floor;
            }
        }

        self.evaluate(&mut effects);
        effects
    }

    /// Raises the target to at least `minimum`; never lowers it.
    pub fn raise_target(&mut self, minimum: ChunkState) -> Effects {
        if self.target < minimum {
            self.set_target(minimum)
        } else {
            Effects::new()
        }
    }

    /// Schedules the next stage if the chunk is behind its target and idle.
    pub fn evaluate(&mut self, effects: &mut Effects) {
        if self.outstanding.is_some() {
            return;
        }

        if self.target > self.current {
            let Some(stage) = self.current.next_stage() else {
                return;
            };
            if stage == Stage::Heights && self.generation_abandoned {
                return;
            }
            if stage == Stage::SurroundingHeights {
                effects.push(Effect::RaiseNeighbors);
            }
            effects.push(Effect::Schedule(stage));
        } else if self.current == ChunkState::Visualized {
            if let (Some((_, built)), Some(wanted)) = (self.visual, self.demanded_lod) {
                if built != wanted {
                    effects.push(Effect::Schedule(Stage::Rebuild));
                }
            }
        }
    }

    /// Records the task submitted for an [`Effect::Schedule`].
    pub fn mark_scheduled(&mut self, stage: Stage, id: TaskId) {
        self.outstanding = Some(Outstanding::Task { id, stage });
    }

    /// Records that heights were handed to the background pipeline.
    pub fn mark_background(&mut self) {
        self.outstanding = Some(Outstanding::Background);
    }

    /// Forgets a background request that will never be answered and lets
    /// the chunk reschedule its heights.
    pub fn abandon_background(&mut self) -> Effects {
        let mut effects = Effects::new();
        if self.outstanding == Some(Outstanding::Background) {
            self.outstanding = None;
            self.evaluate(&mut effects);
        }
        effects
    }

    /// Records that normals wait for neighbor heights.
    pub fn mark_parked(&mut self) {
        self.outstanding = Some(Outstanding::Parked);
    }

    /// Returns true if `id` is the task this chunk is waiting on.
    #[must_use]
    pub fn owns_task(&self, id: TaskId) -> bool {
        matches!(self.outstanding, Some(Outstanding::Task { id: own, .. }) if own == id)
    }

    /// Takes a parked chunk off the bench and lets it reschedule.
    pub fn unpark(&mut self) -> Effects {
        let mut effects = Effects::new();
        if self.outstanding == Some(Outstanding::Parked) {
            self.outstanding = None;
            self.evaluate(&mut effects);
        }
        effects
    }

    /// Marks `stage` done: advances exactly one state and re-evaluates.
    pub fn complete(&mut self, stage: Stage) -> Effects {
        self.outstanding = None;
        let reached = stage.completes();
        if stage != Stage::Rebuild {
            debug_assert_eq!(self.current.next_stage(), Some(stage));
            debug!(x = self.coord.x, y = self.coord.y, state = %reached, "Chunk advanced");
        }
        self.current = reached;

        let mut effects = Effects::new();
        self.evaluate(&mut effects);
        effects
    }

    /// Stores provider output and completes the heights stage.
    pub fn complete_heights(&mut self, data: ChunkData) -> Effects {
        self.data = Some(data);
        self.failed_generations = 0;
        if self.current == ChunkState::NotGenerated {
            self.complete(Stage::Heights)
        } else {
            self.outstanding = None;
            Effects::new()
        }
    }

    /// Stores normals and completes the normals stage.
    pub fn complete_normals(&mut self, normals: Vec<Vec3>) -> Effects {
        self.normals = Some(normals);
        self.complete(Stage::Normals)
    }

    /// Stores a new visual and completes `stage` (visualize or rebuild).
    ///
    /// Returns the replaced visual, if any, as a release effect.
    pub fn complete_visual(&mut self, stage: Stage, handle: VisualHandle, lod: usize) -> Effects {
        let mut effects = Effects::new();
        if let Some((old, _)) = self.visual.replace((handle, lod)) {
            effects.push(Effect::Release(old));
        }
        effects.extend(self.complete(stage));
        effects
    }

    /// Handles a failed heights generation. Retries up to `max_retries` times.
    pub fn generation_failed(&mut self, max_retries: u32) -> Effects {
        self.outstanding = None;
        self.failed_generations += 1;
        if self.failed_generations > max_retries {
            self.generation_abandoned = true;
            error!(
                x = self.coord.x,
                y = self.coord.y,
                attempts = self.failed_generations,
                "Giving up on chunk generation"
            );
            return Effects::new();
        }
        warn!(
            x = self.coord.x,
            y = self.coord.y,
            attempt = self.failed_generations,
            "Retrying chunk generation"
        );
        let mut effects = Effects::new();
        self.evaluate(&mut effects);
        effects
    }

    /// Drops the outstanding marker after a failed task without rescheduling.
    pub fn stage_failed(&mut self) {
        self.outstanding = None;
    }

    /// Adds `delta` to the activation count of `ring`.
    ///
    /// Counts saturate at zero; an underflow indicates unbalanced viewer
    /// bookkeeping and is logged.
    pub fn adjust_activation(&mut self, ring: usize, delta: i32) {
        let Some(count) = self.activation.get_mut(ring) else {
            warn!(x = self.coord.x, y = self.coord.y, ring, "Activation ring out of range");
            return;
        };
        let updated = i64::from(*count) + i64::from(delta);
        if updated < 0 {
            warn!(x = self.coord.x, y = self.coord.y, ring, "Activation count underflow");
        }
        *count = updated.clamp(0, i64::from(u32::MAX)) as u32;
    }

    /// Recomputes the demanded detail level from the activation counts and
    /// updates the target accordingly.
    pub fn refresh_demand(&mut self) -> Effects {
        let lod = self.activation.iter().position(|count| *count > 0);
        if lod == self.demanded_lod {
            return Effects::new();
        }
        self.demanded_lod = lod;
        match lod {
            Some(_) => self.set_target(ChunkState::Visualized),
            None => self.set_target(ChunkState::HeightsGenerated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::HeightMap;
    use crate::config::SchedulerConfig;
    use crate::scheduler::TaskScheduler;

    fn data() -> ChunkData {
        ChunkData {
            heights: HeightMap::from_fn(3, |_, _| 0.0),
            biomes: vec![0; 9],
        }
    }

    /// Submits scheduled stages into a real scheduler to obtain ids.
    fn apply(record: &mut ChunkRecord, effects: &Effects, ids: &mut TaskScheduler<Stage>) {
        for effect in effects {
            if let Effect::Schedule(stage) = effect {
                let id = ids.submit(*stage, 0);
                record.mark_scheduled(*stage, id);
            }
        }
    }

    fn scheduled(effects: &Effects) -> Vec<Stage> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Schedule(stage) => Some(*stage),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_full_chain_is_four_single_steps() {
        let mut ids = TaskScheduler::new(&SchedulerConfig::default());
        let mut record = ChunkRecord::new(ChunkCoord::ORIGIN, 2);

        let fx = record.set_target(ChunkState::Visualized);
        assert_eq!(scheduled(&fx), vec![Stage::Heights]);
        apply(&mut record, &fx, &mut ids);

        let fx = record.complete_heights(data());
        assert_eq!(record.current(), ChunkState::HeightsGenerated);
        assert_eq!(fx, vec![Effect::RaiseNeighbors, Effect::Schedule(Stage::SurroundingHeights)]);
        apply(&mut record, &fx, &mut ids);

        let fx = record.complete(Stage::SurroundingHeights);
        assert_eq!(record.current(), ChunkState::SurroundingChunksGenerated);
        assert_eq!(scheduled(&fx), vec![Stage::Normals]);
        apply(&mut record, &fx, &mut ids);

        let fx = record.complete_normals(vec![Vec3::Y; 9]);
        assert_eq!(record.current(), ChunkState::NormalsGenerated);
        assert_eq!(scheduled(&fx), vec![Stage::Visualize]);
        apply(&mut record, &fx, &mut ids);

        let fx = record.complete_visual(Stage::Visualize, VisualHandle(1), 0);
        assert_eq!(record.current(), ChunkState::Visualized);
        assert!(fx.is_empty());
        assert!(record.outstanding().is_none());
    }

    #[test]
    fn test_raising_target_with_pending_task_is_idempotent() {
        let mut ids = TaskScheduler::new(&SchedulerConfig::default());
        let mut record = ChunkRecord::new(ChunkCoord::ORIGIN, 1);

        let fx = record.set_target(ChunkState::HeightsGenerated);
        apply(&mut record, &fx, &mut ids);
        let fx = record.set_target(ChunkState::Visualized);
        assert!(fx.is_empty());
        let fx = record.raise_target(ChunkState::HeightsGenerated);
        assert!(fx.is_empty());
    }

    #[test]
    fn test_lowering_target_cancels_pending_task() {
        let mut ids = TaskScheduler::new(&SchedulerConfig::default());
        let mut record = ChunkRecord::new(ChunkCoord::ORIGIN, 1);
        let fx = record.set_target(ChunkState::Visualized);
        apply(&mut record, &fx, &mut ids);
        let fx = record.complete_heights(data());
        apply(&mut record, &fx, &mut ids);
        let Some(Outstanding::Task { id, .. }) = record.outstanding() else {
            panic!("expected a pending surrounding task");
        };

        let fx = record.set_target(ChunkState::HeightsGenerated);
        assert_eq!(fx, vec![Effect::Cancel(id)]);
        assert_eq!(record.current(), ChunkState::HeightsGenerated);
        assert!(record.outstanding().is_none());
    }

    #[test]
    fn test_demotion_keeps_surrounding_state() {
        let mut record = ChunkRecord::new(ChunkCoord::ORIGIN, 1);
        record.set_target(ChunkState::Visualized);
        record.complete_heights(data());
        record.complete(Stage::SurroundingHeights);
        record.complete_normals(vec![Vec3::Y; 9]);
        record.complete_visual(Stage::Visualize, VisualHandle(4), 0);

        let fx = record.set_target(ChunkState::NotGenerated);
        assert_eq!(fx, vec![Effect::Release(VisualHandle(4))]);
        assert_eq!(record.target(), ChunkState::SurroundingChunksGenerated);
        assert_eq!(record.current(), ChunkState::SurroundingChunksGenerated);
        assert!(record.data().is_some());
        assert!(record.normals().is_none());
        assert!(record.visual().is_none());

        // Even an explicit heights-only target cannot drop below it now.
        record.set_target(ChunkState::HeightsGenerated);
        assert_eq!(record.current(), ChunkState::SurroundingChunksGenerated);
    }

    #[test]
    fn test_demand_drives_target() {
        let mut record = ChunkRecord::new(ChunkCoord::ORIGIN, 3);
        record.adjust_activation(2, 1);
        let fx = record.refresh_demand();
        assert_eq!(record.demanded_lod(), Some(2));
        assert_eq!(record.target(), ChunkState::Visualized);
        assert_eq!(scheduled(&fx), vec![Stage::Heights]);

        record.adjust_activation(2, -1);
        record.refresh_demand();
        assert_eq!(record.demanded_lod(), None);
        assert_eq!(record.target(), ChunkState::HeightsGenerated);
    }

    #[test]
    fn test_lod_change_while_visualized_schedules_rebuild() {
        let mut record = ChunkRecord::new(ChunkCoord::ORIGIN, 2);
        record.adjust_activation(1, 1);
        record.refresh_demand();
        record.complete_heights(data());
        record.complete(Stage::SurroundingHeights);
        record.complete_normals(vec![Vec3::Y; 9]);
        record.complete_visual(Stage::Visualize, VisualHandle(1), 1);

        record.adjust_activation(0, 1);
        let fx = record.refresh_demand();
        assert_eq!(fx, vec![Effect::Schedule(Stage::Rebuild)]);

        let fx = record.complete_visual(Stage::Rebuild, VisualHandle(2), 0);
        assert_eq!(fx, vec![Effect::Release(VisualHandle(1))]);
        assert_eq!(record.visual(), Some((VisualHandle(2), 0)));
        assert_eq!(record.current(), ChunkState::Visualized);
    }

    #[test]
    fn test_generation_retries_then_gives_up() {
        let mut record = ChunkRecord::new(ChunkCoord::ORIGIN, 1);
        record.set_target(ChunkState::HeightsGenerated);
        record.mark_background();

        let fx = record.generation_failed(1);
        assert_eq!(scheduled(&fx), vec![Stage::Heights]);
        let fx = record.generation_failed(1);
        assert!(fx.is_empty());
        assert_eq!(record.current(), ChunkState::NotGenerated);
    }

    #[test]
    fn test_abandoned_background_request_reschedules_heights() {
        let mut record = ChunkRecord::new(ChunkCoord::ORIGIN, 1);
        record.set_target(ChunkState::HeightsGenerated);
        record.mark_background();

        let fx = record.abandon_background();
        assert_eq!(scheduled(&fx), vec![Stage::Heights]);
        assert!(record.outstanding().is_none());
        // Only background requests are affected.
        record.mark_parked();
        assert!(record.abandon_background().is_empty());
        assert_eq!(record.outstanding(), Some(Outstanding::Parked));
    }

    #[test]
    fn test_activation_saturates_at_zero() {
        let mut record = ChunkRecord::new(ChunkCoord::ORIGIN, 1);
        record.adjust_activation(0, -1);
        assert_eq!(record.activation(), &[0]);
        record.adjust_activation(5, 1);
        assert_eq!(record.activation(), &[0]);
    }
}
