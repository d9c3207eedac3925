//! Chunk records addressed through the sparse grid.
//!
//! Records live in a flat arena; the grid maps coordinates to arena slots.
//! Records are created on first reference and never removed.

use terra_common::ChunkCoord;
use tracing::trace;

use crate::chunk::ChunkRecord;
use crate::grid::SparseChunkGrid;

/// Arena index stored in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot(u32);

impl Slot {
    /// Grid sentinel; never a valid arena index.
    const EMPTY: Self = Self(u32::MAX);
}

/// Owns every [`ChunkRecord`] of a world.
#[derive(Debug)]
pub struct ChunkStore {
    grid: SparseChunkGrid<Slot>,
    records: Vec<ChunkRecord>,
    detail_levels: usize,
}

impl ChunkStore {
    /// Creates an empty store whose records track `detail_levels` rings.
    #[must_use]
    pub fn new(detail_levels: usize) -> Self {
        Self {
            grid: SparseChunkGrid::new(Slot::EMPTY),
            records: Vec::new(),
            detail_levels,
        }
    }

    /// Looks up a record.
    #[must_use]
    pub fn get(&self, coord: ChunkCoord) -> Option<&ChunkRecord> {
        self.grid
            .try_get(coord)
            .and_then(|slot| self.records.get(slot.0 as usize))
    }

    /// Looks up a record mutably.
    pub fn get_mut(&mut self, coord: ChunkCoord) -> Option<&mut ChunkRecord> {
        let slot = *self.grid.try_get(coord)?;
        self.records.get_mut(slot.0 as usize)
    }

    /// Returns the record at `coord`, creating an idle one if absent.
    pub fn get_or_create(&mut self, coord: ChunkCoord) -> &mut ChunkRecord {
        let index = match self.grid.try_get(coord).copied() {
            Some(slot) => slot.0 as usize,
            None => {
                let index = self.records.len();
                self.records.push(ChunkRecord::new(coord, self.detail_levels));
                self.grid.insert(coord, Slot(index as u32));
                trace!(x = coord.x, y = coord.y, "Chunk record created");
                index
            },
        };
        &mut self.records[index]
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no chunk was ever referenced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Grid slots allocated so far, occupied or not.
    #[must_use]
    pub fn grid_slots(&self) -> usize {
        self.grid.allocated_slots().iter().sum()
    }

    /// Iterates over all records in grid order.
    pub fn iter(&self) -> impl Iterator<Item = &ChunkRecord> + '_ {
        self.grid
            .iter()
            .filter_map(|slot| self.records.get(slot.0 as usize))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::ChunkState;

    #[test]
    fn test_get_or_create_is_stable() {
        let mut store = ChunkStore::new(2);
        let coord = ChunkCoord::new(-4, 9);
        assert!(store.get(coord).is_none());

        store.get_or_create(coord).set_target(ChunkState::HeightsGenerated);
        store.get_or_create(coord);
        assert_eq!(store.len(), 1);
        assert_eq!(
            store.get(coord).map(ChunkRecord::target),
            Some(ChunkState::HeightsGenerated)
        );
        assert_eq!(store.get(coord).map(|r| r.activation().len()), Some(2));
    }

    #[test]
    fn test_iter_visits_every_record() {
        let mut store = ChunkStore::new(1);
        for coord in ChunkCoord::ORIGIN.neighbors() {
            store.get_or_create(coord);
        }
        let mut seen: Vec<_> = store.iter().map(|r| (r.coord().x, r.coord().y)).collect();
        seen.sort_unstable();
        assert_eq!(seen.len(), 8);
        assert!(!seen.contains(&(0, 0)));
    }

    #[test]
    fn test_grid_slots_cover_records() {
        let mut store = ChunkStore::new(1);
        assert_eq!(store.grid_slots(), 0);
        store.get_or_create(ChunkCoord::new(0, 2));
        store.get_or_create(ChunkCoord::new(-1, -1));
        // Column 0 of the top-right quadrant grows to three slots.
        assert_eq!(store.grid_slots(), 4);
        assert_eq!(store.len(), 2);
    }
}
