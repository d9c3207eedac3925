//! Viewer-driven LOD activation.
//!
//! Each viewer covers the chunks around its anchor with concentric rings.
//! The tracker turns viewer changes into per-chunk, per-ring counter deltas;
//! it does not touch chunk records itself.

use ahash::AHashMap;
use std::fmt;
use terra_common::{ChunkCoord, WorldError};

/// Handle returned when a viewer is registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewerId(u64);

impl ViewerId {
    /// Returns the raw id value.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ViewerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer#{}", self.0)
    }
}

/// A viewer's anchor chunk and its ring thresholds.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewerFootprint {
    anchor: ChunkCoord,
    /// Squared view distances, strictly ascending; ring 0 is the nearest
    thresholds: Vec<f64>,
}

impl ViewerFootprint {
    /// Creates a footprint from squared distance thresholds.
    pub fn new(anchor: ChunkCoord, thresholds_squared: Vec<f64>) -> Result<Self, WorldError> {
        if thresholds_squared.is_empty() {
            return Err(WorldError::InvalidFootprint("no rings".into()));
        }
        if thresholds_squared.iter().any(|t| !t.is_finite() || *t <= 0.0) {
            return Err(WorldError::InvalidFootprint(
                "thresholds must be positive and finite".into(),
            ));
        }
        if thresholds_squared.windows(2).any(|w| w[0] >= w[1]) {
            return Err(WorldError::InvalidFootprint(
                "thresholds must be strictly ascending".into(),
            ));
        }
        Ok(Self {
            anchor,
            thresholds: thresholds_squared,
        })
    }

    /// Creates a footprint from plain view distances.
    pub fn from_view_distances(anchor: ChunkCoord, distances: &[f64]) -> Result<Self, WorldError> {
        Self::new(anchor, distances.iter().map(|d| d * d).collect())
    }

    /// Anchor chunk.
    #[must_use]
    pub const fn anchor(&self) -> ChunkCoord {
        self.anchor
    }

    /// Squared ring thresholds.
    #[must_use]
    pub fn thresholds(&self) -> &[f64] {
        &self.thresholds
    }

    /// Number of rings.
    #[must_use]
    pub fn ring_count(&self) -> usize {
        self.thresholds.len()
    }

    /// Outermost squared threshold.
    #[must_use]
    pub fn outer_threshold(&self) -> f64 {
        self.thresholds.last().copied().unwrap_or(0.0)
    }

    /// Ring for a squared distance: the first threshold strictly greater.
    #[must_use]
    pub fn ring_for(&self, distance_squared: f64) -> Option<usize> {
        self.thresholds.iter().position(|t| distance_squared < *t)
    }
}

/// Change to one chunk's counter for one ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivationDelta {
    /// Affected chunk
    pub coord: ChunkCoord,
    /// Ring index
    pub ring: usize,
    /// Signed change
    pub delta: i32,
}

/// Widest footprint, in chunks from the anchor, the tracker will scan.
pub const MAX_SCAN_RADIUS: i32 = 1024;

/// Offset from the anchor and the ring it falls into.
type RingOffset = (i32, i32, usize);

/// Registered viewers and the geometry to turn them into counter deltas.
#[derive(Debug)]
pub struct ActivationTracker {
    chunk_visual_size: f64,
    viewers: AHashMap<ViewerId, ViewerFootprint>,
    next_id: u64,
}

impl ActivationTracker {
    /// Creates a tracker for chunks `chunk_visual_size` world units wide.
    #[must_use]
    pub fn new(chunk_visual_size: f32) -> Self {
        Self {
            chunk_visual_size: f64::from(chunk_visual_size),
            viewers: AHashMap::new(),
            next_id: 0,
        }
    }

    /// Number of registered viewers.
    #[must_use]
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Footprint of a registered viewer.
    #[must_use]
    pub fn footprint(&self, id: ViewerId) -> Option<&ViewerFootprint> {
        self.viewers.get(&id)
    }

    /// Every offset inside the outermost ring, with its ring index.
    ///
    /// Offsets exactly on the outermost threshold have no ring and are
    /// excluded. Footprints wider than [`MAX_SCAN_RADIUS`] chunks are
    /// rejected.
    fn ring_offsets(&self, footprint: &ViewerFootprint) -> Result<Vec<RingOffset>, WorldError> {
        let size_sq = self.chunk_visual_size * self.chunk_visual_size;
        let outer = footprint.outer_threshold();
        let radius = (outer.sqrt() / self.chunk_visual_size).ceil();
        if radius > f64::from(MAX_SCAN_RADIUS) {
            return Err(WorldError::InvalidFootprint(format!(
                "outer ring spans {radius} chunks, limit is {MAX_SCAN_RADIUS}"
            )));
        }
        let radius = radius as i32;

        let mut offsets = Vec::new();
        for i in -radius..=radius {
            for j in -radius..=radius {
                let distance_sq = (f64::from(i).powi(2) + f64::from(j).powi(2)) * size_sq;
                if distance_sq > outer {
                    continue;
                }
                if let Some(ring) = footprint.ring_for(distance_sq) {
                    offsets.push((i, j, ring));
                }
            }
        }
        Ok(offsets)
    }

    fn deltas_at(
        offsets: &[RingOffset],
        anchor: ChunkCoord,
        delta: i32,
    ) -> impl Iterator<Item = ActivationDelta> + '_ {
        offsets.iter().map(move |&(i, j, ring)| ActivationDelta {
            coord: anchor.offset(i, j),
            ring,
            delta,
        })
    }

    /// Registers a viewer and returns the increments its footprint causes.
    pub fn add_viewer(
        &mut self,
        footprint: ViewerFootprint,
    ) -> Result<(ViewerId, Vec<ActivationDelta>), WorldError> {
        let offsets = self.ring_offsets(&footprint)?;
        let id = ViewerId(self.next_id);
        self.next_id += 1;
        let deltas = Self::deltas_at(&offsets, footprint.anchor, 1).collect();
        self.viewers.insert(id, footprint);
        Ok((id, deltas))
    }

    /// Unregisters a viewer and returns the matching decrements.
    pub fn remove_viewer(&mut self, id: ViewerId) -> Result<Vec<ActivationDelta>, WorldError> {
        let footprint = self
            .viewers
            .remove(&id)
            .ok_or(WorldError::UnknownViewer(id.0))?;
        let offsets = self.ring_offsets(&footprint)?;
        Ok(Self::deltas_at(&offsets, footprint.anchor, -1).collect())
    }

    /// Moves a viewer's anchor and returns the net counter changes.
    ///
    /// Both footprints come from the same offset table; chunks whose ring is
    /// unchanged net to zero and are omitted.
    pub fn update_viewer_position(
        &mut self,
        id: ViewerId,
        anchor: ChunkCoord,
    ) -> Result<Vec<ActivationDelta>, WorldError> {
        let footprint = self.viewers.get(&id).ok_or(WorldError::UnknownViewer(id.0))?;
        let old_anchor = footprint.anchor;
        if old_anchor == anchor {
            return Ok(Vec::new());
        }
        let offsets = self.ring_offsets(footprint)?;

        let mut order = Vec::new();
        let mut net: AHashMap<(ChunkCoord, usize), i32> = AHashMap::new();
        let changes =
            Self::deltas_at(&offsets, old_anchor, -1).chain(Self::deltas_at(&offsets, anchor, 1));
        for change in changes {
            let key = (change.coord, change.ring);
            let entry = net.entry(key).or_insert_with(|| {
                order.push(key);
                0
            });
            *entry += change.delta;
        }

        if let Some(footprint) = self.viewers.get_mut(&id) {
            footprint.anchor = anchor;
        }

        Ok(order
            .into_iter()
            .filter_map(|key| {
                let delta = net.get(&key).copied().unwrap_or(0);
                (delta != 0).then_some(ActivationDelta {
                    coord: key.0,
                    ring: key.1,
                    delta,
                })
            })
            .collect())
    }
}
