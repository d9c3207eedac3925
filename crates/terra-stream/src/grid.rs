//! Sparse grid keyed by signed chunk coordinates.
//!
//! The plane is split into four quadrants by the sign of each axis. Each
//! quadrant is a ragged `Vec<Vec<T>>` indexed by the absolute position, with
//! negative indices mirrored to `-i - 1` so no slot is wasted. Quadrants grow
//! independently: inserting far out in one never allocates in the others.
//!
//! Absence is encoded by a sentinel value given at construction. A stored
//! value equal to the sentinel is indistinguishable from an empty slot.

use terra_common::ChunkCoord;

/// Sparse map from [`ChunkCoord`] to `T`.
#[derive(Debug, Clone)]
pub struct SparseChunkGrid<T> {
    /// x >= 0, y >= 0
    top_right: Vec<Vec<T>>,
    /// x < 0, y >= 0
    top_left: Vec<Vec<T>>,
    /// x >= 0, y < 0
    bottom_right: Vec<Vec<T>>,
    /// x < 0, y < 0
    bottom_left: Vec<Vec<T>>,
    /// Value of an unoccupied slot
    empty: T,
}

#[derive(Clone, Copy)]
enum Quadrant {
    TopRight,
    TopLeft,
    BottomRight,
    BottomLeft,
}

/// Maps a signed axis value to its quadrant-local index.
const fn mirror(v: i32) -> (bool, usize) {
    if v < 0 {
        (true, (-(v as i64) - 1) as usize)
    } else {
        (false, v as usize)
    }
}

fn locate(coord: ChunkCoord) -> (Quadrant, usize, usize) {
    let (neg_x, xi) = mirror(coord.x);
    let (neg_y, yi) = mirror(coord.y);
    let quadrant = match (neg_x, neg_y) {
        (false, false) => Quadrant::TopRight,
        (true, false) => Quadrant::TopLeft,
        (false, true) => Quadrant::BottomRight,
        (true, true) => Quadrant::BottomLeft,
    };
    (quadrant, xi, yi)
}

const fn unmirror(negative: bool, index: usize) -> i32 {
    if negative {
        -(index as i32) - 1
    } else {
        index as i32
    }
}

impl<T: Clone + PartialEq> SparseChunkGrid<T> {
    /// Creates an empty grid using `empty` as the absence sentinel.
    #[must_use]
    pub fn new(empty: T) -> Self {
        Self {
            top_right: Vec::new(),
            top_left: Vec::new(),
            bottom_right: Vec::new(),
            bottom_left: Vec::new(),
            empty,
        }
    }

    fn quadrant(&self, q: Quadrant) -> &Vec<Vec<T>> {
        match q {
            Quadrant::TopRight => &self.top_right,
            Quadrant::TopLeft => &self.top_left,
            Quadrant::BottomRight => &self.bottom_right,
            Quadrant::BottomLeft => &self.bottom_left,
        }
    }

    fn quadrant_mut(&mut self, q: Quadrant) -> &mut Vec<Vec<T>> {
        match q {
            Quadrant::TopRight => &mut self.top_right,
            Quadrant::TopLeft => &mut self.top_left,
            Quadrant::BottomRight => &mut self.bottom_right,
            Quadrant::BottomLeft => &mut self.bottom_left,
        }
    }

    /// Stores `value` at `coord`, growing only the affected quadrant.
    pub fn insert(&mut self, coord: ChunkCoord, value: T) {
        let (q, xi, yi) = locate(coord);
        let empty = self.empty.clone();
        let columns = self.quadrant_mut(q);
        if columns.len() <= xi {
            columns.resize_with(xi + 1, Vec::new);
        }
        let column = &mut columns[xi];
        if column.len() <= yi {
            column.resize(yi + 1, empty);
        }
        column[yi] = value;
    }

    /// Returns the value at `coord`, or `None` if the slot holds the sentinel.
    #[must_use]
    pub fn try_get(&self, coord: ChunkCoord) -> Option<&T> {
        let (q, xi, yi) = locate(coord);
        self.quadrant(q)
            .get(xi)
            .and_then(|column| column.get(yi))
            .filter(|value| **value != self.empty)
    }

    /// Iterates over every stored value. Order follows the quadrant layout.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter_coords().map(|(_, value)| value)
    }

    /// Iterates over every stored value with its coordinate.
    pub fn iter_coords(&self) -> impl Iterator<Item = (ChunkCoord, &T)> + '_ {
        let quadrants = [
            (&self.bottom_left, true, true),
            (&self.bottom_right, false, true),
            (&self.top_left, true, false),
            (&self.top_right, false, false),
        ];
        quadrants
            .into_iter()
            .flat_map(move |(columns, neg_x, neg_y)| {
                columns.iter().enumerate().flat_map(move |(xi, column)| {
                    column.iter().enumerate().map(move |(yi, value)| {
                        (
                            ChunkCoord::new(unmirror(neg_x, xi), unmirror(neg_y, yi)),
                            value,
                        )
                    })
                })
            })
            .filter(move |(_, value)| **value != self.empty)
    }

    /// Number of allocated slots per quadrant (top-right, top-left,
    /// bottom-right, bottom-left).
    #[must_use]
    pub fn allocated_slots(&self) -> [usize; 4] {
        let slots = |q: &Vec<Vec<T>>| q.iter().map(Vec::len).sum::<usize>();
        [
            slots(&self.top_right),
            slots(&self.top_left),
            slots(&self.bottom_right),
            slots(&self.bottom_left),
        ]
    }
}
