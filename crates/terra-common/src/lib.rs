//! # Terra Common
//!
//! Common types shared by the Terra terrain streaming crates:
//! - Chunk coordinates and the eight-neighbor direction table
//! - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(clippy::unwrap_used)]

pub mod coords;
pub mod error;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::coords::*;
    pub use crate::error::*;
}

pub use prelude::*;
