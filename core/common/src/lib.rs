//! Common utilities and types shared across the tile sync crates.
//!
//! This module provides the tile grid, the per-tile sync vocabulary and the
//! record/snapshot shapes exchanged between the remote service and the
//! local store.

pub mod digest;
pub mod error;
pub mod types;

pub use digest::md5_hex;
pub use error::{Error, Result};
pub use types::{
    BoundingBox, Coordinate, DataClass, SyncRecord, SyncStrategy, TileCoordinate, TileCursors,
    TileSnapshot, TileStrategies, TILE_GRID_SIZE,
};
