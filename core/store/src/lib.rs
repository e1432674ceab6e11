//! Local tile store abstraction.
//!
//! This module provides the trait the sync engine uses to read and advance
//! per-tile cursors, apply incremental pages and install bulk snapshots,
//! together with two implementations:
//! - `MemoryTileStore`: in-process, used by tests and short-lived tools
//! - `LocalTileStore`: one JSON document per tile in a directory
//!
//! # Design Principles
//! - Writes to one tile are serialized; reads never block on other tiles
//! - Snapshot installs replace a tile wholesale, never partially
//! - Cursors only move forward through `apply_page`

pub mod local;
pub mod memory;
pub mod store;
pub mod tile;

pub use local::LocalTileStore;
pub use memory::MemoryTileStore;
pub use store::{TileStore, EMPTY_STORE_VERSION, STORE_FORMAT_VERSION};
pub use tile::TileData;
