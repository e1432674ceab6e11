//! Common types used throughout tile synchronization.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of tiles along each axis of the global grid.
pub const TILE_GRID_SIZE: i32 = 16;

const TILE_WIDTH_DEG: f64 = 360.0 / TILE_GRID_SIZE as f64;
const TILE_HEIGHT_DEG: f64 = 180.0 / TILE_GRID_SIZE as f64;

/// A cell of the global tiling scheme; the unit of synchronization.
///
/// Columns run west to east from longitude -180, rows run south to north
/// from latitude -90.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileCoordinate {
    pub tile_x: i32,
    pub tile_y: i32,
}

impl TileCoordinate {
    pub const fn new(tile_x: i32, tile_y: i32) -> Self {
        Self { tile_x, tile_y }
    }

    /// Whether both axes fall inside the grid.
    pub fn is_valid(&self) -> bool {
        (0..TILE_GRID_SIZE).contains(&self.tile_x) && (0..TILE_GRID_SIZE).contains(&self.tile_y)
    }

    /// The tile containing a geographic position.
    ///
    /// Positions on the north or east edge of the world map to the last
    /// row/column.
    pub fn containing(position: Coordinate) -> Self {
        Self {
            tile_x: column_for(position.longitude),
            tile_y: row_for(position.latitude),
        }
    }

    /// Geographic extent of this tile.
    pub fn bounds(&self) -> BoundingBox {
        let west = -180.0 + f64::from(self.tile_x) * TILE_WIDTH_DEG;
        let south = -90.0 + f64::from(self.tile_y) * TILE_HEIGHT_DEG;
        BoundingBox::from_edges(south, west, south + TILE_HEIGHT_DEG, west + TILE_WIDTH_DEG)
    }
}

impl fmt::Display for TileCoordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.tile_x, self.tile_y)
    }
}

fn column_for(longitude: f64) -> i32 {
    let col = ((longitude + 180.0) / TILE_WIDTH_DEG).floor() as i32;
    col.clamp(0, TILE_GRID_SIZE - 1)
}

fn row_for(latitude: f64) -> i32 {
    let row = ((latitude + 90.0) / TILE_HEIGHT_DEG).floor() as i32;
    row.clamp(0, TILE_GRID_SIZE - 1)
}

/// A geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinate {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }
}

/// An area of interest, used to discover which tiles to keep in sync.
///
/// A box whose western edge lies east of its eastern edge crosses the
/// antimeridian.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    pub northeast_corner: Coordinate,
    pub southwest_corner: Coordinate,
}

impl BoundingBox {
    /// Build a box from its four edges.
    pub fn from_edges(south: f64, west: f64, north: f64, east: f64) -> Self {
        Self {
            northeast_corner: Coordinate::new(north, east),
            southwest_corner: Coordinate::new(south, west),
        }
    }

    /// The whole world.
    pub fn world() -> Self {
        Self::from_edges(-90.0, -180.0, 90.0, 180.0)
    }

    pub fn north(&self) -> f64 {
        self.northeast_corner.latitude
    }

    pub fn east(&self) -> f64 {
        self.northeast_corner.longitude
    }

    pub fn south(&self) -> f64 {
        self.southwest_corner.latitude
    }

    pub fn west(&self) -> f64 {
        self.southwest_corner.longitude
    }

    /// Check that the corners are real positions and the box is not
    /// upside down.
    pub fn validate(&self) -> crate::Result<()> {
        for corner in [self.northeast_corner, self.southwest_corner] {
            if !(-90.0..=90.0).contains(&corner.latitude) {
                return Err(crate::Error::InvalidInput(format!(
                    "Latitude {} out of range",
                    corner.latitude
                )));
            }
            if !(-180.0..=180.0).contains(&corner.longitude) {
                return Err(crate::Error::InvalidInput(format!(
                    "Longitude {} out of range",
                    corner.longitude
                )));
            }
        }
        if self.south() > self.north() {
            return Err(crate::Error::InvalidInput(
                "Southern edge lies north of northern edge".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the box spans the antimeridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.west() > self.east()
    }

    /// All tiles overlapped by this box, in row-major order.
    pub fn tiles(&self) -> Vec<TileCoordinate> {
        let rows = row_for(self.south())..=row_for(self.north());
        let columns: Vec<i32> = if self.crosses_antimeridian() {
            (column_for(self.west())..TILE_GRID_SIZE)
                .chain(0..=column_for(self.east()))
                .collect()
        } else {
            (column_for(self.west())..=column_for(self.east())).collect()
        };

        rows.flat_map(|y| columns.iter().map(move |&x| TileCoordinate::new(x, y)))
            .collect()
    }

    /// Whether `tile` is among the tiles this box overlaps.
    pub fn intersects(&self, tile: &TileCoordinate) -> bool {
        let rows = row_for(self.south())..=row_for(self.north());
        if !rows.contains(&tile.tile_y) {
            return false;
        }
        let (first, last) = (column_for(self.west()), column_for(self.east()));
        if self.crosses_antimeridian() {
            tile.tile_x >= first || tile.tile_x <= last
        } else {
            (first..=last).contains(&tile.tile_x)
        }
    }
}

/// The two independently synchronized record types of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataClass {
    /// Points of interest.
    Markers,
    /// Reviews attached to the tile's markers.
    Reviews,
}

impl DataClass {
    pub const ALL: [DataClass; 2] = [DataClass::Markers, DataClass::Reviews];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataClass::Markers => "markers",
            DataClass::Reviews => "reviews",
        }
    }
}

impl fmt::Display for DataClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the remote wants done with one tile/data class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncStrategy {
    /// Page through changes since the local cursor.
    Sync,
    /// Replace the tile with a bulk snapshot.
    Export,
    /// Drop the local data.
    Delete,
    /// Nothing to do.
    None,
}

/// Negotiated strategies for both data classes of a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileStrategies {
    pub markers: SyncStrategy,
    pub reviews: SyncStrategy,
}

impl TileStrategies {
    pub fn new(markers: SyncStrategy, reviews: SyncStrategy) -> Self {
        Self { markers, reviews }
    }

    pub fn get(&self, class: DataClass) -> SyncStrategy {
        match class {
            DataClass::Markers => self.markers,
            DataClass::Reviews => self.reviews,
        }
    }
}

impl Default for TileStrategies {
    fn default() -> Self {
        Self::new(SyncStrategy::None, SyncStrategy::None)
    }
}

/// Last-modified cursors for both data classes of a tile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileCursors {
    pub markers: Option<String>,
    pub reviews: Option<String>,
}

impl TileCursors {
    pub fn get(&self, class: DataClass) -> Option<&str> {
        match class {
            DataClass::Markers => self.markers.as_deref(),
            DataClass::Reviews => self.reviews.as_deref(),
        }
    }

    pub fn set(&mut self, class: DataClass, cursor: Option<String>) {
        match class {
            DataClass::Markers => self.markers = cursor,
            DataClass::Reviews => self.reviews = cursor,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_none() && self.reviews.is_none()
    }
}

/// A single marker or review as delivered by the remote.
///
/// Only the identity, the last-modified stamp and the tombstone flag are
/// interpreted; every other field is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRecord {
    pub id: i64,
    pub last_modified: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

impl SyncRecord {
    pub fn new(id: i64, last_modified: impl Into<String>) -> Self {
        Self {
            id,
            last_modified: last_modified.into(),
            deleted: false,
            fields: serde_json::Map::new(),
        }
    }

    /// A tombstone removing record `id`.
    pub fn tombstone(id: i64, last_modified: impl Into<String>) -> Self {
        Self {
            deleted: true,
            ..Self::new(id, last_modified)
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }
}

/// Full contents of one tile, as shipped (gzip-compressed) by an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileSnapshot {
    pub tile_x: i32,
    pub tile_y: i32,
    #[serde(default)]
    pub marker_last_modified: Option<String>,
    #[serde(default)]
    pub review_last_modified: Option<String>,
    #[serde(default)]
    pub markers: Vec<SyncRecord>,
    #[serde(default)]
    pub reviews: Vec<SyncRecord>,
}

impl TileSnapshot {
    pub fn tile(&self) -> TileCoordinate {
        TileCoordinate::new(self.tile_x, self.tile_y)
    }

    /// The cursors the tile assumes once this snapshot is installed.
    pub fn cursors(&self) -> TileCursors {
        TileCursors {
            markers: self.marker_last_modified.clone(),
            reviews: self.review_last_modified.clone(),
        }
    }

    /// Decode a decompressed snapshot destined for `expected`.
    pub fn decode_for(data: &[u8], expected: TileCoordinate) -> crate::Result<Self> {
        let snapshot: Self = serde_json::from_slice(data)?;
        if snapshot.tile() != expected {
            return Err(crate::Error::Integrity(format!(
                "Snapshot for tile {} delivered for tile {}",
                snapshot.tile(),
                expected
            )));
        }
        Ok(snapshot)
    }

    pub fn to_vec(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}
