//! Per-tile contents shared by the store implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use tilesync_common::{DataClass, SyncRecord, TileCursors, TileSnapshot};

/// Everything a store keeps for one tile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TileData {
    /// Markers by id.
    pub markers: BTreeMap<i64, SyncRecord>,
    /// Reviews by id.
    pub reviews: BTreeMap<i64, SyncRecord>,
    /// Last-modified cursors.
    pub cursors: TileCursors,
    /// When the tile last received a page or snapshot.
    pub updated_at: Option<DateTime<Utc>>,
}

impl TileData {
    /// Build tile contents from an export snapshot.
    pub fn from_snapshot(snapshot: TileSnapshot) -> Self {
        let cursors = snapshot.cursors();
        Self {
            markers: snapshot.markers.into_iter().map(|r| (r.id, r)).collect(),
            reviews: snapshot.reviews.into_iter().map(|r| (r.id, r)).collect(),
            cursors,
            updated_at: Some(Utc::now()),
        }
    }

    fn class_records(&self, class: DataClass) -> &BTreeMap<i64, SyncRecord> {
        match class {
            DataClass::Markers => &self.markers,
            DataClass::Reviews => &self.reviews,
        }
    }

    fn class_records_mut(&mut self, class: DataClass) -> &mut BTreeMap<i64, SyncRecord> {
        match class {
            DataClass::Markers => &mut self.markers,
            DataClass::Reviews => &mut self.reviews,
        }
    }

    /// Upsert a page and advance the class cursor; returns records processed.
    pub fn apply_page(&mut self, class: DataClass, records: Vec<SyncRecord>) -> usize {
        let count = records.len();
        let mut cursor = self.cursors.get(class).map(str::to_string);

        let target = self.class_records_mut(class);
        for record in records {
            if cursor.as_deref().map_or(true, |c| record.last_modified.as_str() > c) {
                cursor = Some(record.last_modified.clone());
            }
            if record.deleted {
                target.remove(&record.id);
            } else {
                target.insert(record.id, record);
            }
        }

        self.cursors.set(class, cursor);
        if count > 0 {
            self.updated_at = Some(Utc::now());
        }
        count
    }

    /// Drop records and cursor of one class.
    pub fn clear(&mut self, class: DataClass) {
        self.class_records_mut(class).clear();
        self.cursors.set(class, None);
    }

    /// Records of one class, ordered by id.
    pub fn records(&self, class: DataClass) -> Vec<SyncRecord> {
        self.class_records(class).values().cloned().collect()
    }

    /// Whether nothing is left worth keeping.
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty() && self.reviews.is_empty() && self.cursors.is_empty()
    }
}
