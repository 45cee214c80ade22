//! Tile record type.

use serde::{Deserialize, Serialize};

use super::TileError;

/// Sky coverage record for one mosaic tile.
///
/// Built once from the tile's source catalog; immutable afterwards.
/// The bounding box is guaranteed non-degenerate (`ra_min < ra_max` and
/// `dec_min < dec_max`) by [`TileRecord::validate`], which runs both at
/// build time and when an index is loaded from disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileRecord {
    /// Tile identifier (the archive directory name)
    pub tile_id: String,
    /// Minimum right ascension covered, degrees
    pub ra_min: f64,
    /// Maximum right ascension covered, degrees
    pub ra_max: f64,
    /// Minimum declination covered, degrees
    pub dec_min: f64,
    /// Maximum declination covered, degrees
    pub dec_max: f64,
    /// Mean right ascension of catalog sources, degrees
    pub ra_center: f64,
    /// Mean declination of catalog sources, degrees
    pub dec_center: f64,
    /// Number of sources in the tile catalog
    pub n_objects: usize,
}

impl TileRecord {
    /// Check the non-degenerate bounding box invariant.
    pub fn validate(&self) -> Result<(), TileError> {
        if self.ra_min < self.ra_max && self.dec_min < self.dec_max {
            Ok(())
        } else {
            Err(TileError::DegenerateBox {
                tile_id: self.tile_id.clone(),
                ra_min: self.ra_min,
                ra_max: self.ra_max,
                dec_min: self.dec_min,
                dec_max: self.dec_max,
            })
        }
    }

    /// Whether the box, expanded by `tolerance` degrees on every side,
    /// contains the given position.
    pub fn contains(&self, ra: f64, dec: f64, tolerance: f64) -> bool {
        self.ra_min - tolerance <= ra
            && ra <= self.ra_max + tolerance
            && self.dec_min - tolerance <= dec
            && dec <= self.dec_max + tolerance
    }
}
