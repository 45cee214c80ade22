//! Spatial tile index.
//!
//! The mosaic archive is partitioned into fixed rectangular sky tiles, each
//! with its own per-instrument product directory. This module answers the
//! question "which tile contains this sky position": [`TileIndex`] is built
//! once, offline, from the per-tile source catalogs, persisted as JSON, and
//! read-only afterwards.

mod index;
mod record;

pub use index::{TileIndex, DEFAULT_CATALOG_PATTERN, DEFAULT_TOLERANCE_DEG};
pub use record::TileRecord;

use thiserror::Error;

/// Errors that can occur building, loading or saving a tile index.
#[derive(Debug, Error)]
pub enum TileError {
    /// I/O error reading the catalog root or the index file
    #[error("Tile index I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Index file is not valid JSON
    #[error("Tile index parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A record violates the non-degenerate bounding box invariant
    #[error("Degenerate bounding box for tile {tile_id}: ra [{ra_min}, {ra_max}], dec [{dec_min}, {dec_max}]")]
    DegenerateBox {
        tile_id: String,
        ra_min: f64,
        ra_max: f64,
        dec_min: f64,
        dec_max: f64,
    },

    /// No tile directories produced a usable record
    #[error("No usable tile catalogs found under {0}")]
    EmptyIndex(String),
}
