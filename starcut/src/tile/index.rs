//! Tile index construction, persistence and lookup.

use std::fs;
use std::path::Path;

use fitsio::hdu::HduInfo;
use fitsio::FitsFile;
use tracing::{debug, info, warn};

use super::{TileError, TileRecord};
use crate::coord::{angular_separation, SkyCoord};

/// Filename fragment identifying a per-tile source catalog.
pub const DEFAULT_CATALOG_PATTERN: &str = "EUC_MER_FINAL-CAT_TILE";

/// Default bounding-box expansion for lookups, in degrees.
pub const DEFAULT_TOLERANCE_DEG: f64 = 0.01;

/// Column name pairs probed for sky positions, in preference order.
const POSITION_COLUMNS: [(&str, &str); 2] =
    [("RIGHT_ASCENSION", "DECLINATION"), ("RA", "DEC")];

/// Read-only spatial index over the archive's tiles.
///
/// Built once by scanning the per-tile source catalogs; each tile
/// contributes one [`TileRecord`] with its bounding box and center.
/// Lookups filter by bounding-box containment (within a tolerance) and
/// break ties by true angular separation to the candidate centers.
///
/// # Example
///
/// ```no_run
/// use starcut::tile::TileIndex;
///
/// let index = TileIndex::load("tile_index.json")?;
/// if let Some(tile_id) = index.lookup(150.125, 2.205, 0.01) {
///     println!("position falls in tile {tile_id}");
/// }
/// # Ok::<(), starcut::tile::TileError>(())
/// ```
#[derive(Debug, Clone)]
pub struct TileIndex {
    records: Vec<TileRecord>,
}

impl TileIndex {
    /// Build an index from validated records.
    ///
    /// Used by tests and by deserialization; `build` is the normal
    /// production entry point.
    pub fn from_records(records: Vec<TileRecord>) -> Result<Self, TileError> {
        for record in &records {
            record.validate()?;
        }
        Ok(Self { records })
    }

    /// Scan a tile catalog root and build the index.
    ///
    /// Expects `catalog_root/<tile_id>/` directories, each containing a
    /// source catalog FITS file whose name contains `pattern`. The catalog's
    /// position columns give the tile's bounding box and center. Tiles
    /// without a usable catalog are skipped with a warning; an archive that
    /// yields zero records is an error.
    ///
    /// # Arguments
    ///
    /// * `catalog_root` - Root directory holding per-tile catalog directories
    /// * `pattern` - Filename fragment identifying catalog files
    pub fn build(catalog_root: &Path, pattern: &str) -> Result<Self, TileError> {
        let mut records = Vec::new();

        let mut tile_dirs: Vec<_> = fs::read_dir(catalog_root)?
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .collect();
        tile_dirs.sort_by_key(|entry| entry.file_name());

        for entry in tile_dirs {
            let tile_id = entry.file_name().to_string_lossy().to_string();
            match Self::scan_tile(&entry.path(), &tile_id, pattern) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {
                    debug!("Tile {}: no catalog matching '{}'", tile_id, pattern);
                }
                Err(err) => {
                    warn!("Tile {}: skipped ({})", tile_id, err);
                }
            }
        }

        if records.is_empty() {
            return Err(TileError::EmptyIndex(
                catalog_root.to_string_lossy().to_string(),
            ));
        }

        info!("Tile index built: {} tiles", records.len());
        Self::from_records(records)
    }

    /// Build one record from a tile directory, or `None` if no catalog
    /// file matches the pattern.
    fn scan_tile(
        tile_dir: &Path,
        tile_id: &str,
        pattern: &str,
    ) -> Result<Option<TileRecord>, TileError> {
        let mut catalogs: Vec<_> = fs::read_dir(tile_dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.contains(pattern) && name.ends_with(".fits"))
                    .unwrap_or(false)
            })
            .collect();
        catalogs.sort();

        let Some(catalog_path) = catalogs.into_iter().next() else {
            return Ok(None);
        };

        let (ras, decs) = match read_position_columns(&catalog_path) {
            Ok(columns) => columns,
            Err(err) => {
                warn!(
                    "Tile {}: unreadable catalog {}: {}",
                    tile_id,
                    catalog_path.display(),
                    err
                );
                return Ok(None);
            }
        };

        if ras.is_empty() {
            return Ok(None);
        }

        let n = ras.len() as f64;
        let record = TileRecord {
            tile_id: tile_id.to_string(),
            ra_min: ras.iter().copied().fold(f64::INFINITY, f64::min),
            ra_max: ras.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            dec_min: decs.iter().copied().fold(f64::INFINITY, f64::min),
            dec_max: decs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            ra_center: ras.iter().sum::<f64>() / n,
            dec_center: decs.iter().sum::<f64>() / n,
            n_objects: ras.len(),
        };
        record.validate()?;
        Ok(Some(record))
    }

    /// Load an index from its JSON serialization, re-validating every record.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, TileError> {
        let data = fs::read_to_string(path)?;
        let records: Vec<TileRecord> = serde_json::from_str(&data)?;
        Self::from_records(records)
    }

    /// Serialize the index to JSON.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), TileError> {
        let json = serde_json::to_string_pretty(&self.records)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Number of tiles in the index.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the index holds no tiles.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over all records.
    pub fn records(&self) -> impl Iterator<Item = &TileRecord> {
        self.records.iter()
    }

    /// Resolve the tile containing a sky position.
    ///
    /// Filters tiles whose bounding box contains the position within
    /// `tolerance` degrees. Zero matches returns `None` - a normal "outside
    /// the survey footprint" outcome, not an error. When several boxes
    /// match (tolerance overlap or shared boundaries), the tile whose
    /// center is angularly nearest wins; exact ties fall back to the
    /// smaller tile id, so the result never depends on enumeration order.
    pub fn lookup(&self, ra: f64, dec: f64, tolerance: f64) -> Option<&str> {
        let position = SkyCoord::new(ra, dec).ok()?;

        let mut candidates: Vec<(f64, &TileRecord)> = self
            .records
            .iter()
            .filter(|record| record.contains(ra, dec, tolerance))
            .map(|record| {
                let center = SkyCoord {
                    ra: record.ra_center,
                    dec: record.dec_center,
                };
                (angular_separation(&position, &center), record)
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.0.partial_cmp(&b.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.tile_id.cmp(&b.1.tile_id))
        });

        candidates.first().map(|(_, record)| record.tile_id.as_str())
    }
}

/// Read the RA/Dec columns from a tile source catalog.
///
/// Probes the first table HDU for each known position column pair and
/// reads the first pair present.
fn read_position_columns(path: &Path) -> Result<(Vec<f64>, Vec<f64>), fitsio::errors::Error> {
    let mut fptr = FitsFile::open(path)?;
    let hdu = fptr.hdu(1)?;

    let column_names: Vec<String> = match &hdu.info {
        HduInfo::TableInfo {
            column_descriptions,
            ..
        } => column_descriptions
            .iter()
            .map(|column| column.name.clone())
            .collect(),
        _ => Vec::new(),
    };

    for (ra_name, dec_name) in POSITION_COLUMNS {
        if column_names.iter().any(|name| name == ra_name)
            && column_names.iter().any(|name| name == dec_name)
        {
            let ras: Vec<f64> = hdu.read_col(&mut fptr, ra_name)?;
            let decs: Vec<f64> = hdu.read_col(&mut fptr, dec_name)?;
            return Ok((ras, decs));
        }
    }

    Ok((Vec::new(), Vec::new()))
}
