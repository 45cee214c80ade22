//! Settings structs for all configuration sections.
//!
//! Each struct represents one `[section]` of the INI config file.
//! These are pure data types; parsing lives in the parser module.

use std::path::PathBuf;

use crate::extract::EdgeMode;

/// Complete service configuration.
#[derive(Debug, Clone, Default)]
pub struct ServiceConfig {
    /// Archive and index locations
    pub data: DataSettings,
    /// Cache and output roots
    pub workspace: WorkspaceSettings,
    /// Input size limits
    pub limits: LimitSettings,
    /// Batch concurrency settings
    pub batch: BatchSettings,
    /// Extraction settings
    pub extract: ExtractSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// `[data]` - where the archive lives.
#[derive(Debug, Clone)]
pub struct DataSettings {
    /// Mosaic archive root (`root/<tile_id>/<instrument_dir>/...`)
    pub archive_root: PathBuf,
    /// Serialized tile index location
    pub tile_index: PathBuf,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            archive_root: PathBuf::from("data/MER"),
            tile_index: PathBuf::from("data/tile_index.json"),
        }
    }
}

/// `[workspace]` - cache tiers and output.
#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    /// Ephemeral cache root; each task gets a subdirectory per run
    pub ephemeral_cache_dir: PathBuf,
    /// Permanent cache root, shared across runs
    pub permanent_cache_dir: PathBuf,
    /// Output root for per-source containers
    pub output_dir: PathBuf,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            ephemeral_cache_dir: PathBuf::from("cache/run"),
            permanent_cache_dir: PathBuf::from("cache/permanent"),
            output_dir: PathBuf::from("output"),
        }
    }
}

/// `[limits]` - input caps.
#[derive(Debug, Clone)]
pub struct LimitSettings {
    /// Catalog row cap; rows beyond it are dropped with a notice
    pub max_catalog_rows: usize,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_catalog_rows: 10_000,
        }
    }
}

/// `[batch]` - concurrency and progress.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    /// Worker pool size (0 = number of CPU cores)
    pub n_workers: usize,
    /// Publish progress every N completed requests
    pub publish_every: usize,
    /// Tile lookup tolerance in degrees
    pub tolerance_deg: f64,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            n_workers: 0,
            publish_every: 8,
            tolerance_deg: 0.01,
        }
    }
}

/// `[extract]` - window extraction behaviour.
#[derive(Debug, Clone)]
pub struct ExtractSettings {
    /// Out-of-bounds policy
    pub edge_mode: EdgeMode,
    /// Padding value under fill mode
    pub fill_value: f64,
    /// HDU index of the image plane
    pub plane_index: usize,
    /// Treat artifacts containing invalid values as unusable
    pub skip_invalid: bool,
    /// Band used when a request specifies none.
    ///
    /// An unresolved band silently falls back to this value instead of
    /// failing the request. Flagged for product-owner review; do not
    /// change without checking downstream consumers.
    pub default_band: String,
}

impl Default for ExtractSettings {
    fn default() -> Self {
        Self {
            edge_mode: EdgeMode::Fill,
            fill_value: 0.0,
            plane_index: 0,
            skip_invalid: true,
            default_band: "VIS".to_string(),
        }
    }
}

/// `[logging]` - log output location.
#[derive(Debug, Clone)]
pub struct LoggingSettings {
    /// Directory for log files
    pub directory: String,
    /// Log filename
    pub file: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: "logs".to_string(),
            file: "starcut.log".to_string(),
        }
    }
}
