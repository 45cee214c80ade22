//! Extraction error types.

use thiserror::Error;

/// Errors that can occur during window or stamp extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Underlying FITS I/O failure (missing file, corrupt HDU, ...)
    #[error("FITS error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    /// The image plane is not two-dimensional
    #[error("Expected a 2D image plane, got {naxis} axes")]
    NotTwoDimensional { naxis: usize },

    /// A required coordinate-transform keyword is absent
    #[error("Missing coordinate transform keyword {key}")]
    MissingWcs { key: String },

    /// The CD matrix is singular and cannot be inverted
    #[error("Degenerate coordinate transform (singular CD matrix)")]
    SingularWcs,

    /// The target position projects onto the opposite hemisphere
    #[error("Position ({ra:.6}, {dec:.6}) is outside the image projection")]
    OutsideProjection { ra: f64, dec: f64 },

    /// Zero-area window requested
    #[error("Window size must be non-zero")]
    EmptyWindow,

    /// The window does not satisfy the edge mode (entirely outside the
    /// image, or partially outside under strict mode)
    #[error("Window [{row0}, {row1}) x [{col0}, {col1}) exceeds image bounds {height} x {width}")]
    OutOfBounds {
        row0: i64,
        row1: i64,
        col0: i64,
        col1: i64,
        height: usize,
        width: usize,
    },

    /// Stamp-grid metadata (position table or declared width) is missing
    #[error("Stamp metadata missing: {0}")]
    StampMetadataMissing(String),

    /// The declared stamp width does not fit inside the backing array
    #[error("Stamp of width {width} cannot be clamped inside a {height} x {image_width} image")]
    StampTruncated {
        width: usize,
        height: usize,
        image_width: usize,
    },
}
