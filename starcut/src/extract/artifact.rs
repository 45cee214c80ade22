//! The uniform extraction result envelope.

use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::extract::Wcs;

/// Requested window dimensions in pixels.
///
/// A scalar gives a square window; a pair gives height × width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowSize {
    /// Square window of the given side length
    Square(u32),
    /// Rectangular window
    Rect { height: u32, width: u32 },
}

impl WindowSize {
    /// Window dimensions as `(height, width)`.
    pub fn dims(&self) -> (usize, usize) {
        match self {
            WindowSize::Square(side) => (*side as usize, *side as usize),
            WindowSize::Rect { height, width } => (*height as usize, *width as usize),
        }
    }
}

impl fmt::Display for WindowSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSize::Square(side) => write!(f, "{side}"),
            WindowSize::Rect { height, width } => write!(f, "{height}x{width}"),
        }
    }
}

impl FromStr for WindowSize {
    type Err = String;

    /// Parse `"128"` or `"128x256"` (height × width).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.parse::<u32>()
                .map_err(|_| format!("invalid window size '{s}'"))
        };
        match s.split_once('x') {
            Some((height, width)) => Ok(WindowSize::Rect {
                height: parse(height)?,
                width: parse(width)?,
            }),
            None => Ok(WindowSize::Square(parse(s)?)),
        }
    }
}

/// Provenance of a nearest-stamp extraction.
#[derive(Debug, Clone, PartialEq)]
pub struct StampProvenance {
    /// Row index of the selected stamp in the position table
    pub index: usize,
    /// Recorded pixel center of the stamp, x axis
    pub x_center: f64,
    /// Recorded pixel center of the stamp, y axis
    pub y_center: f64,
    /// Sky position of the stamp, degrees
    pub ra: f64,
    /// Sky position of the stamp, degrees
    pub dec: f64,
    /// Declared stamp width in pixels
    pub stamp_size: usize,
    /// Characteristic width of the stamp, when the table provides one
    pub fwhm: Option<f64>,
}

/// Result envelope shared by both extraction paths.
///
/// Window and stamp extraction both produce this shape, so caching and
/// skip logic downstream never branch on the extraction type. The
/// `has_invalid_values` flag is computed eagerly when the envelope is
/// built, not deferred to consumers.
#[derive(Debug, Clone, PartialEq)]
pub struct CutoutArtifact {
    /// Extracted pixel data, row-major `(height, width)`
    pub data: Array2<f64>,
    /// Coordinate transform fragment for the window; stamp extractions
    /// carry `None` (their location lives in [`StampProvenance`])
    pub wcs: Option<Wcs>,
    /// Instrument directory name this artifact came from
    pub instrument: String,
    /// Full band code this artifact came from
    pub band: String,
    /// Nearest-stamp provenance, for stamp products only
    pub stamp: Option<StampProvenance>,
    /// Whether the pixel payload contains NaN values
    pub has_invalid_values: bool,
}

impl CutoutArtifact {
    /// Build an envelope, computing the invalid-value flag immediately
    /// over the sliced data.
    pub fn new(data: Array2<f64>, wcs: Option<Wcs>, stamp: Option<StampProvenance>) -> Self {
        let has_invalid_values = data.iter().any(|value| value.is_nan());
        Self {
            data,
            wcs,
            instrument: String::new(),
            band: String::new(),
            stamp,
            has_invalid_values,
        }
    }

    /// Tag the artifact with the instrument/band it was resolved from.
    pub fn with_channel(mut self, instrument: &str, band: &str) -> Self {
        self.instrument = instrument.to_string();
        self.band = band.to_string();
        self
    }
}
