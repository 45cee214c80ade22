//! Coordinate type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Valid right ascension range in degrees
pub const MIN_RA: f64 = 0.0;
pub const MAX_RA: f64 = 360.0;

/// Valid declination range in degrees
pub const MIN_DEC: f64 = -90.0;
pub const MAX_DEC: f64 = 90.0;

/// An equatorial sky position in degrees (ICRS).
///
/// Construction validates both axes, so every `SkyCoord` in the system is
/// known to be finite and in range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkyCoord {
    /// Right ascension in degrees, `[0, 360)`
    pub ra: f64,
    /// Declination in degrees, `[-90, 90]`
    pub dec: f64,
}

impl SkyCoord {
    /// Create a validated sky position.
    ///
    /// # Arguments
    ///
    /// * `ra` - Right ascension in degrees
    /// * `dec` - Declination in degrees
    pub fn new(ra: f64, dec: f64) -> Result<Self, CoordError> {
        if !ra.is_finite() || !(MIN_RA..MAX_RA).contains(&ra) {
            return Err(CoordError::InvalidRa(ra));
        }
        if !dec.is_finite() || !(MIN_DEC..=MAX_DEC).contains(&dec) {
            return Err(CoordError::InvalidDec(dec));
        }
        Ok(Self { ra, dec })
    }
}

impl fmt::Display for SkyCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6})", self.ra, self.dec)
    }
}

/// Errors that can occur constructing a sky coordinate.
#[derive(Debug, Clone, PartialEq)]
pub enum CoordError {
    /// Right ascension is non-finite or outside `[0, 360)`
    InvalidRa(f64),
    /// Declination is non-finite or outside `[-90, 90]`
    InvalidDec(f64),
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoordError::InvalidRa(ra) => {
                write!(
                    f,
                    "Invalid right ascension: {} (must be between {} and {})",
                    ra, MIN_RA, MAX_RA
                )
            }
            CoordError::InvalidDec(dec) => {
                write!(
                    f,
                    "Invalid declination: {} (must be between {} and {})",
                    dec, MIN_DEC, MAX_DEC
                )
            }
        }
    }
}

impl std::error::Error for CoordError {}
