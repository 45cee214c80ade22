//! Canonical extraction identity.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::coord::SkyCoord;
use crate::extract::WindowSize;
use crate::resolve::ProductType;

/// Decimal places of a degree kept in the fingerprint (1 microdegree).
///
/// Fixed so that float noise below survey astrometric precision can never
/// split one logical request across two cache entries. Two catalog
/// sources are never this close at survey resolution.
pub const POSITION_DECIMALS: u32 = 6;

const POSITION_SCALE: f64 = 1_000_000.0;

/// Canonical identity of a requested extraction.
///
/// Two requests with the same fingerprint are the same extraction for
/// caching purposes. Positions are rounded to [`POSITION_DECIMALS`] before
/// being stored, so equality and hashing are exact integer operations.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactFingerprint {
    ra_microdeg: i64,
    dec_microdeg: i64,
    size: WindowSize,
    instrument: String,
    product_type: ProductType,
    band: String,
}

impl ArtifactFingerprint {
    /// Build a fingerprint for one (position, size, channel) combination.
    pub fn new(
        position: &SkyCoord,
        size: WindowSize,
        instrument: &str,
        product_type: ProductType,
        band: &str,
    ) -> Self {
        Self {
            ra_microdeg: (position.ra * POSITION_SCALE).round() as i64,
            dec_microdeg: (position.dec * POSITION_SCALE).round() as i64,
            size,
            instrument: instrument.to_string(),
            product_type,
            band: band.to_string(),
        }
    }

    /// The rounded position, in degrees.
    pub fn position(&self) -> (f64, f64) {
        (
            self.ra_microdeg as f64 / POSITION_SCALE,
            self.dec_microdeg as f64 / POSITION_SCALE,
        )
    }

    pub fn instrument(&self) -> &str {
        &self.instrument
    }

    pub fn product_type(&self) -> ProductType {
        self.product_type
    }

    pub fn band(&self) -> &str {
        &self.band
    }

    /// Human-readable composite form, written into cached containers for
    /// verification on read-back.
    pub fn composite(&self) -> String {
        let (ra, dec) = self.position();
        format!(
            "ra_{ra:.6}_dec_{dec:.6}_size_{}_inst_{}_type_{}_band_{}",
            self.size,
            self.instrument,
            self.product_type.tag(),
            self.band
        )
    }

    /// Stable hex hash, used as the ephemeral tier's file key.
    pub fn hash_hex(&self) -> String {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

impl fmt::Display for ArtifactFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.composite())
    }
}
