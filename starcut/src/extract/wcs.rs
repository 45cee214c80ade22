//! Linear TAN (gnomonic) coordinate transform fragment.
//!
//! The mosaics carry standard FITS WCS keywords (`CRPIX`, `CRVAL`, `CD`
//! matrix with `CDELT` fallback) for a tangent-plane projection. This is
//! the subset the archive actually uses; no SIP or distortion terms.

use crate::coord::SkyCoord;
use crate::extract::ExtractError;

/// Tangent-plane world coordinate transform.
///
/// Maps between sky positions and 1-based FITS pixel coordinates. Slicing
/// a window produces a shifted fragment ([`Wcs::shifted`]) whose reference
/// pixel is expressed in window coordinates, so the cutout remains fully
/// located on the sky.
#[derive(Debug, Clone, PartialEq)]
pub struct Wcs {
    /// Reference pixel (1-based), x then y
    pub crpix: [f64; 2],
    /// Sky position at the reference pixel: RA, Dec in degrees
    pub crval: [f64; 2],
    /// Linear transform matrix, degrees per pixel: `[[CD1_1, CD1_2], [CD2_1, CD2_2]]`
    pub cd: [[f64; 2]; 2],
    /// Inverse of `cd`, pixels per degree
    inv: [[f64; 2]; 2],
}

impl Wcs {
    /// Build a transform from its FITS keywords.
    ///
    /// Fails with [`ExtractError::SingularWcs`] when the CD matrix has no
    /// inverse; such a header cannot locate any pixel on the sky.
    pub fn new(crpix: [f64; 2], crval: [f64; 2], cd: [[f64; 2]; 2]) -> Result<Self, ExtractError> {
        let det = cd[0][0] * cd[1][1] - cd[0][1] * cd[1][0];
        if det.abs() < 1e-30 || !det.is_finite() {
            return Err(ExtractError::SingularWcs);
        }
        let inv = [
            [cd[1][1] / det, -cd[0][1] / det],
            [-cd[1][0] / det, cd[0][0] / det],
        ];
        Ok(Self {
            crpix,
            crval,
            cd,
            inv,
        })
    }

    /// Convert a sky position to 1-based pixel coordinates `(x, y)`.
    pub fn sky_to_pixel(&self, position: &SkyCoord) -> Result<(f64, f64), ExtractError> {
        let ra0 = self.crval[0].to_radians();
        let dec0 = self.crval[1].to_radians();
        let ra = position.ra.to_radians();
        let dec = position.dec.to_radians();

        let delta_ra = ra - ra0;
        let (sin_dec0, cos_dec0) = dec0.sin_cos();
        let (sin_dec, cos_dec) = dec.sin_cos();

        // Gnomonic projection denominator; non-positive means the position
        // lies on the far hemisphere and has no tangent-plane image.
        let d = sin_dec0 * sin_dec + cos_dec0 * cos_dec * delta_ra.cos();
        if d <= 1e-12 {
            return Err(ExtractError::OutsideProjection {
                ra: position.ra,
                dec: position.dec,
            });
        }

        let xi = (cos_dec * delta_ra.sin() / d).to_degrees();
        let eta = ((cos_dec0 * sin_dec - sin_dec0 * cos_dec * delta_ra.cos()) / d).to_degrees();

        let dx = self.inv[0][0] * xi + self.inv[0][1] * eta;
        let dy = self.inv[1][0] * xi + self.inv[1][1] * eta;

        Ok((self.crpix[0] + dx, self.crpix[1] + dy))
    }

    /// Convert 1-based pixel coordinates to a sky position.
    pub fn pixel_to_sky(&self, x: f64, y: f64) -> Result<SkyCoord, ExtractError> {
        let dx = x - self.crpix[0];
        let dy = y - self.crpix[1];

        let xi = (self.cd[0][0] * dx + self.cd[0][1] * dy).to_radians();
        let eta = (self.cd[1][0] * dx + self.cd[1][1] * dy).to_radians();

        let ra0 = self.crval[0].to_radians();
        let dec0 = self.crval[1].to_radians();
        let (sin_dec0, cos_dec0) = dec0.sin_cos();

        let rho = (xi * xi + eta * eta).sqrt();
        let (ra, dec) = if rho < 1e-15 {
            (self.crval[0], self.crval[1])
        } else {
            let c = rho.atan();
            let (sin_c, cos_c) = c.sin_cos();
            let dec = (cos_c * sin_dec0 + eta * sin_c * cos_dec0 / rho).asin();
            let ra = ra0
                + (xi * sin_c).atan2(rho * cos_dec0 * cos_c - eta * sin_dec0 * sin_c);
            (ra.to_degrees().rem_euclid(360.0), dec.to_degrees())
        };

        SkyCoord::new(ra, dec).map_err(|_| ExtractError::OutsideProjection {
            ra,
            dec,
        })
    }

    /// The same transform expressed in the coordinates of a window whose
    /// origin pixel (0-based) sits at `(row0, col0)` of this image.
    pub fn shifted(&self, row0: i64, col0: i64) -> Self {
        Self {
            crpix: [self.crpix[0] - col0 as f64, self.crpix[1] - row0 as f64],
            crval: self.crval,
            cd: self.cd,
            inv: self.inv,
        }
    }
}
