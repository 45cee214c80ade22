//! Windowed extraction from continuous mosaic images.

use std::path::Path;

use fitsio::hdu::HduInfo;
use fitsio::FitsFile;
use ndarray::{s, Array2};

use crate::coord::SkyCoord;
use crate::extract::{CutoutArtifact, ExtractError, Wcs, WindowSize};

/// Fill value used for out-of-bounds pixels when none is configured.
pub const DEFAULT_FILL_VALUE: f64 = 0.0;

/// Behaviour for windows that exceed the image bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    /// Pad out-of-bounds pixels with the fill value; the window always has
    /// exactly the requested dimensions
    Fill,
    /// Truncate the window to its overlap with the image
    Trim,
    /// Fail unless the window lies fully inside the image
    Strict,
}

/// Extract a pixel window centred on a sky position.
///
/// Loads the image plane and its coordinate transform, converts the
/// position to pixel coordinates and slices a window of the requested
/// dimensions around it. The returned artifact carries a transform
/// fragment re-referenced to the window origin and an eagerly computed
/// invalid-value flag.
///
/// A window with no overlap at all fails in every mode; `edge_mode`
/// governs partial overlap.
///
/// # Arguments
///
/// * `path` - Mosaic FITS file
/// * `position` - Window center on the sky
/// * `size` - Requested dimensions
/// * `plane_index` - HDU holding the image plane
/// * `edge_mode` - Out-of-bounds policy
/// * `fill_value` - Padding value under [`EdgeMode::Fill`]
pub fn extract_window(
    path: &Path,
    position: &SkyCoord,
    size: WindowSize,
    plane_index: usize,
    edge_mode: EdgeMode,
    fill_value: f64,
) -> Result<CutoutArtifact, ExtractError> {
    let (data, wcs) = read_plane(path, plane_index)?;

    let (x, y) = wcs.sky_to_pixel(position)?;
    // FITS pixel coordinates are 1-based; array indices are 0-based.
    let center_col = x - 1.0;
    let center_row = y - 1.0;

    let (window, (row0, col0)) =
        slice_window(&data, center_row, center_col, size.dims(), edge_mode, fill_value)?;

    Ok(CutoutArtifact::new(
        window,
        Some(wcs.shifted(row0, col0)),
        None,
    ))
}

/// Read a 2D image plane and its WCS keywords.
pub(crate) fn read_plane(
    path: &Path,
    plane_index: usize,
) -> Result<(Array2<f64>, Wcs), ExtractError> {
    let mut fptr = FitsFile::open(path)?;
    let hdu = fptr.hdu(plane_index)?;

    let shape = match &hdu.info {
        HduInfo::ImageInfo { shape, .. } => shape.clone(),
        _ => return Err(ExtractError::NotTwoDimensional { naxis: 0 }),
    };
    if shape.len() != 2 {
        return Err(ExtractError::NotTwoDimensional { naxis: shape.len() });
    }
    let (height, width) = (shape[0], shape[1]);

    let pixels: Vec<f64> = hdu.read_image(&mut fptr)?;
    let data = Array2::from_shape_vec((height, width), pixels)
        .map_err(|_| ExtractError::NotTwoDimensional { naxis: 2 })?;

    let wcs = read_wcs(&mut fptr, plane_index)?;
    Ok((data, wcs))
}

/// Read the WCS keywords of an image HDU.
///
/// Requires `CRPIX1/2` and `CRVAL1/2`; the linear term comes from the CD
/// matrix, falling back to `CDELT1/2` when no matrix is present.
fn read_wcs(fptr: &mut FitsFile, plane_index: usize) -> Result<Wcs, ExtractError> {
    let hdu = fptr.hdu(plane_index)?;

    let require = |fptr: &mut FitsFile, key: &str| -> Result<f64, ExtractError> {
        hdu.read_key::<f64>(fptr, key)
            .map_err(|_| ExtractError::MissingWcs {
                key: key.to_string(),
            })
    };

    let crpix = [require(fptr, "CRPIX1")?, require(fptr, "CRPIX2")?];
    let crval = [require(fptr, "CRVAL1")?, require(fptr, "CRVAL2")?];

    let read = |fptr: &mut FitsFile, key: &str| hdu.read_key::<f64>(fptr, key).ok();

    let cd = match (
        read(fptr, "CD1_1"),
        read(fptr, "CD1_2"),
        read(fptr, "CD2_1"),
        read(fptr, "CD2_2"),
    ) {
        (Some(cd11), cd12, cd21, Some(cd22)) => {
            [[cd11, cd12.unwrap_or(0.0)], [cd21.unwrap_or(0.0), cd22]]
        }
        _ => {
            let cdelt1 = read(fptr, "CDELT1").ok_or(ExtractError::MissingWcs {
                key: "CD1_1/CDELT1".to_string(),
            })?;
            let cdelt2 = read(fptr, "CDELT2").ok_or(ExtractError::MissingWcs {
                key: "CD2_2/CDELT2".to_string(),
            })?;
            [[cdelt1, 0.0], [0.0, cdelt2]]
        }
    };

    Wcs::new(crpix, crval, cd)
}

/// Slice a window of `dims` around a 0-based pixel center.
///
/// Returns the window and its origin `(row0, col0)` in image coordinates;
/// under [`EdgeMode::Fill`] the origin may be negative.
pub(crate) fn slice_window(
    data: &Array2<f64>,
    center_row: f64,
    center_col: f64,
    dims: (usize, usize),
    edge_mode: EdgeMode,
    fill_value: f64,
) -> Result<(Array2<f64>, (i64, i64)), ExtractError> {
    let (height, width) = dims;
    if height == 0 || width == 0 {
        return Err(ExtractError::EmptyWindow);
    }
    let (image_height, image_width) = data.dim();

    let row0 = (center_row - (height as f64 - 1.0) / 2.0).round() as i64;
    let col0 = (center_col - (width as f64 - 1.0) / 2.0).round() as i64;
    let row1 = row0 + height as i64;
    let col1 = col0 + width as i64;

    let out_of_bounds = || ExtractError::OutOfBounds {
        row0,
        row1,
        col0,
        col1,
        height: image_height,
        width: image_width,
    };

    // Overlap with the image; empty overlap fails in every mode.
    let overlap_row0 = row0.max(0);
    let overlap_row1 = row1.min(image_height as i64);
    let overlap_col0 = col0.max(0);
    let overlap_col1 = col1.min(image_width as i64);
    if overlap_row0 >= overlap_row1 || overlap_col0 >= overlap_col1 {
        return Err(out_of_bounds());
    }

    let fully_inside =
        row0 >= 0 && col0 >= 0 && row1 <= image_height as i64 && col1 <= image_width as i64;

    let source = data.slice(s![
        overlap_row0 as usize..overlap_row1 as usize,
        overlap_col0 as usize..overlap_col1 as usize
    ]);

    match edge_mode {
        EdgeMode::Strict => {
            if !fully_inside {
                return Err(out_of_bounds());
            }
            Ok((source.to_owned(), (row0, col0)))
        }
        EdgeMode::Trim => Ok((source.to_owned(), (overlap_row0, overlap_col0))),
        EdgeMode::Fill => {
            if fully_inside {
                return Ok((source.to_owned(), (row0, col0)));
            }
            let mut window = Array2::from_elem((height, width), fill_value);
            window
                .slice_mut(s![
                    (overlap_row0 - row0) as usize..(overlap_row1 - row0) as usize,
                    (overlap_col0 - col0) as usize..(overlap_col1 - col0) as usize
                ])
                .assign(&source);
            Ok((window, (row0, col0)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 10x10 ramp image: value = row * 10 + col.
    fn ramp() -> Array2<f64> {
        Array2::from_shape_fn((10, 10), |(row, col)| (row * 10 + col) as f64)
    }

    #[test]
    fn test_interior_window_exact_values() {
        let data = ramp();
        let (window, origin) =
            slice_window(&data, 5.0, 5.0, (3, 3), EdgeMode::Strict, 0.0).unwrap();

        assert_eq!(origin, (4, 4));
        assert_eq!(window.dim(), (3, 3));
        assert_eq!(window[[0, 0]], 44.0);
        assert_eq!(window[[2, 2]], 66.0);
    }

    #[test]
    fn test_even_window_origin() {
        let data = ramp();
        let (window, origin) =
            slice_window(&data, 5.0, 5.0, (4, 4), EdgeMode::Strict, 0.0).unwrap();
        assert_eq!(origin, (4, 4));
        assert_eq!(window.dim(), (4, 4));
    }

    #[test]
    fn test_fill_mode_pads_to_exact_size() {
        let data = ramp();
        // Centered within size/2 of the top-left corner.
        let (window, origin) =
            slice_window(&data, 0.0, 0.0, (5, 5), EdgeMode::Fill, -1.0).unwrap();

        assert_eq!(window.dim(), (5, 5));
        assert_eq!(origin, (-2, -2));
        // Out-of-bounds corner is fill, in-bounds region is image data.
        assert_eq!(window[[0, 0]], -1.0);
        assert_eq!(window[[2, 2]], 0.0);
        assert_eq!(window[[4, 4]], 22.0);
    }

    #[test]
    fn test_fill_mode_never_short() {
        let data = ramp();
        for center in [0.0, 1.0, 8.0, 9.0] {
            let (window, _) =
                slice_window(&data, center, center, (6, 6), EdgeMode::Fill, 0.0).unwrap();
            assert_eq!(window.dim(), (6, 6));
        }
    }

    #[test]
    fn test_trim_mode_truncates() {
        let data = ramp();
        let (window, origin) =
            slice_window(&data, 0.0, 0.0, (5, 5), EdgeMode::Trim, 0.0).unwrap();

        assert_eq!(origin, (0, 0));
        assert_eq!(window.dim(), (3, 3));
        assert_eq!(window[[0, 0]], 0.0);
    }

    #[test]
    fn test_strict_mode_rejects_partial_overlap() {
        let data = ramp();
        let result = slice_window(&data, 0.0, 5.0, (5, 5), EdgeMode::Strict, 0.0);
        assert!(matches!(result, Err(ExtractError::OutOfBounds { .. })));
    }

    #[test]
    fn test_no_overlap_fails_in_every_mode() {
        let data = ramp();
        for mode in [EdgeMode::Fill, EdgeMode::Trim, EdgeMode::Strict] {
            let result = slice_window(&data, 50.0, 50.0, (5, 5), mode, 0.0);
            assert!(matches!(result, Err(ExtractError::OutOfBounds { .. })));
        }
    }

    #[test]
    fn test_zero_size_rejected() {
        let data = ramp();
        let result = slice_window(&data, 5.0, 5.0, (0, 5), EdgeMode::Fill, 0.0);
        assert!(matches!(result, Err(ExtractError::EmptyWindow)));
    }

    #[test]
    fn test_rectangular_window() {
        let data = ramp();
        let (window, _) = slice_window(&data, 5.0, 5.0, (3, 5), EdgeMode::Strict, 0.0).unwrap();
        assert_eq!(window.dim(), (3, 5));
    }
}
