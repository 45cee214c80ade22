//! Nearest-stamp extraction for point-spread-function products.
//!
//! PSF products do not hold a continuous image: HDU 1 is a packed pixel
//! plane containing a grid of fixed-size stamps, and HDU 2 is a table of
//! the discrete catalog positions those stamps were sampled at. The
//! declared stamp width lives in the image header (`STMPSIZE`).

use std::path::Path;

use fitsio::hdu::HduInfo;
use fitsio::FitsFile;
use ndarray::{s, Array2};

use crate::coord::{angular_separation, SkyCoord};
use crate::extract::{CutoutArtifact, ExtractError, StampProvenance};

/// Header keyword declaring the stamp width.
const STAMP_SIZE_KEY: &str = "STMPSIZE";

/// Extract the stamp nearest to a sky position.
///
/// Finds the stamp whose recorded position has the smallest true angular
/// separation from the target, derives its pixel bounds from the recorded
/// pixel center and the declared stamp width, and slices it out. Bounds
/// are clamped to the backing array; if clamping would shrink the slice
/// below the declared width the extraction fails rather than returning a
/// truncated stamp.
///
/// The artifact carries the stamp's table index, centers and any quality
/// metadata as provenance; it has no transform fragment of its own.
pub fn extract_nearest_stamp(
    path: &Path,
    position: &SkyCoord,
) -> Result<CutoutArtifact, ExtractError> {
    let mut fptr = FitsFile::open(path)?;

    // HDU 1: packed stamp plane with the declared width.
    let image_hdu = fptr.hdu(1)?;
    let shape = match &image_hdu.info {
        HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => shape.clone(),
        HduInfo::ImageInfo { shape, .. } => {
            return Err(ExtractError::NotTwoDimensional { naxis: shape.len() })
        }
        _ => return Err(ExtractError::StampMetadataMissing("stamp image plane".into())),
    };
    let (image_height, image_width) = (shape[0], shape[1]);

    let stamp_size = image_hdu
        .read_key::<i64>(&mut fptr, STAMP_SIZE_KEY)
        .unwrap_or(0);
    if stamp_size <= 0 {
        return Err(ExtractError::StampMetadataMissing(format!(
            "{STAMP_SIZE_KEY} keyword absent or zero"
        )));
    }
    let stamp_size = stamp_size as usize;

    // HDU 2: stamp position table.
    let table_hdu = fptr.hdu(2)?;
    let column_names: Vec<String> = match &table_hdu.info {
        HduInfo::TableInfo {
            column_descriptions,
            ..
        } => column_descriptions
            .iter()
            .map(|column| column.name.clone())
            .collect(),
        _ => {
            return Err(ExtractError::StampMetadataMissing(
                "stamp position table".into(),
            ))
        }
    };

    let ras: Vec<f64> = table_hdu.read_col(&mut fptr, "RA")?;
    let decs: Vec<f64> = table_hdu.read_col(&mut fptr, "Dec")?;
    let x_centers: Vec<f64> = table_hdu.read_col(&mut fptr, "x_center")?;
    let y_centers: Vec<f64> = table_hdu.read_col(&mut fptr, "y_center")?;
    if ras.is_empty() {
        return Err(ExtractError::StampMetadataMissing(
            "stamp position table is empty".into(),
        ));
    }

    let fwhms: Option<Vec<f64>> = if column_names.iter().any(|name| name == "FWHM") {
        table_hdu.read_col(&mut fptr, "FWHM").ok()
    } else {
        None
    };

    let index = nearest_stamp_index(position, &ras, &decs);
    let (x_center, y_center) = (x_centers[index], y_centers[index]);

    let (row0, col0) = stamp_bounds(x_center, y_center, stamp_size, image_height, image_width)?;

    let image_hdu = fptr.hdu(1)?;
    let pixels: Vec<f64> = image_hdu.read_image(&mut fptr)?;
    let plane = Array2::from_shape_vec((image_height, image_width), pixels)
        .map_err(|_| ExtractError::NotTwoDimensional { naxis: 2 })?;
    let stamp = plane
        .slice(s![row0..row0 + stamp_size, col0..col0 + stamp_size])
        .to_owned();

    let provenance = StampProvenance {
        index,
        x_center,
        y_center,
        ra: ras[index],
        dec: decs[index],
        stamp_size,
        fwhm: fwhms.map(|values| values[index]),
    };

    Ok(CutoutArtifact::new(stamp, None, Some(provenance)))
}

/// Index of the stamp angularly nearest to the target position.
fn nearest_stamp_index(position: &SkyCoord, ras: &[f64], decs: &[f64]) -> usize {
    let mut best = 0;
    let mut best_separation = f64::INFINITY;
    for (index, (&ra, &dec)) in ras.iter().zip(decs).enumerate() {
        let Ok(stamp_position) = SkyCoord::new(ra, dec) else {
            continue;
        };
        let separation = angular_separation(position, &stamp_position);
        if separation < best_separation {
            best_separation = separation;
            best = index;
        }
    }
    best
}

/// Derive the stamp's array origin `(row0, col0)` from its recorded pixel
/// center and declared width.
///
/// The lower bound keeps the archive's one-pixel offset convention
/// (`center - width/2 - 1`). Bounds are clamped so the slice never exceeds
/// the backing array; if the clamp pushes an origin negative the declared
/// width does not fit, and the extraction must fail rather than shrink.
fn stamp_bounds(
    x_center: f64,
    y_center: f64,
    stamp_size: usize,
    image_height: usize,
    image_width: usize,
) -> Result<(usize, usize), ExtractError> {
    let half = (stamp_size / 2) as i64;
    let mut col0 = ((x_center as i64) - half - 1).max(0);
    let mut row0 = ((y_center as i64) - half - 1).max(0);

    if col0 + stamp_size as i64 > image_width as i64 {
        col0 = image_width as i64 - stamp_size as i64;
    }
    if row0 + stamp_size as i64 > image_height as i64 {
        row0 = image_height as i64 - stamp_size as i64;
    }

    if col0 < 0 || row0 < 0 {
        return Err(ExtractError::StampTruncated {
            width: stamp_size,
            height: image_height,
            image_width,
        });
    }

    Ok((row0 as usize, col0 as usize))
}
