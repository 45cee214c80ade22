//! Extraction tests against real FITS fixtures.

use std::path::Path;

use fitsio::images::{ImageDescription, ImageType};
use fitsio::tables::{ColumnDataType, ColumnDescription};
use fitsio::FitsFile;
use ndarray::Array2;
use tempfile::TempDir;

use starcut::coord::SkyCoord;
use starcut::extract::{
    extract_nearest_stamp, extract_window, EdgeMode, ExtractError, WindowSize,
};

/// Pixel scale of the test mosaics, degrees per pixel.
const SCALE: f64 = 0.001;

/// Write a mosaic with a TAN WCS centred on (150.1, 2.2).
///
/// Pixel values are `row * 1000 + col` so tests can assert exact content.
fn write_mosaic(path: &Path, height: usize, width: usize, nan_at: Option<(usize, usize)>) {
    let mut data = Array2::from_shape_fn((height, width), |(row, col)| {
        (row * 1000 + col) as f64
    });
    if let Some(position) = nan_at {
        data[position] = f64::NAN;
    }

    // Mosaics carry their science plane in the primary HDU.
    let dimensions = [height, width];
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &dimensions,
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .open()
        .unwrap();
    let hdu = fptr.hdu(0).unwrap();
    let flat: Vec<f64> = data.iter().copied().collect();
    hdu.write_image(&mut fptr, &flat).unwrap();

    hdu.write_key(&mut fptr, "CTYPE1", "RA---TAN").unwrap();
    hdu.write_key(&mut fptr, "CTYPE2", "DEC--TAN").unwrap();
    hdu.write_key(&mut fptr, "CRPIX1", (width as f64 + 1.0) / 2.0)
        .unwrap();
    hdu.write_key(&mut fptr, "CRPIX2", (height as f64 + 1.0) / 2.0)
        .unwrap();
    hdu.write_key(&mut fptr, "CRVAL1", 150.1).unwrap();
    hdu.write_key(&mut fptr, "CRVAL2", 2.2).unwrap();
    hdu.write_key(&mut fptr, "CD1_1", -SCALE).unwrap();
    hdu.write_key(&mut fptr, "CD1_2", 0.0).unwrap();
    hdu.write_key(&mut fptr, "CD2_1", 0.0).unwrap();
    hdu.write_key(&mut fptr, "CD2_2", SCALE).unwrap();
}

/// Write a PSF stamp product: packed stamp plane in HDU 1 (with the
/// declared width), position table in HDU 2.
fn write_psf(path: &Path, plane_size: usize, stamp_size: i64, rows: &[(f64, f64, f64, f64)]) {
    let mut fptr = FitsFile::create(path).open().unwrap();

    let dimensions = [plane_size, plane_size];
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &dimensions,
    };
    let hdu = fptr.create_image("STAMPS", &description).unwrap();
    let flat: Vec<f64> = (0..plane_size * plane_size).map(|index| index as f64).collect();
    hdu.write_image(&mut fptr, &flat).unwrap();
    if stamp_size > 0 {
        hdu.write_key(&mut fptr, "STMPSIZE", stamp_size).unwrap();
    }

    let columns: Vec<_> = ["RA", "Dec", "x_center", "y_center", "FWHM"]
        .into_iter()
        .map(|name| {
            ColumnDescription::new(name)
                .with_type(ColumnDataType::Double)
                .create()
                .unwrap()
        })
        .collect();
    let table = fptr.create_table("PSF_CAT", &columns).unwrap();

    let ras: Vec<f64> = rows.iter().map(|row| row.0).collect();
    let decs: Vec<f64> = rows.iter().map(|row| row.1).collect();
    let xs: Vec<f64> = rows.iter().map(|row| row.2).collect();
    let ys: Vec<f64> = rows.iter().map(|row| row.3).collect();
    let fwhms: Vec<f64> = rows.iter().map(|_| 0.18).collect();
    table.write_col(&mut fptr, "RA", &ras).unwrap();
    table.write_col(&mut fptr, "Dec", &decs).unwrap();
    table.write_col(&mut fptr, "x_center", &xs).unwrap();
    table.write_col(&mut fptr, "y_center", &ys).unwrap();
    table.write_col(&mut fptr, "FWHM", &fwhms).unwrap();
}

#[test]
fn test_window_at_center_has_requested_dims_and_wcs() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("mosaic.fits");
    write_mosaic(&path, 100, 100, None);

    let position = SkyCoord::new(150.1, 2.2).unwrap();
    let artifact = extract_window(
        &path,
        &position,
        WindowSize::Square(20),
        0,
        EdgeMode::Strict,
        0.0,
    )
    .unwrap();

    assert_eq!(artifact.data.dim(), (20, 20));
    assert!(!artifact.has_invalid_values);

    // The fragment must still locate the target inside the window.
    let wcs = artifact.wcs.expect("window artifacts carry a transform");
    let (x, y) = wcs.sky_to_pixel(&position).unwrap();
    assert!(x > 0.0 && x <= 21.0, "x = {x}");
    assert!(y > 0.0 && y <= 21.0, "y = {y}");
}

#[test]
fn test_window_fill_near_edge_is_exact_size() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("mosaic.fits");
    write_mosaic(&path, 100, 100, None);

    // This position lands ~3 pixels from the west edge, so a 16px window
    // spills over the boundary.
    let near_edge = SkyCoord::new(150.1 + 47.0 * SCALE, 2.2).unwrap();
    let artifact = extract_window(
        &path,
        &near_edge,
        WindowSize::Square(16),
        0,
        EdgeMode::Fill,
        -99.0,
    )
    .unwrap();

    // Exact requested dimensions, out-of-bounds pixels carry the fill.
    assert_eq!(artifact.data.dim(), (16, 16));
    let fill_count = artifact.data.iter().filter(|v| **v == -99.0).count();
    assert!(fill_count > 0, "window near the edge must contain fill");

    let strict = extract_window(
        &path,
        &near_edge,
        WindowSize::Square(16),
        0,
        EdgeMode::Strict,
        0.0,
    );
    assert!(matches!(strict, Err(ExtractError::OutOfBounds { .. })));
}

#[test]
fn test_window_entirely_outside_fails_in_fill_mode() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("mosaic.fits");
    write_mosaic(&path, 100, 100, None);

    let far = SkyCoord::new(150.1 + 1.0, 2.2).unwrap();
    let result = extract_window(&path, &far, WindowSize::Square(16), 0, EdgeMode::Fill, 0.0);
    assert!(matches!(result, Err(ExtractError::OutOfBounds { .. })));
}

#[test]
fn test_window_nan_flag_computed_eagerly() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("mosaic.fits");
    write_mosaic(&path, 100, 100, Some((50, 50)));

    let position = SkyCoord::new(150.1, 2.2).unwrap();
    let artifact = extract_window(
        &path,
        &position,
        WindowSize::Square(10),
        0,
        EdgeMode::Strict,
        0.0,
    )
    .unwrap();
    assert!(artifact.has_invalid_values);

    // A window that misses the NaN pixel is clean.
    let offset = SkyCoord::new(150.1 + 30.0 * SCALE, 2.2 + 30.0 * SCALE).unwrap();
    let artifact = extract_window(
        &path,
        &offset,
        WindowSize::Square(10),
        0,
        EdgeMode::Strict,
        0.0,
    )
    .unwrap();
    assert!(!artifact.has_invalid_values);
}

#[test]
fn test_missing_wcs_is_extraction_failure() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("headerless.fits");

    let dimensions = [32, 32];
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &dimensions,
    };
    let mut fptr = FitsFile::create(&path)
        .with_custom_primary(&description)
        .open()
        .unwrap();
    let hdu = fptr.hdu(0).unwrap();
    let flat = vec![0.0; 32 * 32];
    hdu.write_image(&mut fptr, &flat).unwrap();
    drop(fptr);

    let position = SkyCoord::new(150.1, 2.2).unwrap();
    let result = extract_window(&path, &position, WindowSize::Square(8), 0, EdgeMode::Fill, 0.0);
    assert!(matches!(result, Err(ExtractError::MissingWcs { .. })));
}

#[test]
fn test_nearest_stamp_selection_and_provenance() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("psf.fits");
    write_psf(
        &path,
        256,
        32,
        &[
            (150.0, 2.0, 40.0, 40.0),
            (150.1, 2.2, 128.0, 128.0),
            (150.3, 2.4, 200.0, 200.0),
        ],
    );

    let target = SkyCoord::new(150.101, 2.201).unwrap();
    let artifact = extract_nearest_stamp(&path, &target).unwrap();

    assert_eq!(artifact.data.dim(), (32, 32));
    assert!(artifact.wcs.is_none());

    let stamp = artifact.stamp.expect("stamp artifacts carry provenance");
    assert_eq!(stamp.index, 1);
    assert_eq!(stamp.x_center, 128.0);
    assert_eq!(stamp.y_center, 128.0);
    assert_eq!(stamp.stamp_size, 32);
    assert_eq!(stamp.fwhm, Some(0.18));
    assert!((stamp.ra - 150.1).abs() < 1e-9);
}

#[test]
fn test_stamp_wider_than_plane_fails_explicitly() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("psf.fits");
    // Declared width 64 cannot fit a 32x32 plane; clamping would shrink
    // the slice, so the extraction must fail.
    write_psf(&path, 32, 64, &[(150.1, 2.2, 16.0, 16.0)]);

    let target = SkyCoord::new(150.1, 2.2).unwrap();
    let result = extract_nearest_stamp(&path, &target);
    assert!(matches!(result, Err(ExtractError::StampTruncated { .. })));
}

#[test]
fn test_stamp_missing_width_metadata_fails() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("psf.fits");
    write_psf(&path, 256, 0, &[(150.1, 2.2, 128.0, 128.0)]);

    let target = SkyCoord::new(150.1, 2.2).unwrap();
    let result = extract_nearest_stamp(&path, &target);
    assert!(matches!(
        result,
        Err(ExtractError::StampMetadataMissing(_))
    ));
}
