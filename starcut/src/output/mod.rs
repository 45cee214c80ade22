//! Per-source FITS container I/O.
//!
//! Each processed source yields one container file: an empty primary HDU
//! tagged with the target id, followed by one image HDU per extracted
//! instrument/band combination, each annotated with its instrument, band,
//! transform fragment and (for stamps) provenance keywords. An optional
//! table HDU carries the source's original catalog row.
//!
//! The cache tiers persist artifacts through the same writer, so a cached
//! artifact read back is pixel-for-pixel identical to the one computed.

use std::fs;
use std::path::Path;

use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType};
use fitsio::tables::{ColumnDataType, ColumnDescription};
use fitsio::FitsFile;
use ndarray::Array2;
use thiserror::Error;

use crate::catalog::{CatalogRow, FieldValue};
use crate::extract::{CutoutArtifact, StampProvenance, Wcs};

/// Errors that can occur reading or writing containers.
#[derive(Debug, Error)]
pub enum OutputError {
    /// FITS layer failure
    #[error("Container FITS error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    /// Filesystem failure creating the output location
    #[error("Container I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Stored pixel data does not form a 2D plane
    #[error("Container holds a malformed image plane")]
    MalformedPlane,
}

/// Identity metadata written to a container's primary HDU.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContainerMeta<'a> {
    /// Target id tag (`OBJID`)
    pub target_id: Option<&'a str>,
    /// Cache fingerprint tag (`FPRINT`), set on cache-tier containers
    pub fingerprint: Option<&'a str>,
}

/// A container read back from disk.
#[derive(Debug, Clone)]
pub struct Container {
    pub target_id: Option<String>,
    pub fingerprint: Option<String>,
    pub artifacts: Vec<CutoutArtifact>,
}

/// Write a container holding the given artifacts.
///
/// Creates parent directories as needed and overwrites any existing file.
pub fn write_container(
    path: &Path,
    meta: ContainerMeta<'_>,
    artifacts: &[&CutoutArtifact],
    catalog_row: Option<&CatalogRow>,
) -> Result<(), OutputError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    if path.exists() {
        fs::remove_file(path)?;
    }

    let mut fptr = FitsFile::create(path).open()?;

    {
        let primary = fptr.hdu(0)?;
        if let Some(target_id) = meta.target_id {
            primary.write_key(&mut fptr, "OBJID", target_id)?;
        }
        if let Some(fingerprint) = meta.fingerprint {
            primary.write_key(&mut fptr, "FPRINT", fingerprint)?;
        }
    }

    for (index, artifact) in artifacts.iter().enumerate() {
        let extname = if artifact.instrument.is_empty() {
            format!("CUTOUT{}", index + 1)
        } else {
            format!("{}_{}", artifact.instrument, artifact.band)
        };

        let (height, width) = artifact.data.dim();
        let dimensions = [height, width];
        let description = ImageDescription {
            data_type: ImageType::Double,
            dimensions: &dimensions,
        };
        let hdu = fptr.create_image(&extname, &description)?;

        let flat: Vec<f64> = artifact.data.iter().copied().collect();
        hdu.write_image(&mut fptr, &flat)?;

        hdu.write_key(&mut fptr, "INSTRUME", artifact.instrument.as_str())?;
        hdu.write_key(&mut fptr, "BAND", artifact.band.as_str())?;

        if let Some(wcs) = &artifact.wcs {
            write_wcs_keys(&mut fptr, index + 1, wcs)?;
        }
        if let Some(stamp) = &artifact.stamp {
            write_stamp_keys(&mut fptr, index + 1, stamp)?;
        }

        let primary = fptr.hdu(0)?;
        primary.write_key(&mut fptr, &format!("HDU{}", index + 1), extname.as_str())?;
    }

    if let Some(row) = catalog_row {
        let table_index = write_row_table(&mut fptr, row)?;
        let primary = fptr.hdu(0)?;
        primary.write_key(&mut fptr, "SRCTABLE", table_index as i64)?;
    }

    Ok(())
}

fn write_wcs_keys(fptr: &mut FitsFile, hdu_index: usize, wcs: &Wcs) -> Result<(), OutputError> {
    let hdu = fptr.hdu(hdu_index)?;
    hdu.write_key(fptr, "CTYPE1", "RA---TAN")?;
    hdu.write_key(fptr, "CTYPE2", "DEC--TAN")?;
    hdu.write_key(fptr, "CRPIX1", wcs.crpix[0])?;
    hdu.write_key(fptr, "CRPIX2", wcs.crpix[1])?;
    hdu.write_key(fptr, "CRVAL1", wcs.crval[0])?;
    hdu.write_key(fptr, "CRVAL2", wcs.crval[1])?;
    hdu.write_key(fptr, "CD1_1", wcs.cd[0][0])?;
    hdu.write_key(fptr, "CD1_2", wcs.cd[0][1])?;
    hdu.write_key(fptr, "CD2_1", wcs.cd[1][0])?;
    hdu.write_key(fptr, "CD2_2", wcs.cd[1][1])?;
    Ok(())
}

fn write_stamp_keys(
    fptr: &mut FitsFile,
    hdu_index: usize,
    stamp: &StampProvenance,
) -> Result<(), OutputError> {
    let hdu = fptr.hdu(hdu_index)?;
    hdu.write_key(fptr, "STMPSIZE", stamp.stamp_size as i64)?;
    hdu.write_key(fptr, "PSF_RA", stamp.ra)?;
    hdu.write_key(fptr, "PSF_DEC", stamp.dec)?;
    hdu.write_key(fptr, "PSF_IDX", stamp.index as i64)?;
    hdu.write_key(fptr, "PSF_XCTR", stamp.x_center)?;
    hdu.write_key(fptr, "PSF_YCTR", stamp.y_center)?;
    if let Some(fwhm) = stamp.fwhm {
        hdu.write_key(fptr, "PSF_FWHM", fwhm)?;
    }
    Ok(())
}

/// Append the catalog row as a one-row binary table. Returns its HDU index.
fn write_row_table(fptr: &mut FitsFile, row: &CatalogRow) -> Result<usize, OutputError> {
    let mut descriptions = Vec::with_capacity(row.fields.len());
    for (name, value) in &row.fields {
        let description = match value {
            FieldValue::Float(_) => ColumnDescription::new(name)
                .with_type(ColumnDataType::Double)
                .create()?,
            FieldValue::Text(text) => ColumnDescription::new(name)
                .with_type(ColumnDataType::String)
                .that_repeats(text.len().max(1))
                .create()?,
        };
        descriptions.push(description);
    }

    let hdu = fptr.create_table("SOURCE", &descriptions)?;
    for (name, value) in &row.fields {
        match value {
            FieldValue::Float(number) => {
                hdu.write_col(fptr, name, &[*number])?;
            }
            FieldValue::Text(text) => {
                hdu.write_col(fptr, name, &[text.clone()])?;
            }
        }
    }

    // HDU index: primary + image HDUs precede the table.
    let mut index = 0;
    while fptr.hdu(index + 1).is_ok() {
        index += 1;
    }
    Ok(index)
}

/// Read a container back from disk.
///
/// Image HDUs become artifacts; the catalog-row table, when present, is
/// left in place (consumers that need it read it directly).
pub fn read_container(path: &Path) -> Result<Container, OutputError> {
    let mut fptr = FitsFile::open(path)?;

    let primary = fptr.hdu(0)?;
    let target_id = primary.read_key::<String>(&mut fptr, "OBJID").ok();
    let fingerprint = primary.read_key::<String>(&mut fptr, "FPRINT").ok();

    let mut artifacts = Vec::new();
    let mut index = 1;
    while let Ok(hdu) = fptr.hdu(index) {
        let shape = match &hdu.info {
            HduInfo::ImageInfo { shape, .. } if shape.len() == 2 => shape.clone(),
            _ => {
                index += 1;
                continue;
            }
        };

        let pixels: Vec<f64> = hdu.read_image(&mut fptr)?;
        let data = Array2::from_shape_vec((shape[0], shape[1]), pixels)
            .map_err(|_| OutputError::MalformedPlane)?;

        let wcs = read_wcs_keys(&mut fptr, index)?;
        let stamp = read_stamp_keys(&mut fptr, index)?;

        let hdu = fptr.hdu(index)?;
        let instrument = hdu
            .read_key::<String>(&mut fptr, "INSTRUME")
            .unwrap_or_default();
        let band = hdu.read_key::<String>(&mut fptr, "BAND").unwrap_or_default();

        artifacts.push(CutoutArtifact::new(data, wcs, stamp).with_channel(&instrument, &band));
        index += 1;
    }

    Ok(Container {
        target_id,
        fingerprint,
        artifacts,
    })
}

fn read_wcs_keys(fptr: &mut FitsFile, hdu_index: usize) -> Result<Option<Wcs>, OutputError> {
    let hdu = fptr.hdu(hdu_index)?;
    let read = |fptr: &mut FitsFile, key: &str| hdu.read_key::<f64>(fptr, key).ok();

    let Some(crpix1) = read(fptr, "CRPIX1") else {
        return Ok(None);
    };
    let (Some(crpix2), Some(crval1), Some(crval2)) = (
        read(fptr, "CRPIX2"),
        read(fptr, "CRVAL1"),
        read(fptr, "CRVAL2"),
    ) else {
        return Ok(None);
    };
    let (Some(cd11), Some(cd12), Some(cd21), Some(cd22)) = (
        read(fptr, "CD1_1"),
        read(fptr, "CD1_2"),
        read(fptr, "CD2_1"),
        read(fptr, "CD2_2"),
    ) else {
        return Ok(None);
    };

    match Wcs::new([crpix1, crpix2], [crval1, crval2], [[cd11, cd12], [cd21, cd22]]) {
        Ok(wcs) => Ok(Some(wcs)),
        Err(_) => Ok(None),
    }
}

fn read_stamp_keys(
    fptr: &mut FitsFile,
    hdu_index: usize,
) -> Result<Option<StampProvenance>, OutputError> {
    let hdu = fptr.hdu(hdu_index)?;

    let Ok(stamp_size) = hdu.read_key::<i64>(fptr, "STMPSIZE") else {
        return Ok(None);
    };

    let read = |fptr: &mut FitsFile, key: &str| hdu.read_key::<f64>(fptr, key).ok();

    let (Some(ra), Some(dec), Some(x_center), Some(y_center)) = (
        read(fptr, "PSF_RA"),
        read(fptr, "PSF_DEC"),
        read(fptr, "PSF_XCTR"),
        read(fptr, "PSF_YCTR"),
    ) else {
        return Ok(None);
    };

    let index = hdu.read_key::<i64>(fptr, "PSF_IDX").unwrap_or(0);
    let fwhm = hdu.read_key::<f64>(fptr, "PSF_FWHM").ok();

    Ok(Some(StampProvenance {
        index: index.max(0) as usize,
        x_center,
        y_center,
        ra,
        dec,
        stamp_size: stamp_size.max(0) as usize,
        fwhm,
    }))
}
