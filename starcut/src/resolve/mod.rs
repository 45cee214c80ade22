//! Mosaic file resolution by naming convention.
//!
//! Archive tiles lay their products out as
//! `root/<tile_id>/<instrument_dir>/<file>.fits`, with filenames following a
//! grammar fixed by the archive producer:
//!
//! ```text
//! EUC_MER_<productTag>-<instrumentCode>[-<bandCode>]_TILE<tile_id>-<hash>_<timestamp>.fits
//! ```
//!
//! Each product type maps to a declarative [`ParseRule`] (search token,
//! strip prefix, optional strip suffix) interpreted by one generic routine,
//! [`parse_filename`]. After stripping, a single remaining token is a
//! single-channel instrument (band equals the instrument code); multiple
//! tokens split into an instrument code and a rejoined band code.
//!
//! Resolution failures are split in two: a missing tile directory or zero
//! matching files is a normal "no data" outcome (empty map), while an
//! unreadable directory is an I/O error.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Filename tokens that match the product glob but are catalog indexes,
/// not images. These must never be offered for pixel extraction.
const EXCLUDED_TOKENS: [&str; 1] = ["FINAL-CAT"];

/// Archive product types that can be requested for extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ProductType {
    /// Background-subtracted science mosaic
    BgSub,
    /// Background model mosaic
    BgMod,
    /// Pixel flag mask mosaic
    Flag,
    /// RMS noise mosaic
    Rms,
    /// Point-spread-function stamp catalog
    CatalogPsf,
}

/// Filename parse rule for one product type.
///
/// `search` is the fragment (after `EUC_MER_`) that identifies the product's
/// files; `prefix` is stripped from the front of the pre-`_TILE` segment and
/// `suffix`, when present, from its back. What remains is the
/// instrument/band token.
#[derive(Debug, Clone, Copy)]
pub struct ParseRule {
    /// Fragment identifying the product's files
    pub search: &'static str,
    /// Prefix stripped before instrument/band parsing
    pub prefix: &'static str,
    /// Suffix stripped before instrument/band parsing, if any
    pub suffix: Option<&'static str>,
}

impl ProductType {
    /// All product types, in canonical order.
    pub const ALL: [ProductType; 5] = [
        ProductType::BgSub,
        ProductType::BgMod,
        ProductType::Flag,
        ProductType::Rms,
        ProductType::CatalogPsf,
    ];

    /// Canonical tag used in request configs, cache keys and output paths.
    pub fn tag(&self) -> &'static str {
        match self {
            ProductType::BgSub => "BGSUB",
            ProductType::BgMod => "BGMOD",
            ProductType::Flag => "FLAG",
            ProductType::Rms => "RMS",
            ProductType::CatalogPsf => "CATALOG-PSF",
        }
    }

    /// Parse a canonical tag.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.tag() == tag)
    }

    /// The filename parse rule for this product type.
    ///
    /// FLAG and RMS planes ship inside the generic `MOSAIC` product family
    /// and are distinguished by suffix; the others carry their own tag.
    pub fn parse_rule(&self) -> ParseRule {
        match self {
            ProductType::BgSub => ParseRule {
                search: "BGSUB-MOSAIC",
                prefix: "EUC_MER_BGSUB-MOSAIC-",
                suffix: None,
            },
            ProductType::BgMod => ParseRule {
                search: "BGMOD",
                prefix: "EUC_MER_BGMOD-",
                suffix: None,
            },
            ProductType::Flag => ParseRule {
                search: "MOSAIC",
                prefix: "EUC_MER_MOSAIC-",
                suffix: Some("-FLAG"),
            },
            ProductType::Rms => ParseRule {
                search: "MOSAIC",
                prefix: "EUC_MER_MOSAIC-",
                suffix: Some("-RMS"),
            },
            ProductType::CatalogPsf => ParseRule {
                search: "CATALOG-PSF",
                prefix: "EUC_MER_CATALOG-PSF-",
                suffix: None,
            },
        }
    }

    /// Whether this product stores discrete stamps rather than a
    /// continuous image.
    pub fn is_stamp_product(&self) -> bool {
        matches!(self, ProductType::CatalogPsf)
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Instrument and band codes parsed from a mosaic filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedName {
    /// Instrument code from the filename (e.g. `NIR`, `DES`, `VIS`)
    pub instrument: String,
    /// Band code (e.g. `Y`, `G`; equals the instrument code for
    /// single-channel instruments)
    pub band: String,
}

impl ParsedName {
    /// The full band identifier as used in band filters and map keys:
    /// `<instrument>-<band>`, or the bare code for single-channel
    /// instruments.
    pub fn full_band(&self) -> String {
        if self.instrument == self.band {
            self.band.clone()
        } else {
            format!("{}-{}", self.instrument, self.band)
        }
    }
}

/// Errors that can occur during file resolution.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A tile directory exists but cannot be read
    #[error("Cannot read tile directory {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse instrument and band codes from a mosaic filename.
///
/// Applies the product type's [`ParseRule`]: take the segment before
/// `_TILE`, strip the rule's prefix and suffix, then split the remainder on
/// `-`. Returns `None` for names that do not follow the grammar.
pub fn parse_filename(filename: &str, product_type: ProductType) -> Option<ParsedName> {
    let rule = product_type.parse_rule();

    let notile = filename.split("_TILE").next()?;
    let stripped = notile.strip_prefix(rule.prefix)?;
    let stripped = match rule.suffix {
        Some(suffix) => stripped.strip_suffix(suffix)?,
        None => stripped,
    };

    if stripped.is_empty() {
        return None;
    }

    let mut parts = stripped.split('-');
    let first = parts.next()?.to_string();
    let rest: Vec<&str> = parts.collect();

    if rest.is_empty() {
        // Single-channel instrument: band equals the instrument code.
        Some(ParsedName {
            instrument: first.clone(),
            band: first,
        })
    } else {
        Some(ParsedName {
            instrument: first,
            band: rest.join("-"),
        })
    }
}

/// Resolve the files of one product type within a tile.
///
/// Scans `archive_root/<tile_id>/<instrument_dir>/` and returns a map from
/// `<instrument_dir>_<full_band>` to the file path.
///
/// The instrument filter restricts by **directory** name (the physical
/// instrument category); the band filter restricts by the **parsed** full
/// band code, which may carry an instrument-specific prefix - the two
/// names legitimately differ (directory `NISP` holds band `NIR-Y` files).
///
/// A missing tile directory or zero matches yields an empty map: that is
/// a normal "no data" outcome, distinct from an unreadable directory,
/// which is an error.
pub fn resolve(
    archive_root: &Path,
    tile_id: &str,
    product_type: ProductType,
    instruments: Option<&[String]>,
    bands: Option<&[String]>,
) -> Result<BTreeMap<String, PathBuf>, ResolveError> {
    let mut found = BTreeMap::new();

    let tile_dir = archive_root.join(tile_id);
    if !tile_dir.exists() {
        return Ok(found);
    }

    let rule = product_type.parse_rule();
    let search = format!("EUC_MER_{}", rule.search);

    let entries = fs::read_dir(&tile_dir).map_err(|source| ResolveError::Io {
        path: tile_dir.clone(),
        source,
    })?;

    for entry in entries.filter_map(|entry| entry.ok()) {
        let instrument_path = entry.path();
        if !instrument_path.is_dir() {
            continue;
        }
        let instrument_dir = entry.file_name().to_string_lossy().to_string();

        if let Some(filter) = instruments {
            if !filter.iter().any(|name| *name == instrument_dir) {
                continue;
            }
        }

        let files = fs::read_dir(&instrument_path).map_err(|source| ResolveError::Io {
            path: instrument_path.clone(),
            source,
        })?;

        for file in files.filter_map(|entry| entry.ok()) {
            let path = file.path();
            let Some(filename) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };

            if !filename.contains(&search) || !filename.ends_with(".fits") {
                continue;
            }
            if EXCLUDED_TOKENS.iter().any(|token| filename.contains(token)) {
                continue;
            }

            let Some(parsed) = parse_filename(filename, product_type) else {
                continue;
            };

            let full_band = parsed.full_band();
            if let Some(filter) = bands {
                if !filter.iter().any(|band| *band == full_band) {
                    continue;
                }
            }

            found.insert(format!("{instrument_dir}_{full_band}"), path);
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TILE: &str = "102021001";

    fn touch(root: &Path, tile: &str, instrument: &str, filename: &str) {
        let dir = root.join(tile).join(instrument);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(filename), b"").unwrap();
    }

    fn name(body: &str) -> String {
        format!("{body}_TILE{TILE}-C4DE18_20241022T031822.fits")
    }

    #[test]
    fn test_parse_single_channel_instrument() {
        let parsed =
            parse_filename(&name("EUC_MER_BGSUB-MOSAIC-VIS"), ProductType::BgSub).unwrap();
        assert_eq!(parsed.instrument, "VIS");
        assert_eq!(parsed.band, "VIS");
        assert_eq!(parsed.full_band(), "VIS");
    }

    #[test]
    fn test_parse_multi_band_instrument() {
        let parsed =
            parse_filename(&name("EUC_MER_BGSUB-MOSAIC-NIR-Y"), ProductType::BgSub).unwrap();
        assert_eq!(parsed.instrument, "NIR");
        assert_eq!(parsed.band, "Y");
        assert_eq!(parsed.full_band(), "NIR-Y");
    }

    #[test]
    fn test_parse_multi_token_band_rejoined() {
        // Band codes can themselves contain the delimiter.
        let parsed =
            parse_filename(&name("EUC_MER_BGSUB-MOSAIC-DES-G-DEEP"), ProductType::BgSub).unwrap();
        assert_eq!(parsed.instrument, "DES");
        assert_eq!(parsed.band, "G-DEEP");
        assert_eq!(parsed.full_band(), "DES-G-DEEP");
    }

    #[test]
    fn test_parse_flag_and_rms_suffix_products() {
        let parsed = parse_filename(&name("EUC_MER_MOSAIC-VIS-FLAG"), ProductType::Flag).unwrap();
        assert_eq!(parsed.full_band(), "VIS");

        let parsed = parse_filename(&name("EUC_MER_MOSAIC-NIR-J-RMS"), ProductType::Rms).unwrap();
        assert_eq!(parsed.instrument, "NIR");
        assert_eq!(parsed.band, "J");
    }

    #[test]
    fn test_parse_psf_catalog() {
        let parsed =
            parse_filename(&name("EUC_MER_CATALOG-PSF-VIS"), ProductType::CatalogPsf).unwrap();
        assert_eq!(parsed.full_band(), "VIS");
    }

    #[test]
    fn test_parse_rejects_foreign_grammar() {
        assert!(parse_filename(&name("EUC_MER_MOSAIC-VIS-FLAG"), ProductType::BgSub).is_none());
        assert!(parse_filename("not_a_mosaic.fits", ProductType::BgSub).is_none());
    }

    #[test]
    fn test_product_type_tag_roundtrip() {
        for product in ProductType::ALL {
            assert_eq!(ProductType::from_tag(product.tag()), Some(product));
        }
        assert_eq!(ProductType::from_tag("WEIGHT"), None);
    }

    #[test]
    fn test_resolve_missing_tile_dir_is_empty_not_error() {
        let temp = TempDir::new().unwrap();
        let map = resolve(temp.path(), "999999999", ProductType::BgSub, None, None).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_resolve_finds_bands_across_instrument_dirs() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), TILE, "VIS", &name("EUC_MER_BGSUB-MOSAIC-VIS"));
        touch(temp.path(), TILE, "NISP", &name("EUC_MER_BGSUB-MOSAIC-NIR-Y"));
        touch(temp.path(), TILE, "NISP", &name("EUC_MER_BGSUB-MOSAIC-NIR-J"));

        let map = resolve(temp.path(), TILE, ProductType::BgSub, None, None).unwrap();
        let keys: Vec<&String> = map.keys().collect();
        assert_eq!(keys, ["NISP_NIR-J", "NISP_NIR-Y", "VIS_VIS"]);
    }

    #[test]
    fn test_resolve_instrument_filter_uses_directory_name() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), TILE, "VIS", &name("EUC_MER_BGSUB-MOSAIC-VIS"));
        touch(temp.path(), TILE, "NISP", &name("EUC_MER_BGSUB-MOSAIC-NIR-Y"));

        // The directory is NISP even though the parsed instrument code is NIR.
        let instruments = vec!["NISP".to_string()];
        let map = resolve(
            temp.path(),
            TILE,
            ProductType::BgSub,
            Some(&instruments),
            None,
        )
        .unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("NISP_NIR-Y"));
    }

    #[test]
    fn test_resolve_band_filter_uses_parsed_code() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), TILE, "NISP", &name("EUC_MER_BGSUB-MOSAIC-NIR-Y"));
        touch(temp.path(), TILE, "NISP", &name("EUC_MER_BGSUB-MOSAIC-NIR-J"));

        let bands = vec!["NIR-Y".to_string()];
        let map = resolve(temp.path(), TILE, ProductType::BgSub, None, Some(&bands)).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("NISP_NIR-Y"));
    }

    #[test]
    fn test_resolve_excludes_catalog_index_files() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), TILE, "VIS", &name("EUC_MER_BGSUB-MOSAIC-VIS"));
        // Matches the MOSAIC glob but is a catalog index, not an image.
        touch(
            temp.path(),
            TILE,
            "VIS",
            &name("EUC_MER_BGSUB-MOSAIC-FINAL-CAT-VIS"),
        );

        let map = resolve(temp.path(), TILE, ProductType::BgSub, None, None).unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key("VIS_VIS"));
    }

    #[test]
    fn test_resolve_ignores_non_fits_and_unparsable() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), TILE, "VIS", "EUC_MER_BGSUB-MOSAIC-VIS.txt");
        touch(temp.path(), TILE, "VIS", "README.fits");

        let map = resolve(temp.path(), TILE, ProductType::BgSub, None, None).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn test_resolve_rms_does_not_match_flag_files() {
        let temp = TempDir::new().unwrap();
        touch(temp.path(), TILE, "VIS", &name("EUC_MER_MOSAIC-VIS-FLAG"));
        touch(temp.path(), TILE, "VIS", &name("EUC_MER_MOSAIC-VIS-RMS"));

        let map = resolve(temp.path(), TILE, ProductType::Rms, None, None).unwrap();
        assert_eq!(map.len(), 1);
        let path = map.get("VIS_VIS").unwrap();
        assert!(path.to_string_lossy().contains("RMS"));
    }
}
