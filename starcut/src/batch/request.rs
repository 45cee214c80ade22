//! Source requests and their construction from a catalog.

use tracing::warn;

use crate::catalog::{self, Catalog, CatalogError, FieldValue};
use crate::coord::SkyCoord;
use crate::extract::WindowSize;
use crate::resolve::ProductType;

/// One catalog source to extract.
#[derive(Debug, Clone)]
pub struct SourceRequest {
    /// Target sky position
    pub position: SkyCoord,
    /// Requested window dimensions
    pub size: WindowSize,
    /// Identifier used in output names and the permanent cache key
    pub target_id: String,
    /// Row index in the originating catalog
    pub row_index: usize,
    /// Instrument directories to extract from
    pub instruments: Vec<String>,
    /// Band filter; `None` extracts every band present
    pub bands: Option<Vec<String>>,
    /// Product types to extract
    pub product_types: Vec<ProductType>,
}

/// Request-construction parameters for one batch.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    /// Explicit RA column name; auto-detected when `None`
    pub ra_col: Option<String>,
    /// Explicit Dec column name; auto-detected when `None`
    pub dec_col: Option<String>,
    /// Explicit id column name; auto-detected when `None`
    pub id_col: Option<String>,
    pub size: WindowSize,
    pub instruments: Vec<String>,
    pub bands: Option<Vec<String>>,
    pub product_types: Vec<ProductType>,
}

/// Requests built from a catalog, plus the rows that could not become one.
#[derive(Debug)]
pub struct RequestSet {
    pub requests: Vec<SourceRequest>,
    /// Row indices with non-finite or out-of-range positions; reported as
    /// unresolved, never silently dropped
    pub invalid_rows: Vec<usize>,
    /// Resolved column names, for logging
    pub ra_col: String,
    pub dec_col: String,
    pub id_col: Option<String>,
}

/// Build one request per catalog row.
///
/// Position columns resolve through the ordered alias lists; a missing
/// position column is fatal, a missing id column falls back to the
/// deterministic `ra_<ra>_dec_<dec>` identifier per row (as does a row
/// whose id value is masked).
pub fn requests_from_catalog(
    catalog: &Catalog,
    spec: &RequestSpec,
) -> Result<RequestSet, CatalogError> {
    let available = catalog.column_names();

    let ra_col = catalog::detect_column(&available, spec.ra_col.as_deref(), &catalog::RA_ALIASES)
        .ok_or_else(|| CatalogError::MissingColumn {
            role: "RA".to_string(),
            available: available.iter().map(|name| name.to_string()).collect(),
        })?;
    let dec_col =
        catalog::detect_column(&available, spec.dec_col.as_deref(), &catalog::DEC_ALIASES)
            .ok_or_else(|| CatalogError::MissingColumn {
                role: "Dec".to_string(),
                available: available.iter().map(|name| name.to_string()).collect(),
            })?;
    let id_col = catalog::detect_column(&available, spec.id_col.as_deref(), &catalog::ID_ALIASES);

    let ras = catalog
        .float_column(&ra_col)
        .ok_or_else(|| CatalogError::MissingColumn {
            role: "numeric RA".to_string(),
            available: available.iter().map(|name| name.to_string()).collect(),
        })?;
    let decs = catalog
        .float_column(&dec_col)
        .ok_or_else(|| CatalogError::MissingColumn {
            role: "numeric Dec".to_string(),
            available: available.iter().map(|name| name.to_string()).collect(),
        })?;

    let mut requests = Vec::with_capacity(catalog.len());
    let mut invalid_rows = Vec::new();

    for (row_index, (&ra, &dec)) in ras.iter().zip(decs).enumerate() {
        let position = match SkyCoord::new(ra, dec) {
            Ok(position) => position,
            Err(err) => {
                warn!("Catalog row {}: {}", row_index, err);
                invalid_rows.push(row_index);
                continue;
            }
        };

        let target_id = id_col
            .as_deref()
            .and_then(|column| catalog.field(row_index, column))
            .and_then(format_target_id)
            .unwrap_or_else(|| fallback_target_id(ra, dec));

        requests.push(SourceRequest {
            position,
            size: spec.size,
            target_id,
            row_index,
            instruments: spec.instruments.clone(),
            bands: spec.bands.clone(),
            product_types: spec.product_types.clone(),
        });
    }

    Ok(RequestSet {
        requests,
        invalid_rows,
        ra_col,
        dec_col,
        id_col,
    })
}

/// Deterministic identifier for rows without a usable id value.
fn fallback_target_id(ra: f64, dec: f64) -> String {
    format!("ra_{ra:.6}_dec_{dec:.6}")
}

/// Render an id field as a path-safe string; masked values yield `None`.
fn format_target_id(value: FieldValue) -> Option<String> {
    match value {
        FieldValue::Float(number) if number.is_finite() => {
            if number.fract() == 0.0 && number.abs() < 1e15 {
                Some(format!("{number:.0}"))
            } else {
                Some(number.to_string())
            }
        }
        FieldValue::Float(_) => None,
        FieldValue::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.replace(['/', ' '], "_"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn spec() -> RequestSpec {
        RequestSpec {
            ra_col: None,
            dec_col: None,
            id_col: None,
            size: WindowSize::Square(64),
            instruments: vec!["VIS".to_string()],
            bands: None,
            product_types: vec![ProductType::BgSub],
        }
    }

    fn catalog_from(contents: &str) -> (TempDir, Catalog) {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("catalog.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let catalog = Catalog::read(&path).unwrap();
        (temp, catalog)
    }

    #[test]
    fn test_requests_use_detected_columns() {
        let (_temp, catalog) = catalog_from("RA_2,DEC_2,OBJECT_ID\n150.1,2.2,42\n150.2,2.3,43\n");
        let set = requests_from_catalog(&catalog, &spec()).unwrap();

        assert_eq!(set.ra_col, "RA_2");
        assert_eq!(set.dec_col, "DEC_2");
        assert_eq!(set.id_col.as_deref(), Some("OBJECT_ID"));
        assert_eq!(set.requests.len(), 2);
        assert_eq!(set.requests[0].target_id, "42");
    }

    #[test]
    fn test_missing_position_column_is_fatal() {
        let (_temp, catalog) = catalog_from("FLUX,MAG\n1.0,2.0\n");
        let result = requests_from_catalog(&catalog, &spec());
        assert!(matches!(result, Err(CatalogError::MissingColumn { .. })));
    }

    #[test]
    fn test_missing_id_column_falls_back_to_position() {
        let (_temp, catalog) = catalog_from("RA,DEC\n150.1,2.2\n");
        let set = requests_from_catalog(&catalog, &spec()).unwrap();
        assert_eq!(set.requests[0].target_id, "ra_150.100000_dec_2.200000");
    }

    #[test]
    fn test_invalid_positions_reported_not_dropped() {
        let (_temp, catalog) = catalog_from("RA,DEC\n150.1,2.2\n999.0,2.3\n150.3,2.4\n");
        let set = requests_from_catalog(&catalog, &spec()).unwrap();

        assert_eq!(set.requests.len(), 2);
        assert_eq!(set.invalid_rows, [1]);
    }

    #[test]
    fn test_integer_valued_float_ids_render_clean() {
        let (_temp, catalog) = catalog_from("RA,DEC,ID\n150.1,2.2,1234567\n");
        let set = requests_from_catalog(&catalog, &spec()).unwrap();
        assert_eq!(set.requests[0].target_id, "1234567");
    }

    #[test]
    fn test_text_ids_are_path_safe() {
        assert_eq!(
            format_target_id(FieldValue::Text("J1234 +56/78".to_string())),
            Some("J1234_+56_78".to_string())
        );
        assert_eq!(format_target_id(FieldValue::Text("  ".to_string())), None);
        assert_eq!(format_target_id(FieldValue::Float(f64::NAN)), None);
    }
}
