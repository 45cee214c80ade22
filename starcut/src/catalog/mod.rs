//! Source catalog loading and column detection.
//!
//! Catalogs arrive as FITS tables or CSV files with no guaranteed column
//! naming. Position and id columns are resolved through ordered alias
//! lists - a pure function over the available names, first structural
//! match wins - and oversized catalogs are truncated at a configured row
//! cap with an explicit notice, never silently.

use std::path::Path;

use fitsio::hdu::HduInfo;
use fitsio::FitsFile;
use thiserror::Error;
use tracing::{info, warn};

/// Ordered aliases probed for the right ascension column.
pub const RA_ALIASES: [&str; 7] = [
    "RA",
    "TARGET_RA",
    "RA_1",
    "RA_2",
    "ra",
    "Ra",
    "RIGHT_ASCENSION",
];

/// Ordered aliases probed for the declination column.
pub const DEC_ALIASES: [&str; 7] = [
    "DEC",
    "TARGET_DEC",
    "DEC_1",
    "DEC_2",
    "dec",
    "Dec",
    "DECLINATION",
];

/// Ordered aliases probed for the target id column.
pub const ID_ALIASES: [&str; 6] = [
    "OBJECT_ID",
    "TARGETID",
    "TARGET_ID",
    "ID",
    "SOURCE_ID",
    "NUMBER",
];

/// Errors that can occur loading a catalog.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Catalog file does not exist
    #[error("Catalog file not found: {0}")]
    NotFound(String),

    /// Unsupported file extension
    #[error("Unsupported catalog format: {0} (expected .fits, .fit, .csv or .txt)")]
    UnsupportedFormat(String),

    /// FITS read failure
    #[error("Catalog FITS error: {0}")]
    Fits(#[from] fitsio::errors::Error),

    /// CSV read failure
    #[error("Catalog CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// I/O failure
    #[error("Catalog I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No column matched the requested name or any alias
    #[error("No {role} column found; available columns: {available:?}")]
    MissingColumn { role: String, available: Vec<String> },
}

/// One catalog column: numeric where every value parses, text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnData {
    Float(Vec<f64>),
    Text(Vec<String>),
}

/// A named catalog column.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

/// A single field of a catalog row, carried into output containers.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Float(f64),
    Text(String),
}

/// One catalog row, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub fields: Vec<(String, FieldValue)>,
}

/// An in-memory source catalog.
#[derive(Debug, Clone)]
pub struct Catalog {
    columns: Vec<Column>,
    n_rows: usize,
}

impl Catalog {
    /// Load a catalog, dispatching on file extension.
    pub fn read(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Err(CatalogError::NotFound(path.display().to_string()));
        }

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .unwrap_or_default();

        let catalog = match extension.as_str() {
            "fits" | "fit" => Self::read_fits(path),
            "csv" | "txt" => Self::read_csv(path),
            other => Err(CatalogError::UnsupportedFormat(other.to_string())),
        }?;

        info!(
            "Catalog loaded: {} ({} rows, {} columns)",
            path.display(),
            catalog.n_rows,
            catalog.columns.len()
        );
        Ok(catalog)
    }

    fn read_fits(path: &Path) -> Result<Self, CatalogError> {
        let mut fptr = FitsFile::open(path)?;
        let hdu = fptr.hdu(1)?;

        let descriptions = match &hdu.info {
            HduInfo::TableInfo {
                column_descriptions,
                ..
            } => column_descriptions.clone(),
            _ => Vec::new(),
        };

        let mut columns = Vec::with_capacity(descriptions.len());
        let mut n_rows = 0;
        for description in descriptions {
            let name = description.name.clone();
            // Numeric columns read as f64; anything else falls back to text.
            let data = match hdu.read_col::<f64>(&mut fptr, &name) {
                Ok(values) => ColumnData::Float(values),
                Err(_) => match hdu.read_col::<String>(&mut fptr, &name) {
                    Ok(values) => ColumnData::Text(values),
                    Err(err) => {
                        warn!("Catalog column {} skipped: {}", name, err);
                        continue;
                    }
                },
            };
            n_rows = match &data {
                ColumnData::Float(values) => values.len(),
                ColumnData::Text(values) => values.len(),
            };
            columns.push(Column { name, data });
        }

        Ok(Self { columns, n_rows })
    }

    fn read_csv(path: &Path) -> Result<Self, CatalogError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|header| header.to_string())
            .collect();

        let mut cells: Vec<Vec<String>> = vec![Vec::new(); headers.len()];
        for record in reader.records() {
            let record = record?;
            for (index, value) in record.iter().enumerate() {
                if index < cells.len() {
                    cells[index].push(value.to_string());
                }
            }
        }

        let n_rows = cells.first().map(|column| column.len()).unwrap_or(0);
        let columns = headers
            .into_iter()
            .zip(cells)
            .map(|(name, values)| {
                let parsed: Option<Vec<f64>> =
                    values.iter().map(|value| value.parse::<f64>().ok()).collect();
                let data = match parsed {
                    Some(floats) if !floats.is_empty() => ColumnData::Float(floats),
                    _ => ColumnData::Text(values),
                };
                Column { name, data }
            })
            .collect();

        Ok(Self { columns, n_rows })
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.n_rows
    }

    /// Whether the catalog has no rows.
    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    /// Column names, in file order.
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    /// A numeric column by name.
    pub fn float_column(&self, name: &str) -> Option<&[f64]> {
        self.columns.iter().find(|column| column.name == name).and_then(
            |column| match &column.data {
                ColumnData::Float(values) => Some(values.as_slice()),
                ColumnData::Text(_) => None,
            },
        )
    }

    /// A single field value.
    pub fn field(&self, row: usize, name: &str) -> Option<FieldValue> {
        let column = self.columns.iter().find(|column| column.name == name)?;
        match &column.data {
            ColumnData::Float(values) => values.get(row).map(|value| FieldValue::Float(*value)),
            ColumnData::Text(values) => {
                values.get(row).map(|value| FieldValue::Text(value.clone()))
            }
        }
    }

    /// One full row, for attaching to output containers.
    pub fn row(&self, row: usize) -> CatalogRow {
        let fields = self
            .columns
            .iter()
            .filter_map(|column| {
                let value = match &column.data {
                    ColumnData::Float(values) => FieldValue::Float(*values.get(row)?),
                    ColumnData::Text(values) => FieldValue::Text(values.get(row)?.clone()),
                };
                Some((column.name.clone(), value))
            })
            .collect();
        CatalogRow { fields }
    }

    /// Drop rows beyond `max_rows`. Returns whether anything was dropped;
    /// callers must surface the truncation, never swallow it.
    pub fn truncate(&mut self, max_rows: usize) -> bool {
        if self.n_rows <= max_rows {
            return false;
        }
        for column in &mut self.columns {
            match &mut column.data {
                ColumnData::Float(values) => values.truncate(max_rows),
                ColumnData::Text(values) => values.truncate(max_rows),
            }
        }
        warn!(
            "Catalog truncated from {} to {} rows",
            self.n_rows, max_rows
        );
        self.n_rows = max_rows;
        true
    }
}

/// Resolve a logical column against the available names.
///
/// Pure function: tries the preferred name first, then each alias in
/// order; the first structural match wins. Returns `None` when nothing
/// matches - the caller decides whether that is fatal for its role.
pub fn detect_column(
    available: &[&str],
    preferred: Option<&str>,
    aliases: &[&str],
) -> Option<String> {
    if let Some(name) = preferred {
        if available.contains(&name) {
            return Some(name.to_string());
        }
    }
    aliases
        .iter()
        .find(|alias| available.contains(*alias))
        .map(|alias| alias.to_string())
}
