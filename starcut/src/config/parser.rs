//! INI parsing logic for converting `Ini` → `ServiceConfig`.
//!
//! The single place where INI key names are mapped to struct fields.
//! Starts from `ServiceConfig::default()` and overlays any values found.

use std::path::PathBuf;
use std::str::FromStr;

use ini::Ini;

use super::{ConfigError, ServiceConfig};
use crate::extract::EdgeMode;

/// Parse an `Ini` object into a `ServiceConfig`.
pub(super) fn parse_ini(ini: &Ini) -> Result<ServiceConfig, ConfigError> {
    let mut config = ServiceConfig::default();

    if let Some(section) = ini.section(Some("data")) {
        if let Some(value) = section.get("archive_root") {
            config.data.archive_root = PathBuf::from(value.trim());
        }
        if let Some(value) = section.get("tile_index") {
            config.data.tile_index = PathBuf::from(value.trim());
        }
    }

    if let Some(section) = ini.section(Some("workspace")) {
        if let Some(value) = section.get("ephemeral_cache_dir") {
            config.workspace.ephemeral_cache_dir = PathBuf::from(value.trim());
        }
        if let Some(value) = section.get("permanent_cache_dir") {
            config.workspace.permanent_cache_dir = PathBuf::from(value.trim());
        }
        if let Some(value) = section.get("output_dir") {
            config.workspace.output_dir = PathBuf::from(value.trim());
        }
    }

    if let Some(section) = ini.section(Some("limits")) {
        if let Some(value) = section.get("max_catalog_rows") {
            config.limits.max_catalog_rows = parse_number(value, "limits", "max_catalog_rows")?;
        }
    }

    if let Some(section) = ini.section(Some("batch")) {
        if let Some(value) = section.get("n_workers") {
            config.batch.n_workers = parse_number(value, "batch", "n_workers")?;
        }
        if let Some(value) = section.get("publish_every") {
            let parsed: usize = parse_number(value, "batch", "publish_every")?;
            if parsed == 0 {
                return Err(invalid("batch", "publish_every", value, "must be at least 1"));
            }
            config.batch.publish_every = parsed;
        }
        if let Some(value) = section.get("tolerance_deg") {
            let parsed: f64 = parse_number(value, "batch", "tolerance_deg")?;
            if !(0.0..=1.0).contains(&parsed) {
                return Err(invalid(
                    "batch",
                    "tolerance_deg",
                    value,
                    "must be between 0 and 1 degree",
                ));
            }
            config.batch.tolerance_deg = parsed;
        }
    }

    if let Some(section) = ini.section(Some("extract")) {
        if let Some(value) = section.get("edge_mode") {
            config.extract.edge_mode = match value.to_lowercase().as_str() {
                "fill" => EdgeMode::Fill,
                "trim" => EdgeMode::Trim,
                "strict" => EdgeMode::Strict,
                _ => {
                    return Err(invalid(
                        "extract",
                        "edge_mode",
                        value,
                        "must be one of: fill, trim, strict",
                    ))
                }
            };
        }
        if let Some(value) = section.get("fill_value") {
            config.extract.fill_value = parse_number(value, "extract", "fill_value")?;
        }
        if let Some(value) = section.get("plane_index") {
            config.extract.plane_index = parse_number(value, "extract", "plane_index")?;
        }
        if let Some(value) = section.get("skip_invalid") {
            config.extract.skip_invalid = parse_bool(value, "extract", "skip_invalid")?;
        }
        if let Some(value) = section.get("default_band") {
            let value = value.trim();
            if !value.is_empty() {
                config.extract.default_band = value.to_string();
            }
        }
    }

    if let Some(section) = ini.section(Some("logging")) {
        if let Some(value) = section.get("directory") {
            config.logging.directory = value.trim().to_string();
        }
        if let Some(value) = section.get("file") {
            config.logging.file = value.trim().to_string();
        }
    }

    Ok(config)
}

fn parse_number<T: FromStr>(value: &str, section: &str, key: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| invalid(section, key, value, "not a valid number"))
}

fn parse_bool(value: &str, section: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "yes" | "1" | "on" => Ok(true),
        "false" | "no" | "0" | "off" => Ok(false),
        _ => Err(invalid(section, key, value, "not a valid boolean")),
    }
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
