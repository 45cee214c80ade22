//! Service configuration.
//!
//! All tunables live in one validated, explicitly-typed structure with
//! named sections and defaults - never an untyped mapping threaded
//! through the layers. Values load from an INI file; anything absent
//! keeps its default, anything present but malformed is a hard error.

mod parser;
mod settings;

pub use settings::{
    BatchSettings, DataSettings, ExtractSettings, LimitSettings, LoggingSettings,
    ServiceConfig, WorkspaceSettings,
};

use std::path::Path;

use ini::Ini;
use thiserror::Error;

/// Errors that can occur loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file missing or unreadable
    #[error("Cannot read config file: {0}")]
    Read(#[from] ini::Error),

    /// A key holds a value that cannot be used
    #[error("Invalid config value [{section}] {key} = '{value}': {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },
}

impl ServiceConfig {
    /// Load configuration from an INI file, overlaying the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path)?;
        parser::parse_ini(&ini)
    }

    /// Parse configuration from an INI string. Used by tests and by
    /// embedded defaults.
    pub fn from_ini_str(contents: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(contents).map_err(ini::Error::Parse)?;
        parser::parse_ini(&ini)
    }
}
