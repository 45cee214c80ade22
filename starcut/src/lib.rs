//! Starcut - batch cutout engine for tile-partitioned sky mosaic archives
//!
//! This library resolves catalogs of sky positions into per-source FITS
//! cutouts pulled from a tile-partitioned mosaic archive, deduplicating
//! extraction work through a two-tier content-addressed cache.
//!
//! # High-Level API
//!
//! For most use cases, the [`service`] module provides a simplified facade:
//!
//! ```ignore
//! use std::sync::Arc;
//! use starcut::config::ServiceConfig;
//! use starcut::service::CutoutService;
//! use starcut::task::MemoryStateStore;
//!
//! let config = ServiceConfig::load("starcut.ini".as_ref())?;
//! let service = CutoutService::new(config, Arc::new(MemoryStateStore::new()))?;
//!
//! let task_id = service.create_task();
//! service.run_task(&task_id, "sources.fits".as_ref(), service.default_request_spec())?;
//! ```
//!
//! The pipeline underneath: [`tile`] resolves positions to tiles,
//! [`resolve`] maps (instrument, band, product type) to archive files,
//! [`extract`] slices pixel windows and PSF stamps, [`cache`] deduplicates
//! the work, and [`batch`] orchestrates tile-grouped concurrent runs.

pub mod batch;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod coord;
pub mod extract;
pub mod logging;
pub mod output;
pub mod resolve;
pub mod service;
pub mod task;
pub mod tile;

/// Version of the starcut library and CLI.
///
/// This is synchronized across all components in the workspace.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
