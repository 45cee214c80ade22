//! Tile-grouped batch orchestration.
//!
//! A batch turns a catalog of sky positions into per-source output
//! containers. The orchestrator resolves every request's tile, groups the
//! requests by tile id - so all requests sharing a tile reuse one
//! worker-local file-resolution cache instead of re-scanning directories
//! per request - and dispatches tile groups to a bounded pool of worker
//! threads. Workers share nothing mutable except the lock-guarded
//! progress aggregator.
//!
//! Per-request failures are recorded and never unwind the batch; only
//! resource-level faults (unwritable cache or output store) abort it.

mod orchestrator;
mod progress;
mod request;

pub use orchestrator::{BatchConfig, BatchOrchestrator};
pub use progress::{BatchSummary, ProgressAggregator, ProgressUpdate, MAX_FAILURE_SAMPLES};
pub use request::{requests_from_catalog, RequestSet, RequestSpec, SourceRequest};

use thiserror::Error;

use crate::cache::CacheError;
use crate::output::OutputError;

/// Whole-batch failures.
///
/// Everything else - unresolved tiles, missing files, failed extractions,
/// policy-rejected artifacts - is recorded per request and reported in
/// the summary.
#[derive(Debug, Error)]
pub enum BatchError {
    /// The cache store became unusable
    #[error("Batch aborted: {0}")]
    Cache(#[from] CacheError),

    /// The output location became unusable
    #[error("Batch aborted: {0}")]
    Output(#[from] OutputError),
}
