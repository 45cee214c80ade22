//! Two-tier artifact cache.
//!
//! Extraction is the expensive step, and overlapping request sets hit the
//! same (position, size, channel) combinations again and again. The cache
//! deduplicates that work behind a canonical fingerprint:
//!
//! 1. **Ephemeral tier** - per-run directory keyed by the fingerprint
//!    hash; fast lookups within a batch.
//! 2. **Permanent tier** - human-readable keys
//!    (`<target_id>_<instrument>_<product_type>_<band>`), intended to
//!    persist and serve future runs with overlapping requests, and to be
//!    browsable outside the system.
//!
//! Only successful extractions that pass the invalid-value policy are
//! persisted; failures are never cached (every retry re-attempts), and a
//! tier whose backing file turns out unreadable falls through to
//! recomputation instead of surfacing an error.

mod fingerprint;
mod service;
mod stats;

pub use fingerprint::ArtifactFingerprint;
pub use service::{ArtifactCache, CacheOutcome, CacheTier, InvalidPolicy};
pub use stats::{CacheStats, CacheStatsSnapshot};

use thiserror::Error;

use crate::output::OutputError;

/// Cache store errors.
///
/// These indicate the store itself is unusable (unwritable directory,
/// failed persist) - the one failure class that escalates to whole-batch
/// failure, since nothing further can be persisted.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Cache directory cannot be created or written
    #[error("Cache store I/O error: {0}")]
    Store(#[from] std::io::Error),

    /// Artifact serialization failed
    #[error("Cache persist error: {0}")]
    Persist(#[from] OutputError),
}
