//! The two-tier cache service.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::cache::{ArtifactFingerprint, CacheError, CacheStats, CacheStatsSnapshot};
use crate::extract::{CutoutArtifact, ExtractError};
use crate::output::{self, ContainerMeta};

/// Which tier served a cached artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    /// Per-run tier, keyed by fingerprint hash
    Ephemeral,
    /// Cross-run tier, keyed by human-readable composite
    Permanent,
}

/// Policy for artifacts whose payload contains invalid values.
///
/// Under [`InvalidPolicy::Skip`] a flagged artifact is treated as no
/// usable result: not cached and not returned as success, even though
/// extraction itself succeeded. Deliberately lossy; consumers that want
/// partial windows opt in with [`InvalidPolicy::Keep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidPolicy {
    /// Reject artifacts containing invalid values
    Skip,
    /// Accept artifacts regardless of invalid values
    Keep,
}

/// Result of a `get_or_compute` call.
#[derive(Debug)]
pub enum CacheOutcome {
    /// Served from a cache tier without invoking the compute closure
    Cached {
        artifact: CutoutArtifact,
        tier: CacheTier,
    },
    /// Computed now (and persisted, if the policy accepted it)
    Fresh { artifact: CutoutArtifact },
    /// Extraction succeeded but the invalid-value policy rejected the
    /// result; nothing was stored
    RejectedInvalid,
    /// Extraction failed; nothing was stored and the next call with this
    /// fingerprint will re-attempt
    Failed(ExtractError),
}

/// Two-tier content-addressed artifact store.
///
/// Lookup order is ephemeral, then permanent; on miss the compute closure
/// runs and an accepted result is persisted to **both** tiers. At most one
/// valid artifact exists per fingerprint, and a second call with the same
/// fingerprint never re-invokes the closure while that artifact remains
/// readable.
///
/// # Example
///
/// ```no_run
/// use starcut::cache::{ArtifactCache, ArtifactFingerprint, InvalidPolicy};
/// # fn compute() -> Result<starcut::extract::CutoutArtifact, starcut::extract::ExtractError> { unimplemented!() }
/// # let fingerprint: ArtifactFingerprint = unimplemented!();
///
/// let cache = ArtifactCache::new("run_cache".into(), "permanent".into())?;
/// let outcome = cache.get_or_compute(&fingerprint, "4251", InvalidPolicy::Skip, compute)?;
/// # Ok::<(), starcut::cache::CacheError>(())
/// ```
pub struct ArtifactCache {
    ephemeral_dir: PathBuf,
    permanent_dir: PathBuf,
    stats: CacheStats,
}

impl ArtifactCache {
    /// Open (or create) the two tier directories.
    ///
    /// An unwritable store root is a [`CacheError`]: the batch cannot
    /// proceed without persistence.
    pub fn new(ephemeral_dir: PathBuf, permanent_dir: PathBuf) -> Result<Self, CacheError> {
        fs::create_dir_all(&ephemeral_dir)?;
        fs::create_dir_all(&permanent_dir)?;
        Ok(Self {
            ephemeral_dir,
            permanent_dir,
            stats: CacheStats::new(),
        })
    }

    /// Serve an artifact from cache, or compute and persist it.
    ///
    /// `compute` runs at most once per call and only on a miss. A tier
    /// entry that exists but cannot be read back falls through to
    /// recomputation - a cache miss never masquerades as a hard failure.
    /// Failed extractions are returned in the outcome and never cached.
    pub fn get_or_compute<F>(
        &self,
        fingerprint: &ArtifactFingerprint,
        target_id: &str,
        policy: InvalidPolicy,
        compute: F,
    ) -> Result<CacheOutcome, CacheError>
    where
        F: FnOnce() -> Result<CutoutArtifact, ExtractError>,
    {
        if let Some(artifact) = self.read_tier(&self.ephemeral_path(fingerprint), fingerprint) {
            self.stats.record_ephemeral_hit();
            return Ok(CacheOutcome::Cached {
                artifact,
                tier: CacheTier::Ephemeral,
            });
        }

        if let Some(artifact) =
            self.read_tier(&self.permanent_path(fingerprint, target_id), fingerprint)
        {
            self.stats.record_permanent_hit();
            return Ok(CacheOutcome::Cached {
                artifact,
                tier: CacheTier::Permanent,
            });
        }

        self.stats.record_miss();
        let artifact = match compute() {
            Ok(artifact) => artifact,
            Err(err) => return Ok(CacheOutcome::Failed(err)),
        };

        if artifact.has_invalid_values && policy == InvalidPolicy::Skip {
            self.stats.record_invalid_rejection();
            debug!("Fingerprint {} rejected by invalid-value policy", fingerprint);
            return Ok(CacheOutcome::RejectedInvalid);
        }

        self.persist(fingerprint, target_id, &artifact)?;
        self.stats.record_write();

        Ok(CacheOutcome::Fresh { artifact })
    }

    /// Whether a valid artifact for this fingerprint exists in any tier.
    pub fn contains(&self, fingerprint: &ArtifactFingerprint, target_id: &str) -> bool {
        self.read_tier(&self.ephemeral_path(fingerprint), fingerprint)
            .is_some()
            || self
                .read_tier(&self.permanent_path(fingerprint, target_id), fingerprint)
                .is_some()
    }

    /// Snapshot of the cache counters.
    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Path of the permanent-tier entry for a fingerprint.
    ///
    /// Layout: `<root>/<instrument>/<product_type>/<target_id>_<instrument>_<product_type>_<band>.fits`.
    /// The key is collision-free across bands and instruments and remains
    /// browsable outside the system.
    pub fn permanent_path(&self, fingerprint: &ArtifactFingerprint, target_id: &str) -> PathBuf {
        self.permanent_dir
            .join(fingerprint.instrument())
            .join(fingerprint.product_type().tag())
            .join(format!(
                "{}_{}_{}_{}.fits",
                target_id,
                fingerprint.instrument(),
                fingerprint.product_type().tag(),
                fingerprint.band()
            ))
    }

    fn ephemeral_path(&self, fingerprint: &ArtifactFingerprint) -> PathBuf {
        self.ephemeral_dir
            .join(format!("{}.fits", fingerprint.hash_hex()))
    }

    /// Read one tier entry, verifying it actually belongs to the
    /// fingerprint. Unreadable or mismatched entries are misses.
    fn read_tier(
        &self,
        path: &Path,
        fingerprint: &ArtifactFingerprint,
    ) -> Option<CutoutArtifact> {
        if !path.exists() {
            return None;
        }

        let container = match output::read_container(path) {
            Ok(container) => container,
            Err(err) => {
                warn!(
                    "Cache entry {} unreadable, recomputing: {}",
                    path.display(),
                    err
                );
                self.stats.record_unreadable_entry();
                return None;
            }
        };

        // The permanent key omits the rounded position and size, so a
        // stored entry could belong to a different request for the same
        // target. The embedded fingerprint disambiguates.
        if container.fingerprint.as_deref() != Some(fingerprint.composite().as_str()) {
            debug!(
                "Cache entry {} belongs to a different fingerprint, ignoring",
                path.display()
            );
            return None;
        }

        container.artifacts.into_iter().next()
    }

    /// Persist an accepted artifact to both tiers.
    fn persist(
        &self,
        fingerprint: &ArtifactFingerprint,
        target_id: &str,
        artifact: &CutoutArtifact,
    ) -> Result<(), CacheError> {
        let composite = fingerprint.composite();
        let meta = ContainerMeta {
            target_id: Some(target_id),
            fingerprint: Some(&composite),
        };

        output::write_container(&self.ephemeral_path(fingerprint), meta, &[artifact], None)?;

        let permanent = self.permanent_path(fingerprint, target_id);
        // Write-once: an existing permanent entry (for another fingerprint
        // of the same target/channel) is never overwritten.
        if !permanent.exists() {
            output::write_container(&permanent, meta, &[artifact], None)?;
        }

        Ok(())
    }
}
