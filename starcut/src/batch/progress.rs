//! Shared batch progress and statistics aggregation.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::resolve::ProductType;
use crate::task::{ProductCounts, TaskStats};

/// Cap on retained failure reasons. Failures beyond the cap are still
/// counted, just not sampled.
pub const MAX_FAILURE_SAMPLES: usize = 10;

/// A throttled progress publication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Percent of requests processed, 0–100
    pub percent: u8,
    /// Human-readable progress line
    pub message: String,
}

/// Final structured result of a batch.
///
/// Produced even on a fully successful run; whole-batch failure is
/// reserved for resource faults.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    /// Requests handed to the orchestrator
    pub total_requests: usize,
    /// Requests processed (including failures)
    pub processed: usize,
    /// Requests that resolved to no tile
    pub no_tile: usize,
    /// Per-product-type outcome counts
    pub per_product: BTreeMap<String, ProductCounts>,
    /// Bounded sample of failure reasons
    pub failure_samples: Vec<String>,
    /// Extractions served from a cache tier
    pub cache_hits: u64,
}

impl BatchSummary {
    /// Convert into the task-facing statistics record.
    pub fn into_task_stats(self, truncated: bool) -> TaskStats {
        TaskStats {
            total_sources: self.total_requests,
            no_tile: self.no_tile,
            truncated,
            per_product: self.per_product,
            failure_samples: self.failure_samples,
            cache_hits: self.cache_hits,
        }
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    processed: usize,
    no_tile: usize,
    per_product: BTreeMap<String, ProductCounts>,
    failure_samples: Vec<String>,
    cache_hits: u64,
    since_publication: usize,
}

/// The sole cross-worker shared mutable state of a batch.
///
/// One mutex guards plain counters; every critical section is an
/// increment or a small map update, never I/O. Publication is throttled:
/// [`ProgressAggregator::complete_request`] only materialises an update
/// every `publish_every` completions (and on the final one), so the lock
/// does not dominate wall-clock time under high request counts.
#[derive(Debug)]
pub struct ProgressAggregator {
    state: Mutex<ProgressState>,
    total_requests: usize,
    publish_every: usize,
}

impl ProgressAggregator {
    /// Create an aggregator for a batch of `total_requests`.
    pub fn new(total_requests: usize, publish_every: usize) -> Self {
        Self {
            state: Mutex::new(ProgressState::default()),
            total_requests,
            publish_every: publish_every.max(1),
        }
    }

    /// Record a request whose position resolved to no tile. Counts a
    /// failure for each product type it asked for.
    pub fn record_no_tile(&self, target_id: &str, product_types: &[ProductType]) {
        let mut state = self.state.lock().unwrap();
        state.no_tile += 1;
        for product in product_types {
            state.per_product.entry(product.tag().to_string()).or_default().failed += 1;
        }
        if state.failure_samples.len() < MAX_FAILURE_SAMPLES {
            state
                .failure_samples
                .push(format!("{target_id}: no tile covers this position"));
        }
    }

    /// Record one product-type outcome for one request.
    pub fn record_outcome(&self, product: ProductType, success: bool) {
        let mut state = self.state.lock().unwrap();
        let counts = state.per_product.entry(product.tag().to_string()).or_default();
        if success {
            counts.success += 1;
        } else {
            counts.failed += 1;
        }
    }

    /// Record an extraction served from cache.
    pub fn record_cache_hit(&self) {
        self.state.lock().unwrap().cache_hits += 1;
    }

    /// Retain a failure reason, up to the cap.
    pub fn record_failure_sample(&self, sample: String) {
        let mut state = self.state.lock().unwrap();
        if state.failure_samples.len() < MAX_FAILURE_SAMPLES {
            state.failure_samples.push(sample);
        }
    }

    /// Mark one request fully processed.
    ///
    /// Returns a publication every `publish_every` completions and on the
    /// last one; callers invoke their progress hook outside the lock.
    pub fn complete_request(&self) -> Option<ProgressUpdate> {
        let mut state = self.state.lock().unwrap();
        state.processed += 1;
        state.since_publication += 1;

        let done = state.processed >= self.total_requests;
        if !done && state.since_publication < self.publish_every {
            return None;
        }
        state.since_publication = 0;

        let percent = if self.total_requests == 0 {
            100
        } else {
            ((state.processed * 100) / self.total_requests).min(100) as u8
        };
        Some(ProgressUpdate {
            percent,
            message: format!("Processing: {}/{}", state.processed, self.total_requests),
        })
    }

    /// Snapshot the final summary.
    pub fn summary(&self) -> BatchSummary {
        let state = self.state.lock().unwrap();
        BatchSummary {
            total_requests: self.total_requests,
            processed: state.processed,
            no_tile: state.no_tile,
            per_product: state.per_product.clone(),
            failure_samples: state.failure_samples.clone(),
            cache_hits: state.cache_hits,
        }
    }
}
