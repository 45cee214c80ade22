//! The batch orchestrator and its worker pool.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tracing::{debug, info, warn};

use crate::batch::{
    BatchError, BatchSummary, ProgressAggregator, ProgressUpdate, SourceRequest,
};
use crate::cache::{ArtifactCache, ArtifactFingerprint, CacheOutcome, InvalidPolicy};
use crate::catalog::Catalog;
use crate::extract::{self, CutoutArtifact, EdgeMode, DEFAULT_FILL_VALUE};
use crate::output::{self, ContainerMeta};
use crate::resolve::{self, ProductType};
use crate::tile::{TileIndex, DEFAULT_TOLERANCE_DEG};

/// Per-tile file-resolution cache, local to one worker.
type FileCache = HashMap<ProductType, BTreeMap<String, PathBuf>>;

/// Batch execution parameters.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Mosaic archive root (`root/<tile_id>/<instrument_dir>/...`)
    pub archive_root: PathBuf,
    /// Output root for per-source containers
    pub output_dir: PathBuf,
    /// Tile lookup tolerance in degrees
    pub tolerance_deg: f64,
    /// Worker pool size
    pub n_workers: usize,
    /// HDU index of the image plane in mosaic files
    pub plane_index: usize,
    /// Out-of-bounds policy for windows
    pub edge_mode: EdgeMode,
    /// Padding value under fill mode
    pub fill_value: f64,
    /// Invalid-value policy applied at the cache boundary
    pub invalid_policy: InvalidPolicy,
    /// Attach the source's catalog row to its first product container
    pub attach_catalog_row: bool,
    /// Publish progress every N completed requests
    pub publish_every: usize,
}

impl BatchConfig {
    /// Configuration with the defaults the service uses.
    pub fn new(archive_root: PathBuf, output_dir: PathBuf) -> Self {
        Self {
            archive_root,
            output_dir,
            tolerance_deg: DEFAULT_TOLERANCE_DEG,
            n_workers: thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            plane_index: 0,
            edge_mode: EdgeMode::Fill,
            fill_value: DEFAULT_FILL_VALUE,
            invalid_policy: InvalidPolicy::Skip,
            attach_catalog_row: true,
            publish_every: 8,
        }
    }

    /// Set the worker pool size.
    pub fn with_workers(mut self, n_workers: usize) -> Self {
        self.n_workers = n_workers;
        self
    }

    /// Set the invalid-value policy.
    pub fn with_invalid_policy(mut self, policy: InvalidPolicy) -> Self {
        self.invalid_policy = policy;
        self
    }

    /// Set the edge mode.
    pub fn with_edge_mode(mut self, edge_mode: EdgeMode) -> Self {
        self.edge_mode = edge_mode;
        self
    }
}

/// Tile-grouped concurrent batch runner.
///
/// Groups requests by resolved tile id and processes one tile group per
/// worker at a time. Within a group, requests run sequentially against a
/// worker-local file-resolution cache, so each tile's directories are
/// scanned once per product type instead of once per request. Workers
/// share only the progress aggregator.
pub struct BatchOrchestrator {
    index: Arc<TileIndex>,
    cache: Arc<ArtifactCache>,
    config: BatchConfig,
}

impl BatchOrchestrator {
    pub fn new(index: Arc<TileIndex>, cache: Arc<ArtifactCache>, config: BatchConfig) -> Self {
        Self {
            index,
            cache,
            config,
        }
    }

    /// Run a batch to completion.
    ///
    /// Per-request failures are recorded in the summary and never abort
    /// the run; a [`BatchError`] is returned only for resource faults
    /// that make further persistence impossible.
    ///
    /// `on_progress` receives throttled progress updates; it is invoked
    /// outside the aggregator lock.
    pub fn run(
        &self,
        catalog: &Catalog,
        requests: &[SourceRequest],
        on_progress: &(dyn Fn(ProgressUpdate) + Sync),
    ) -> Result<BatchSummary, BatchError> {
        let aggregator = ProgressAggregator::new(requests.len(), self.config.publish_every);

        // Group by tile; unresolved positions go to a reported bucket.
        let mut groups: BTreeMap<String, Vec<&SourceRequest>> = BTreeMap::new();
        let mut unresolved: Vec<&SourceRequest> = Vec::new();
        for request in requests {
            match self.index.lookup(
                request.position.ra,
                request.position.dec,
                self.config.tolerance_deg,
            ) {
                Some(tile_id) => groups.entry(tile_id.to_string()).or_default().push(request),
                None => unresolved.push(request),
            }
        }

        info!(
            "Batch: {} requests in {} tile groups, {} unresolved",
            requests.len(),
            groups.len(),
            unresolved.len()
        );

        for request in unresolved {
            aggregator.record_no_tile(&request.target_id, &request.product_types);
            if let Some(update) = aggregator.complete_request() {
                on_progress(update);
            }
        }

        if !groups.is_empty() {
            self.run_pool(catalog, groups, &aggregator, on_progress)?;
        }

        Ok(aggregator.summary())
    }

    /// Dispatch tile groups to the bounded worker pool.
    fn run_pool(
        &self,
        catalog: &Catalog,
        groups: BTreeMap<String, Vec<&SourceRequest>>,
        aggregator: &ProgressAggregator,
        on_progress: &(dyn Fn(ProgressUpdate) + Sync),
    ) -> Result<(), BatchError> {
        let n_workers = self.config.n_workers.max(1).min(groups.len());

        let (sender, receiver) = mpsc::channel();
        for group in groups {
            sender.send(group).expect("queueing tile groups cannot fail");
        }
        drop(sender);

        let receiver = Mutex::new(receiver);
        let fatal: Mutex<Option<BatchError>> = Mutex::new(None);
        let abort = AtomicBool::new(false);

        thread::scope(|scope| {
            for _ in 0..n_workers {
                scope.spawn(|| loop {
                    if abort.load(Ordering::Relaxed) {
                        break;
                    }
                    // All groups are queued up front, so this never blocks:
                    // it yields a group or reports the queue exhausted.
                    let job = receiver.lock().unwrap().recv();
                    let Ok((tile_id, group)) = job else {
                        break;
                    };

                    debug!("Worker took tile {} ({} requests)", tile_id, group.len());
                    if let Err(err) =
                        self.process_group(catalog, &tile_id, &group, aggregator, on_progress, &abort)
                    {
                        warn!("Batch aborting on resource failure: {}", err);
                        *fatal.lock().unwrap() = Some(err);
                        abort.store(true, Ordering::Relaxed);
                        break;
                    }
                });
            }
        });

        match fatal.into_inner().unwrap() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Process one tile group sequentially with a group-local file cache.
    fn process_group(
        &self,
        catalog: &Catalog,
        tile_id: &str,
        group: &[&SourceRequest],
        aggregator: &ProgressAggregator,
        on_progress: &(dyn Fn(ProgressUpdate) + Sync),
        abort: &AtomicBool,
    ) -> Result<(), BatchError> {
        let mut file_cache: FileCache = HashMap::new();
        let mut tile_lost = false;

        for request in group {
            if abort.load(Ordering::Relaxed) {
                return Ok(());
            }

            if tile_lost {
                // Coarse cancellation: the tile's directory vanished, so
                // the remaining requests of this group are marked failed
                // without touching the filesystem again.
                for product in &request.product_types {
                    aggregator.record_outcome(*product, false);
                }
                aggregator.record_failure_sample(format!(
                    "{}: tile {} became unavailable",
                    request.target_id, tile_id
                ));
            } else {
                self.process_request(
                    catalog,
                    tile_id,
                    request,
                    &mut file_cache,
                    aggregator,
                    &mut tile_lost,
                )?;
            }

            if let Some(update) = aggregator.complete_request() {
                on_progress(update);
            }
        }

        Ok(())
    }

    /// Process one request: every (instrument × product type × band)
    /// combination independently.
    fn process_request(
        &self,
        catalog: &Catalog,
        tile_id: &str,
        request: &SourceRequest,
        file_cache: &mut FileCache,
        aggregator: &ProgressAggregator,
        tile_lost: &mut bool,
    ) -> Result<(), BatchError> {
        let first_product = request.product_types.first().copied();

        for &product in &request.product_types {
            // Resolve this product's files once per tile group.
            if !file_cache.contains_key(&product) {
                let instruments = if request.instruments.is_empty() {
                    None
                } else {
                    Some(request.instruments.as_slice())
                };
                match resolve::resolve(
                    &self.config.archive_root,
                    tile_id,
                    product,
                    instruments,
                    request.bands.as_deref(),
                ) {
                    Ok(map) => {
                        file_cache.insert(product, map);
                    }
                    Err(err) => {
                        warn!("Tile {} resolution failed mid-run: {}", tile_id, err);
                        *tile_lost = true;
                        for &remaining in request
                            .product_types
                            .iter()
                            .skip_while(|candidate| **candidate != product)
                        {
                            aggregator.record_outcome(remaining, false);
                        }
                        aggregator.record_failure_sample(format!(
                            "{}: tile {} became unreadable ({})",
                            request.target_id, tile_id, err
                        ));
                        return Ok(());
                    }
                }
            }
            let files = &file_cache[&product];

            if files.is_empty() {
                aggregator.record_outcome(product, false);
                aggregator.record_failure_sample(format!(
                    "{}: no {} files in tile {}",
                    request.target_id, product, tile_id
                ));
                continue;
            }

            let mut artifacts: Vec<CutoutArtifact> = Vec::new();
            for (channel_key, path) in files {
                let (instrument, band) = match channel_key.split_once('_') {
                    Some(parts) => parts,
                    None => (channel_key.as_str(), channel_key.as_str()),
                };

                let fingerprint = ArtifactFingerprint::new(
                    &request.position,
                    request.size,
                    instrument,
                    product,
                    band,
                );

                let outcome = self.cache.get_or_compute(
                    &fingerprint,
                    &request.target_id,
                    self.config.invalid_policy,
                    || {
                        let artifact = if product.is_stamp_product() {
                            extract::extract_nearest_stamp(path, &request.position)?
                        } else {
                            extract::extract_window(
                                path,
                                &request.position,
                                request.size,
                                self.config.plane_index,
                                self.config.edge_mode,
                                self.config.fill_value,
                            )?
                        };
                        Ok(artifact.with_channel(instrument, band))
                    },
                )?;

                match outcome {
                    CacheOutcome::Cached { artifact, .. } => {
                        aggregator.record_cache_hit();
                        artifacts.push(artifact);
                    }
                    CacheOutcome::Fresh { artifact } => artifacts.push(artifact),
                    CacheOutcome::RejectedInvalid => {
                        // Policy-rejected, not an error: the combination
                        // simply yields no artifact.
                        debug!(
                            "{} {} {}: rejected by invalid-value policy",
                            request.target_id, product, channel_key
                        );
                    }
                    CacheOutcome::Failed(err) => {
                        aggregator.record_failure_sample(format!(
                            "{} {} {}: {}",
                            request.target_id, product, channel_key, err
                        ));
                    }
                }
            }

            if artifacts.is_empty() {
                aggregator.record_outcome(product, false);
                continue;
            }

            let container_path = self
                .config
                .output_dir
                .join(product.tag())
                .join(format!("{}.fits", request.target_id));
            let catalog_row = if self.config.attach_catalog_row && Some(product) == first_product
            {
                Some(catalog.row(request.row_index))
            } else {
                None
            };
            let artifact_refs: Vec<&CutoutArtifact> = artifacts.iter().collect();
            output::write_container(
                &container_path,
                ContainerMeta {
                    target_id: Some(&request.target_id),
                    fingerprint: None,
                },
                &artifact_refs,
                catalog_row.as_ref(),
            )?;

            aggregator.record_outcome(product, true);
        }

        Ok(())
    }
}
