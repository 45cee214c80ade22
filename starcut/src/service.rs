//! High-level service facade.
//!
//! Ties the layers together the way the task front end consumes them:
//! create a task, run it against a catalog, watch its status. The facade
//! owns the tile index and task store; each run gets its own ephemeral
//! cache tier and output directory keyed by task id, while the permanent
//! tier is shared across runs.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::batch::{
    requests_from_catalog, BatchConfig, BatchError, BatchOrchestrator, RequestSpec,
    MAX_FAILURE_SAMPLES,
};
use crate::cache::{ArtifactCache, CacheError, InvalidPolicy};
use crate::catalog::{Catalog, CatalogError};
use crate::config::ServiceConfig;
use crate::task::{StateStore, Task, TaskStatus};
use crate::tile::{TileError, TileIndex};

/// Errors surfaced by the service facade.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Tile index error: {0}")]
    Tile(#[from] TileError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error("Unknown task: {0}")]
    UnknownTask(String),
}

/// The cutout service.
///
/// # Example
///
/// ```no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use starcut::config::ServiceConfig;
/// use starcut::service::CutoutService;
/// use starcut::task::MemoryStateStore;
///
/// let config = ServiceConfig::load(Path::new("starcut.ini"))?;
/// let service = CutoutService::new(config, Arc::new(MemoryStateStore::new()))?;
///
/// let task_id = service.create_task();
/// service.run_task(&task_id, Path::new("sources.fits"), service.default_request_spec())?;
/// println!("{:?}", service.status(&task_id)?);
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct CutoutService {
    config: ServiceConfig,
    index: Arc<TileIndex>,
    store: Arc<dyn StateStore>,
}

impl CutoutService {
    /// Build a service from configuration, loading the tile index.
    pub fn new(config: ServiceConfig, store: Arc<dyn StateStore>) -> Result<Self, ServiceError> {
        let index = Arc::new(TileIndex::load(&config.data.tile_index)?);
        info!("Service ready: {} tiles indexed", index.len());
        Ok(Self {
            config,
            index,
            store,
        })
    }

    /// The loaded configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// The task state store.
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// A request spec seeded with the configured defaults.
    pub fn default_request_spec(&self) -> RequestSpec {
        RequestSpec {
            ra_col: None,
            dec_col: None,
            id_col: None,
            size: crate::extract::WindowSize::Square(128),
            instruments: vec!["VIS".to_string()],
            bands: None,
            product_types: vec![crate::resolve::ProductType::BgSub],
        }
    }

    /// Register a new queued task and return its id.
    pub fn create_task(&self) -> String {
        let task = Task::create();
        let id = task.id.clone();
        self.store.put(task);
        id
    }

    /// Current status of a task.
    pub fn status(&self, task_id: &str) -> Result<Task, ServiceError> {
        self.store
            .get(task_id)
            .ok_or_else(|| ServiceError::UnknownTask(task_id.to_string()))
    }

    /// Request cancellation of a task. Terminal tasks are immune.
    pub fn cancel(&self, task_id: &str) -> Result<bool, ServiceError> {
        let mut changed = false;
        let known = self.store.update(task_id, &mut |task| {
            changed = task.cancel();
        });
        if !known {
            return Err(ServiceError::UnknownTask(task_id.to_string()));
        }
        Ok(changed)
    }

    /// Run a task to completion, synchronously.
    ///
    /// The task's status, progress and final statistics are published
    /// through the state store as the run proceeds. Per-request failures
    /// are reflected in the statistics; an `Err` here means the batch
    /// itself could not proceed, and the task is marked failed.
    pub fn run_task(
        &self,
        task_id: &str,
        catalog_path: &Path,
        spec: RequestSpec,
    ) -> Result<(), ServiceError> {
        if self.store.get(task_id).is_none() {
            return Err(ServiceError::UnknownTask(task_id.to_string()));
        }

        match self.execute(task_id, catalog_path, spec) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.store.update(task_id, &mut |task| {
                    task.fail(format!("Processing failed: {err}"), None);
                });
                Err(err)
            }
        }
    }

    fn execute(
        &self,
        task_id: &str,
        catalog_path: &Path,
        mut spec: RequestSpec,
    ) -> Result<(), ServiceError> {
        if let Some(task) = self.store.get(task_id) {
            if task.status == TaskStatus::Cancelled {
                info!("Task {} already cancelled, skipping", task_id);
                return Ok(());
            }
        }

        self.store.update(task_id, &mut |task| {
            task.set_status(TaskStatus::Processing, "Loading catalog");
            task.set_progress(5, "");
        });

        let mut catalog = Catalog::read(catalog_path)?;
        let max_rows = self.config.limits.max_catalog_rows;
        let truncated = catalog.truncate(max_rows);
        if truncated {
            self.store.update(task_id, &mut |task| {
                task.set_progress(
                    10,
                    format!("Catalog exceeds {max_rows} rows, processing the first {max_rows}"),
                );
            });
        }

        // An unspecified band falls back to the configured default rather
        // than failing the request (preserved service behaviour).
        if spec.bands.is_none() {
            spec.bands = Some(vec![self.config.extract.default_band.clone()]);
        }

        let request_set = requests_from_catalog(&catalog, &spec)?;
        info!(
            "Task {}: {} requests (columns RA={}, Dec={}, id={:?})",
            task_id,
            request_set.requests.len(),
            request_set.ra_col,
            request_set.dec_col,
            request_set.id_col
        );

        if let Some(task) = self.store.get(task_id) {
            if task.status == TaskStatus::Cancelled {
                info!("Task {} cancelled before processing started", task_id);
                return Ok(());
            }
        }

        let cache = Arc::new(ArtifactCache::new(
            self.config.workspace.ephemeral_cache_dir.join(task_id),
            self.config.workspace.permanent_cache_dir.clone(),
        )?);

        let output_dir = self.config.workspace.output_dir.join(task_id);
        let mut batch_config =
            BatchConfig::new(self.config.data.archive_root.clone(), output_dir.clone());
        if self.config.batch.n_workers > 0 {
            batch_config.n_workers = self.config.batch.n_workers;
        }
        batch_config.publish_every = self.config.batch.publish_every;
        batch_config.tolerance_deg = self.config.batch.tolerance_deg;
        batch_config.edge_mode = self.config.extract.edge_mode;
        batch_config.fill_value = self.config.extract.fill_value;
        batch_config.plane_index = self.config.extract.plane_index;
        batch_config.invalid_policy = if self.config.extract.skip_invalid {
            InvalidPolicy::Skip
        } else {
            InvalidPolicy::Keep
        };

        let orchestrator =
            BatchOrchestrator::new(Arc::clone(&self.index), Arc::clone(&cache), batch_config);

        self.store.update(task_id, &mut |task| {
            task.set_progress(30, "Processing");
        });

        // The batch reports 0-100 over its own work; the task bar keeps
        // 0-30 for setup and 90-100 for finalisation.
        let summary = orchestrator.run(&catalog, &request_set.requests, &|update| {
            let mapped = 30 + (update.percent as u32 * 60 / 100) as u8;
            self.store.update(task_id, &mut |task| {
                task.set_progress(mapped, update.message.clone());
            });
        })?;

        let cache_stats = cache.stats();
        info!(
            "Task {}: cache hit rate {:.1}% ({} computed)",
            task_id,
            cache_stats.hit_rate() * 100.0,
            cache_stats.misses
        );

        let mut stats = summary.into_task_stats(truncated);
        stats.total_sources = catalog.len();
        stats.no_tile += request_set.invalid_rows.len();
        for row_index in &request_set.invalid_rows {
            if stats.failure_samples.len() >= MAX_FAILURE_SAMPLES {
                break;
            }
            stats
                .failure_samples
                .push(format!("row {row_index}: invalid sky position"));
        }

        self.store.update(task_id, &mut |task| {
            task.complete(stats.clone(), Some(output_dir.display().to_string()));
        });

        Ok(())
    }
}
