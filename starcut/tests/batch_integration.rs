//! End-to-end batch tests over a synthetic tile archive.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fitsio::images::{ImageDescription, ImageType};
use fitsio::FitsFile;
use tempfile::TempDir;

use starcut::batch::{BatchConfig, BatchOrchestrator, RequestSpec, SourceRequest};
use starcut::cache::{ArtifactCache, InvalidPolicy};
use starcut::catalog::Catalog;
use starcut::config::ServiceConfig;
use starcut::coord::SkyCoord;
use starcut::extract::WindowSize;
use starcut::output;
use starcut::resolve::ProductType;
use starcut::service::CutoutService;
use starcut::task::{MemoryStateStore, TaskStatus};
use starcut::tile::{TileIndex, TileRecord};

const TILE: &str = "102021001";
const SCALE: f64 = 0.001;

/// Archive fixture: one tile with a VIS background-subtracted mosaic
/// covering a small box around (150.1, 2.2).
struct Fixture {
    temp: TempDir,
    archive_root: PathBuf,
    index_path: PathBuf,
}

fn fixture() -> Fixture {
    let temp = TempDir::new().unwrap();
    let archive_root = temp.path().join("MER");

    let mosaic_dir = archive_root.join(TILE).join("VIS");
    std::fs::create_dir_all(&mosaic_dir).unwrap();
    write_mosaic(&mosaic_dir.join(format!(
        "EUC_MER_BGSUB-MOSAIC-VIS_TILE{TILE}-A1B2C3_20241022T031822.fits"
    )));

    let record = TileRecord {
        tile_id: TILE.to_string(),
        ra_min: 150.05,
        ra_max: 150.15,
        dec_min: 2.15,
        dec_max: 2.25,
        ra_center: 150.1,
        dec_center: 2.2,
        n_objects: 100,
    };
    let index = TileIndex::from_records(vec![record]).unwrap();
    let index_path = temp.path().join("tile_index.json");
    index.save(&index_path).unwrap();

    Fixture {
        temp,
        archive_root,
        index_path,
    }
}

fn write_mosaic(path: &Path) {
    // Mosaics carry their science plane in the primary HDU.
    let (height, width) = (200, 200);
    let dimensions = [height, width];
    let description = ImageDescription {
        data_type: ImageType::Double,
        dimensions: &dimensions,
    };
    let mut fptr = FitsFile::create(path)
        .with_custom_primary(&description)
        .open()
        .unwrap();
    let hdu = fptr.hdu(0).unwrap();
    let flat: Vec<f64> = (0..height * width).map(|index| index as f64).collect();
    hdu.write_image(&mut fptr, &flat).unwrap();

    hdu.write_key(&mut fptr, "CTYPE1", "RA---TAN").unwrap();
    hdu.write_key(&mut fptr, "CTYPE2", "DEC--TAN").unwrap();
    hdu.write_key(&mut fptr, "CRPIX1", 100.5).unwrap();
    hdu.write_key(&mut fptr, "CRPIX2", 100.5).unwrap();
    hdu.write_key(&mut fptr, "CRVAL1", 150.1).unwrap();
    hdu.write_key(&mut fptr, "CRVAL2", 2.2).unwrap();
    hdu.write_key(&mut fptr, "CD1_1", -SCALE).unwrap();
    hdu.write_key(&mut fptr, "CD1_2", 0.0).unwrap();
    hdu.write_key(&mut fptr, "CD2_1", 0.0).unwrap();
    hdu.write_key(&mut fptr, "CD2_2", SCALE).unwrap();
}

fn write_catalog(path: &Path, rows: &[(f64, f64, u32)]) {
    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "RA,DEC,OBJECT_ID").unwrap();
    for (ra, dec, id) in rows {
        writeln!(file, "{ra},{dec},{id}").unwrap();
    }
}

fn request(ra: f64, dec: f64, target_id: &str, instruments: &[&str]) -> SourceRequest {
    SourceRequest {
        position: SkyCoord::new(ra, dec).unwrap(),
        size: WindowSize::Square(32),
        target_id: target_id.to_string(),
        row_index: 0,
        instruments: instruments.iter().map(|name| name.to_string()).collect(),
        bands: None,
        product_types: vec![ProductType::BgSub],
    }
}

fn orchestrator(fixture: &Fixture, run: &str) -> (BatchOrchestrator, Arc<ArtifactCache>) {
    let index = Arc::new(TileIndex::load(&fixture.index_path).unwrap());
    let cache = Arc::new(
        ArtifactCache::new(
            fixture.temp.path().join("cache").join(run),
            fixture.temp.path().join("permanent"),
        )
        .unwrap(),
    );
    let config = BatchConfig::new(
        fixture.archive_root.clone(),
        fixture.temp.path().join("output").join(run),
    )
    .with_workers(2)
    .with_invalid_policy(InvalidPolicy::Skip);
    (
        BatchOrchestrator::new(index, Arc::clone(&cache), config),
        cache,
    )
}

fn empty_catalog(fixture: &Fixture) -> Catalog {
    let path = fixture.temp.path().join("requests.csv");
    write_catalog(&path, &[(150.1, 2.2, 1)]);
    Catalog::read(&path).unwrap()
}

#[test]
fn test_three_sources_one_tile_all_succeed() {
    let fixture = fixture();
    let (orchestrator, _cache) = orchestrator(&fixture, "run1");
    let catalog = empty_catalog(&fixture);

    // Three sources in the same tile, one instrument, one band, one
    // product type: one tile group, three successes.
    let requests = vec![
        request(150.100, 2.200, "1", &["VIS"]),
        request(150.105, 2.195, "2", &["VIS"]),
        request(150.095, 2.205, "3", &["VIS"]),
    ];

    let summary = orchestrator.run(&catalog, &requests, &|_| {}).unwrap();

    assert_eq!(summary.processed, 3);
    assert_eq!(summary.no_tile, 0);
    assert_eq!(summary.per_product["BGSUB"].success, 3);
    assert_eq!(summary.per_product["BGSUB"].failed, 0);
    assert!(summary.failure_samples.is_empty());

    // Each source produced a container tagged with its target id.
    for target in ["1", "2", "3"] {
        let container_path = fixture
            .temp
            .path()
            .join("output/run1/BGSUB")
            .join(format!("{target}.fits"));
        let container = output::read_container(&container_path).unwrap();
        assert_eq!(container.target_id.as_deref(), Some(target));
        assert_eq!(container.artifacts.len(), 1);
        assert_eq!(container.artifacts[0].data.dim(), (32, 32));
        assert_eq!(container.artifacts[0].instrument, "VIS");
    }
}

#[test]
fn test_missing_instrument_recorded_not_dropped() {
    let fixture = fixture();
    let (orchestrator, _cache) = orchestrator(&fixture, "run1");
    let catalog = empty_catalog(&fixture);

    // The tile has no NISP directory: every source must be recorded as a
    // failure for that instrument, exactly, not silently omitted.
    let requests = vec![
        request(150.100, 2.200, "1", &["NISP"]),
        request(150.105, 2.195, "2", &["NISP"]),
    ];

    let summary = orchestrator.run(&catalog, &requests, &|_| {}).unwrap();

    assert_eq!(summary.processed, 2);
    assert_eq!(summary.per_product["BGSUB"].failed, 2);
    assert_eq!(summary.per_product["BGSUB"].success, 0);
    assert_eq!(summary.failure_samples.len(), 2);
    assert!(summary.failure_samples[0].contains("no BGSUB files"));
}

#[test]
fn test_unresolved_positions_go_to_no_tile_bucket() {
    let fixture = fixture();
    let (orchestrator, _cache) = orchestrator(&fixture, "run1");
    let catalog = empty_catalog(&fixture);

    let requests = vec![
        request(150.100, 2.200, "1", &["VIS"]),
        request(10.0, -45.0, "lost", &["VIS"]),
    ];

    let summary = orchestrator.run(&catalog, &requests, &|_| {}).unwrap();

    assert_eq!(summary.no_tile, 1);
    assert_eq!(summary.per_product["BGSUB"].success, 1);
    assert_eq!(summary.per_product["BGSUB"].failed, 1);
    assert!(summary
        .failure_samples
        .iter()
        .any(|sample| sample.contains("lost")));
}

#[test]
fn test_rerun_is_served_entirely_from_permanent_cache() {
    let fixture = fixture();
    let catalog = empty_catalog(&fixture);
    let requests = vec![
        request(150.100, 2.200, "1", &["VIS"]),
        request(150.105, 2.195, "2", &["VIS"]),
    ];

    let (first, first_cache) = orchestrator(&fixture, "run1");
    first.run(&catalog, &requests, &|_| {}).unwrap();
    assert_eq!(first_cache.stats().misses, 2);

    // Fresh ephemeral tier, shared permanent tier: zero new extractions,
    // every request served from cache.
    let (second, second_cache) = orchestrator(&fixture, "run2");
    let summary = second.run(&catalog, &requests, &|_| {}).unwrap();

    let stats = second_cache.stats();
    assert_eq!(stats.misses, 0);
    assert_eq!(stats.permanent_hits, 2);
    assert_eq!(summary.cache_hits, 2);
    assert_eq!(summary.per_product["BGSUB"].success, 2);
}

#[test]
fn test_progress_publications_reach_the_hook() {
    let fixture = fixture();
    let (orchestrator, _cache) = orchestrator(&fixture, "run1");
    let catalog = empty_catalog(&fixture);

    let requests: Vec<SourceRequest> = (0..5)
        .map(|index| {
            request(
                150.09 + index as f64 * 0.004,
                2.2,
                &format!("t{index}"),
                &["VIS"],
            )
        })
        .collect();

    let updates = std::sync::Mutex::new(Vec::new());
    orchestrator
        .run(&catalog, &requests, &|update| {
            updates.lock().unwrap().push(update);
        })
        .unwrap();

    let updates = updates.into_inner().unwrap();
    assert!(!updates.is_empty());
    assert_eq!(updates.last().unwrap().percent, 100);
}

#[test]
fn test_service_end_to_end() {
    let fixture = fixture();

    let catalog_path = fixture.temp.path().join("sources.csv");
    write_catalog(
        &catalog_path,
        &[
            (150.100, 2.200, 11),
            (150.105, 2.195, 12),
            (150.095, 2.205, 13),
        ],
    );

    let mut config = ServiceConfig::default();
    config.data.archive_root = fixture.archive_root.clone();
    config.data.tile_index = fixture.index_path.clone();
    config.workspace.ephemeral_cache_dir = fixture.temp.path().join("cache");
    config.workspace.permanent_cache_dir = fixture.temp.path().join("permanent");
    config.workspace.output_dir = fixture.temp.path().join("output");
    config.batch.n_workers = 2;

    let store = Arc::new(MemoryStateStore::new());
    let service = CutoutService::new(config, store).unwrap();

    let task_id = service.create_task();
    assert_eq!(service.status(&task_id).unwrap().status, TaskStatus::Queued);

    let spec = RequestSpec {
        ra_col: None,
        dec_col: None,
        id_col: None,
        size: WindowSize::Square(32),
        instruments: vec!["VIS".to_string()],
        bands: None,
        product_types: vec![ProductType::BgSub],
    };
    service.run_task(&task_id, &catalog_path, spec).unwrap();

    let task = service.status(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.progress, 100);

    let stats = task.stats.expect("completed tasks carry statistics");
    assert_eq!(stats.total_sources, 3);
    assert_eq!(stats.no_tile, 0);
    assert_eq!(stats.per_product["BGSUB"].success, 3);
    assert!(!stats.truncated);

    // Containers land under the task's output directory, named by the
    // catalog's id column, with the catalog row attached.
    let container_path = fixture
        .temp
        .path()
        .join("output")
        .join(&task_id)
        .join("BGSUB/11.fits");
    let container = output::read_container(&container_path).unwrap();
    assert_eq!(container.target_id.as_deref(), Some("11"));
}

#[test]
fn test_row_cap_truncation_is_reported() {
    let fixture = fixture();

    let catalog_path = fixture.temp.path().join("sources.csv");
    let rows: Vec<(f64, f64, u32)> = (0..6)
        .map(|index| (150.095 + index as f64 * 0.002, 2.2, index as u32))
        .collect();
    write_catalog(&catalog_path, &rows);

    let mut config = ServiceConfig::default();
    config.data.archive_root = fixture.archive_root.clone();
    config.data.tile_index = fixture.index_path.clone();
    config.workspace.ephemeral_cache_dir = fixture.temp.path().join("cache");
    config.workspace.permanent_cache_dir = fixture.temp.path().join("permanent");
    config.workspace.output_dir = fixture.temp.path().join("output");
    config.limits.max_catalog_rows = 4;
    config.batch.n_workers = 1;

    let store = Arc::new(MemoryStateStore::new());
    let service = CutoutService::new(config, store).unwrap();

    let task_id = service.create_task();
    let spec = RequestSpec {
        ra_col: None,
        dec_col: None,
        id_col: None,
        size: WindowSize::Square(16),
        instruments: vec!["VIS".to_string()],
        bands: None,
        product_types: vec![ProductType::BgSub],
    };
    service.run_task(&task_id, &catalog_path, spec).unwrap();

    let task = service.status(&task_id).unwrap();
    let stats = task.stats.unwrap();
    assert!(stats.truncated);
    assert_eq!(stats.total_sources, 4);
}

#[test]
fn test_cancelled_task_is_not_processed() {
    let fixture = fixture();

    let catalog_path = fixture.temp.path().join("sources.csv");
    write_catalog(&catalog_path, &[(150.1, 2.2, 1)]);

    let mut config = ServiceConfig::default();
    config.data.archive_root = fixture.archive_root.clone();
    config.data.tile_index = fixture.index_path.clone();
    config.workspace.ephemeral_cache_dir = fixture.temp.path().join("cache");
    config.workspace.permanent_cache_dir = fixture.temp.path().join("permanent");
    config.workspace.output_dir = fixture.temp.path().join("output");

    let store = Arc::new(MemoryStateStore::new());
    let service = CutoutService::new(config, store).unwrap();

    let task_id = service.create_task();
    assert!(service.cancel(&task_id).unwrap());

    let spec = RequestSpec {
        ra_col: None,
        dec_col: None,
        id_col: None,
        size: WindowSize::Square(16),
        instruments: vec!["VIS".to_string()],
        bands: None,
        product_types: vec![ProductType::BgSub],
    };
    service.run_task(&task_id, &catalog_path, spec).unwrap();

    // The run observed the cancellation and left the task terminal.
    let task = service.status(&task_id).unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
}
