//! Starcut CLI - Command-line interface
//!
//! This binary provides a command-line interface to the starcut library:
//! build the tile index, resolve positions and files, and run catalog
//! batches.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use starcut::batch::RequestSpec;
use starcut::config::ServiceConfig;
use starcut::extract::WindowSize;
use starcut::logging::init_logging;
use starcut::resolve::{self, ProductType};
use starcut::service::CutoutService;
use starcut::task::MemoryStateStore;
use starcut::tile::{TileIndex, DEFAULT_CATALOG_PATTERN};

#[derive(Debug, Clone, ValueEnum)]
enum ProductArg {
    /// Background-subtracted science mosaic
    Bgsub,
    /// Background model mosaic
    Bgmod,
    /// Pixel flag mask mosaic
    Flag,
    /// RMS noise mosaic
    Rms,
    /// Point-spread-function stamp catalog
    Psf,
}

impl From<ProductArg> for ProductType {
    fn from(arg: ProductArg) -> Self {
        match arg {
            ProductArg::Bgsub => ProductType::BgSub,
            ProductArg::Bgmod => ProductType::BgMod,
            ProductArg::Flag => ProductType::Flag,
            ProductArg::Rms => ProductType::Rms,
            ProductArg::Psf => ProductType::CatalogPsf,
        }
    }
}

#[derive(Parser)]
#[command(name = "starcut")]
#[command(version = starcut::VERSION)]
#[command(about = "Batch cutouts from tile-partitioned sky mosaic archives", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "starcut.ini")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Build the tile index from per-tile source catalogs
    Index {
        /// Root directory of the per-tile catalogs
        #[arg(long)]
        catalog_root: PathBuf,

        /// Output path for the serialized index
        #[arg(long)]
        output: PathBuf,

        /// Catalog filename pattern
        #[arg(long, default_value = DEFAULT_CATALOG_PATTERN)]
        pattern: String,
    },

    /// Resolve the tile containing a sky position
    Lookup {
        /// Right ascension in degrees
        #[arg(long)]
        ra: f64,

        /// Declination in degrees
        #[arg(long)]
        dec: f64,
    },

    /// List the archive files of a product type within a tile
    Resolve {
        /// Tile identifier
        #[arg(long)]
        tile: String,

        /// Product type
        #[arg(long, value_enum)]
        product: ProductArg,

        /// Instrument directory filter (repeatable)
        #[arg(long = "instrument")]
        instruments: Vec<String>,

        /// Band filter on the parsed band code (repeatable)
        #[arg(long = "band")]
        bands: Vec<String>,
    },

    /// Process a catalog of sky positions into cutout containers
    Batch {
        /// Catalog file (FITS or CSV)
        #[arg(long)]
        catalog: PathBuf,

        /// Window size in pixels: "128" or "128x256"
        #[arg(long, default_value = "128")]
        size: WindowSize,

        /// Instrument directories to extract from (repeatable)
        #[arg(long = "instrument", default_value = "VIS")]
        instruments: Vec<String>,

        /// Band filter (repeatable; defaults to the configured band)
        #[arg(long = "band")]
        bands: Vec<String>,

        /// Product types to extract (repeatable)
        #[arg(long = "product", value_enum, default_values = ["bgsub"])]
        products: Vec<ProductArg>,

        /// Explicit RA column name (auto-detected when omitted)
        #[arg(long)]
        ra_col: Option<String>,

        /// Explicit Dec column name (auto-detected when omitted)
        #[arg(long)]
        dec_col: Option<String>,

        /// Explicit id column name (auto-detected when omitted)
        #[arg(long)]
        id_col: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        eprintln!("Error: {err}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = if cli.config.exists() {
        ServiceConfig::load(&cli.config)?
    } else {
        ServiceConfig::default()
    };

    let _guard = init_logging(&config.logging.directory, &config.logging.file)?;

    match cli.command {
        Command::Index {
            catalog_root,
            output,
            pattern,
        } => {
            let index = TileIndex::build(&catalog_root, &pattern)?;
            index.save(&output)?;
            println!("Indexed {} tiles -> {}", index.len(), output.display());
        }

        Command::Lookup { ra, dec } => {
            let index = TileIndex::load(&config.data.tile_index)?;
            match index.lookup(ra, dec, config.batch.tolerance_deg) {
                Some(tile_id) => println!("{tile_id}"),
                None => {
                    eprintln!("No tile covers ({ra}, {dec})");
                    process::exit(2);
                }
            }
        }

        Command::Resolve {
            tile,
            product,
            instruments,
            bands,
        } => {
            let instruments = if instruments.is_empty() {
                None
            } else {
                Some(instruments)
            };
            let bands = if bands.is_empty() { None } else { Some(bands) };
            let files = resolve::resolve(
                &config.data.archive_root,
                &tile,
                product.into(),
                instruments.as_deref(),
                bands.as_deref(),
            )?;
            if files.is_empty() {
                println!("No matching files in tile {tile}");
            }
            for (key, path) in files {
                println!("{key}\t{}", path.display());
            }
        }

        Command::Batch {
            catalog,
            size,
            instruments,
            bands,
            products,
            ra_col,
            dec_col,
            id_col,
        } => {
            let store = Arc::new(MemoryStateStore::new());
            let service = CutoutService::new(config, store)?;

            let spec = RequestSpec {
                ra_col,
                dec_col,
                id_col,
                size,
                instruments,
                bands: if bands.is_empty() { None } else { Some(bands) },
                product_types: products.into_iter().map(ProductType::from).collect(),
            };

            let task_id = service.create_task();
            service.run_task(&task_id, &catalog, spec)?;

            let task = service.status(&task_id)?;
            println!("Task {} {}", task.id, task.status);
            if let Some(stats) = &task.stats {
                println!(
                    "Sources: {} total, {} without tile, cache hits: {}",
                    stats.total_sources, stats.no_tile, stats.cache_hits
                );
                for (product, counts) in &stats.per_product {
                    println!(
                        "  {product}: {} succeeded, {} failed",
                        counts.success, counts.failed
                    );
                }
                if !stats.failure_samples.is_empty() {
                    println!("Failure samples:");
                    for sample in &stats.failure_samples {
                        println!("  - {sample}");
                    }
                }
            }
            if let Some(output_path) = &task.output_path {
                println!("Output: {output_path}");
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_batch_args_parse() {
        let cli = Cli::parse_from([
            "starcut",
            "batch",
            "--catalog",
            "sources.fits",
            "--size",
            "64x128",
            "--instrument",
            "NISP",
            "--band",
            "NIR-Y",
            "--product",
            "bgsub",
            "--product",
            "psf",
        ]);
        match cli.command {
            Command::Batch {
                size,
                instruments,
                bands,
                products,
                ..
            } => {
                assert_eq!(
                    size,
                    WindowSize::Rect {
                        height: 64,
                        width: 128
                    }
                );
                assert_eq!(instruments, ["NISP"]);
                assert_eq!(bands, ["NIR-Y"]);
                assert_eq!(products.len(), 2);
            }
            _ => panic!("expected batch command"),
        }
    }

    #[test]
    fn test_lookup_args_parse() {
        let cli = Cli::parse_from(["starcut", "lookup", "--ra", "150.1", "--dec", "2.2"]);
        assert!(matches!(cli.command, Command::Lookup { .. }));
    }
}
