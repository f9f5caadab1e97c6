use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use deltaserve::archive::{self, is_empty_archive, Compression};
use deltaserve::catalog::{self, CatalogHandle};
use deltaserve::delta::{self, ClientReport, DeltaSummary};
use deltaserve::manifest::{self, Algorithm};
use deltaserve::server::{self, ServerConfig};
use deltaserve::storage::FsStore;

#[derive(Parser)]
#[command(name = "deltaserve", about = "Incremental update server", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load the catalog and serve update requests over HTTP
    Serve {
        /// Catalog root directory
        #[arg(long, env = "DELTASERVE_ROOT", default_value = "/volume")]
        root: PathBuf,
        /// Address to listen on
        #[arg(long, env = "DELTASERVE_LISTEN", default_value = "0.0.0.0:5000")]
        listen: SocketAddr,
        /// Largest accepted update request body, in bytes
        #[arg(long, env = "DELTASERVE_MAX_REQUEST_BYTES", default_value_t = 3000)]
        max_request_bytes: usize,
        /// Per-request timeout, in seconds
        #[arg(long, env = "DELTASERVE_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
        request_timeout_secs: u64,
        /// Compression used for archive entries
        #[arg(long, env = "DELTASERVE_COMPRESSION", value_enum, default_value_t)]
        compression: Compression,
    },
    /// Load the catalog and report whether it can serve traffic
    Check {
        /// Catalog root directory
        #[arg(long, env = "DELTASERVE_ROOT")]
        root: PathBuf,
    },
    /// Print the per-file decisions for a client report
    Plan {
        /// Catalog root directory
        #[arg(long, env = "DELTASERVE_ROOT")]
        root: PathBuf,
        /// JSON file holding the client's flat checksum map
        #[arg(long)]
        report: PathBuf,
    },
    /// Write the update archive for a client report
    Bundle {
        /// Catalog root directory
        #[arg(long, env = "DELTASERVE_ROOT")]
        root: PathBuf,
        /// JSON file holding the client's flat checksum map
        #[arg(long)]
        report: PathBuf,
        /// Output path for the zip
        #[arg(long, short)]
        output: PathBuf,
        /// Compression used for archive entries
        #[arg(long, value_enum, default_value_t)]
        compression: Compression,
    },
    /// Hash an update's files and write its .info manifest
    Manifest {
        /// Update directory containing a files/ subdirectory
        update_dir: PathBuf,
        /// Digest used for checksums
        #[arg(long, value_enum, default_value_t)]
        algorithm: Algorithm,
    },
}

fn read_report(path: &Path) -> Result<ClientReport> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read report: {}", path.display()))?;
    let wire: BTreeMap<String, String> = serde_json::from_str(&text)
        .with_context(|| format!("Report is not a flat JSON string map: {}", path.display()))?;
    Ok(ClientReport::from_wire(wire)?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            root,
            listen,
            max_request_bytes,
            request_timeout_secs,
            compression,
        } => {
            let catalog = catalog::load(&root)
                .with_context(|| format!("Refusing to serve from {}", root.display()))?;
            let config = ServerConfig {
                root,
                listen,
                max_request_bytes,
                request_timeout: Duration::from_secs(request_timeout_secs),
                compression,
            };
            server::serve(config, Arc::new(CatalogHandle::new(catalog))).await?;
        }
        Commands::Check { root } => {
            let catalog = catalog::load(&root)
                .with_context(|| format!("Catalog at {} is not servable", root.display()))?;
            println!("Catalog OK");
            println!("  Root: {}", root.display());
            println!("  Latest: {}", catalog.latest_id());
            println!("  Updates: {}", catalog.update_count());
            println!("  Files in latest: {}", catalog.latest().len());
        }
        Commands::Plan { root, report } => {
            let catalog = catalog::load(&root)?;
            let report = read_report(&report)?;
            let decisions = delta::select_deltas(&catalog, &report, &FsStore::new(&root));
            println!("{}", serde_json::to_string_pretty(&decisions)?);

            let summary = DeltaSummary::of(&decisions);
            eprintln!(
                "skip: {}, patch: {}, full: {}, delete: {}",
                summary.skipped, summary.patched, summary.full_files, summary.deleted
            );
        }
        Commands::Bundle {
            root,
            report,
            output,
            compression,
        } => {
            let catalog = catalog::load(&root)?;
            let report = read_report(&report)?;
            let file = std::fs::File::create(&output)
                .with_context(|| format!("Failed to create output file: {}", output.display()))?;

            let start = Instant::now();
            let (file, summary) =
                archive::build_update(&catalog, &report, &FsStore::new(&root), file, compression)
                    .context("Failed to assemble update archive")?;
            let len = file.metadata()?.len();

            if is_empty_archive(len) {
                drop(file);
                std::fs::remove_file(&output)
                    .with_context(|| format!("Failed to remove empty archive: {}", output.display()))?;
                println!("No changes: client is up to date.");
            } else {
                println!("Archive written: {}", output.display());
                println!("  Patches: {}", summary.patches);
                println!("  Full files: {}", summary.full_files);
                println!("  Deletes: {}", summary.deletes);
                println!("  Patch fallbacks: {}", summary.fallbacks);
                println!("  Omitted: {}", summary.omitted);
                println!("  Size: {} bytes", len);
            }
            println!("  Time elapsed: {:.3}s", start.elapsed().as_secs_f64());
        }
        Commands::Manifest {
            update_dir,
            algorithm,
        } => {
            let manifest = manifest::write_manifest(&update_dir, algorithm)?;
            println!("Manifest written for {}", update_dir.display());
            println!("  Files: {}", manifest.len());
        }
    }

    Ok(())
}
