//! tilesync CLI - Command line interface for tile synchronization.
//!
//! This tool keeps a local, tile-partitioned copy of markers and reviews
//! in step with the remote service.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use tilesync_common::{BoundingBox, DataClass, TileCoordinate, TileCursors};
use tilesync_remote::HttpSyncClient;
use tilesync_store::{LocalTileStore, TileStore};
use tilesync_sync::{CycleOutcome, CycleReport, SyncEvent, SyncOrchestrator};

use crate::config::{default_config_path, AppConfig};

#[derive(Parser)]
#[command(name = "tilesync")]
#[command(about = "tilesync - Tile-partitioned marker and review sync")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a configuration file.
    Init {
        /// Base URL of the remote service.
        #[arg(long)]
        api_base_url: String,

        /// API key for the remote service.
        #[arg(long)]
        api_key: String,

        /// Directory for tile data.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Area of interest as "south,west,north,east" (repeatable).
        #[arg(long = "bbox", value_parser = parse_bbox, allow_hyphen_values = true)]
        bounding_boxes: Vec<BoundingBox>,

        /// Overwrite an existing configuration.
        #[arg(short, long)]
        force: bool,
    },

    /// Run one sync cycle.
    Sync {
        /// Print the cycle report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Sync on the configured interval until interrupted.
    Watch,

    /// Show locally stored tiles in the areas of interest.
    Status,

    /// List the tiles covering a bounding box.
    Tiles {
        #[arg(allow_negative_numbers = true)]
        south: f64,
        #[arg(allow_negative_numbers = true)]
        west: f64,
        #[arg(allow_negative_numbers = true)]
        north: f64,
        #[arg(allow_negative_numbers = true)]
        east: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG takes precedence over --verbose.
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Commands::Init {
            api_base_url,
            api_key,
            data_dir,
            bounding_boxes,
            force,
        } => cmd_init(
            &config_path,
            api_base_url,
            api_key,
            data_dir,
            bounding_boxes,
            force,
        ),

        Commands::Sync { json } => cmd_sync(&config_path, json).await,

        Commands::Watch => cmd_watch(&config_path).await,

        Commands::Status => cmd_status(&config_path).await,

        Commands::Tiles {
            south,
            west,
            north,
            east,
        } => cmd_tiles(BoundingBox::from_edges(south, west, north, east)),
    }
}

/// Parse "south,west,north,east" into a bounding box.
fn parse_bbox(value: &str) -> std::result::Result<BoundingBox, String> {
    let edges: Vec<f64> = value
        .split(',')
        .map(|part| part.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| format!("invalid coordinate: {}", e))?;

    let &[south, west, north, east] = edges.as_slice() else {
        return Err("expected south,west,north,east".to_string());
    };

    let bbox = BoundingBox::from_edges(south, west, north, east);
    bbox.validate().map_err(|e| e.to_string())?;
    Ok(bbox)
}

fn build_orchestrator(config: &AppConfig) -> Result<SyncOrchestrator> {
    let store = LocalTileStore::new(&config.data_dir)
        .with_context(|| format!("Failed to open tile store at {}", config.data_dir.display()))?;
    let remote = HttpSyncClient::new(&config.api_base_url, config.api_key.clone())
        .context("Failed to create API client")?;

    let orchestrator = SyncOrchestrator::new(Arc::new(store), Arc::new(remote), config.sync.clone())
        .context("Invalid sync settings")?;
    orchestrator
        .set_bounding_boxes(config.bounding_boxes.clone())
        .context("Invalid bounding box")?;
    Ok(orchestrator)
}

/// Write a new configuration file.
fn cmd_init(
    path: &Path,
    api_base_url: String,
    api_key: String,
    data_dir: Option<PathBuf>,
    bounding_boxes: Vec<BoundingBox>,
    force: bool,
) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config {} already exists (use --force to overwrite)",
            path.display()
        );
    }

    let mut config = AppConfig::new(api_base_url, api_key);
    if let Some(data_dir) = data_dir {
        config.data_dir = data_dir;
    }
    config.bounding_boxes = bounding_boxes;
    config.validate()?;
    config.save(path)?;

    println!("Configuration written to {}", path.display());
    println!("  API: {}", config.api_base_url);
    println!("  Data: {}", config.data_dir.display());
    println!("  Areas of interest: {}", config.bounding_boxes.len());
    if config.bounding_boxes.is_empty() {
        println!("\nNo areas of interest yet; nothing will sync until one is added.");
    }

    Ok(())
}

/// Run a single sync cycle.
async fn cmd_sync(config_path: &Path, json: bool) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let orchestrator = build_orchestrator(&config)?;

    info!("Running sync cycle");
    let outcome = orchestrator.run_cycle().await.context("Sync cycle failed")?;

    match outcome {
        CycleOutcome::Completed(report) if json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        CycleOutcome::Completed(report) => print_report(&report),
        CycleOutcome::NoAreaOfInterest => {
            println!("No areas of interest configured; add one with `tilesync init --bbox`.");
        }
        CycleOutcome::Coalesced => println!("A sync cycle is already running."),
    }

    Ok(())
}

/// Run the periodic scheduler until Ctrl-C.
async fn cmd_watch(config_path: &Path) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let mut orchestrator = build_orchestrator(&config)?;

    let handle = orchestrator.init_scheduler();
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<SyncEvent>();
    orchestrator.add_observer(Arc::new(events_tx));
    let orchestrator = Arc::new(orchestrator);

    let cycle_orchestrator = orchestrator.clone();
    let scheduler_task = tokio::spawn(handle.run(move || {
        let orchestrator = cycle_orchestrator.clone();
        async move { orchestrator.run_cycle().await }
    }));

    let events_task = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            print_event(&event);
        }
    });

    println!(
        "Watching {} areas every {} minutes. Press Ctrl-C to stop.",
        config.bounding_boxes.len(),
        config.sync.update_interval_mins
    );
    if !config.sync.auto_update {
        warn!("auto_update is off; only requested cycles will run");
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Stopping sync scheduler");
    if let Some(scheduler) = orchestrator.scheduler() {
        scheduler.shutdown().await;
    }
    scheduler_task.await.context("Scheduler task panicked")?;
    events_task.abort();

    Ok(())
}

/// Show stored tiles and their cursors.
async fn cmd_status(config_path: &Path) -> Result<()> {
    let config = AppConfig::load(config_path)?;
    let store = LocalTileStore::new(&config.data_dir)
        .with_context(|| format!("Failed to open tile store at {}", config.data_dir.display()))?;

    let boxes = if config.bounding_boxes.is_empty() {
        vec![BoundingBox::world()]
    } else {
        config.bounding_boxes.clone()
    };

    let mut tiles: BTreeMap<TileCoordinate, TileCursors> = BTreeMap::new();
    for bbox in &boxes {
        for (tile, cursors) in store.tiles_in_bbox(bbox).await? {
            tiles.insert(tile, cursors);
        }
    }

    println!("Store: {}", store.root().display());
    println!("  Version: {}", store.version().await?);

    if tiles.is_empty() {
        println!("No tiles stored.");
        return Ok(());
    }

    println!("Tiles ({}):", tiles.len());
    for (tile, cursors) in &tiles {
        let markers = store.records(*tile, DataClass::Markers).await?.len();
        let reviews = store.records(*tile, DataClass::Reviews).await?.len();
        println!(
            "  {}  markers: {:>6} (since {})  reviews: {:>6} (since {})",
            tile,
            markers,
            cursors.get(DataClass::Markers).unwrap_or("-"),
            reviews,
            cursors.get(DataClass::Reviews).unwrap_or("-"),
        );
    }

    Ok(())
}

/// List tiles covering a bounding box.
fn cmd_tiles(bbox: BoundingBox) -> Result<()> {
    bbox.validate().context("Invalid bounding box")?;

    let tiles = bbox.tiles();
    println!("{} tiles:", tiles.len());
    for tile in tiles {
        let bounds = tile.bounds();
        println!(
            "  {}  lat {:.4}..{:.4}  lon {:.4}..{:.4}",
            tile,
            bounds.south(),
            bounds.north(),
            bounds.west(),
            bounds.east()
        );
    }

    Ok(())
}

fn print_report(report: &CycleReport) {
    println!("Sync cycle completed in {:.1?}", report.duration);
    println!("  Tiles negotiated: {}", report.tiles_negotiated);
    println!("  Synced: {}", report.classes_synced);
    println!("  Failed: {}", report.classes_failed);
    println!("  Deleted: {}", report.classes_deleted);
    println!(
        "  Exports: {} installed, {} failed, {} requested",
        report.exports_installed, report.exports_failed, report.exports_requested
    );
}

fn print_event(event: &SyncEvent) {
    let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S");
    match event {
        SyncEvent::CycleCompleted(report) => println!(
            "[{}] cycle done: {} synced, {} failed, {} deleted, {}/{} exports",
            now,
            report.classes_synced,
            report.classes_failed,
            report.classes_deleted,
            report.exports_installed,
            report.exports_requested
        ),
        SyncEvent::CycleFailed(reason) => println!("[{}] cycle failed: {}", now, reason),
        SyncEvent::TileExported {
            tile,
            error: Some(reason),
        } => println!("[{}] export of tile {} failed: {}", now, tile, reason),
        _ => {}
    }
}
