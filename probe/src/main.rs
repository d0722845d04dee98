//! Headless probe: drives the tile loader against a live tile host and
//! reports what it fetched, cached and evicted.

mod config;
mod headless;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tinglemap_client::{
    EngineParts, FileManifestSource, HttpManifestSource, HttpTileFetcher, ManifestSource,
    MapEngine, PathUrlResolver,
};
use tinglemap_shared::Viewport;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ManifestLocation, ProbeConfig};
use crate::headless::{HeadlessSurface, TracingLayers, sweep_viewports};

const MANIFEST_ATTEMPTS: u32 = 3;
const MANIFEST_RETRY_DELAY: Duration = Duration::from_secs(2);

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    local.block_on(&rt, run())
}

async fn run() -> anyhow::Result<()> {
    let config = ProbeConfig::from_env()?;
    let grid = config.map.grid();
    let start = Viewport::new(grid.world_bounds(), config.map.min_zoom);

    let manifest_source: Box<dyn ManifestSource> = match &config.manifest {
        ManifestLocation::Url(url) => Box::new(HttpManifestSource::new(url.clone())),
        ManifestLocation::Path(path) => Box::new(FileManifestSource::new(path.clone())),
    };
    let surface = HeadlessSurface::new(start);
    let layers = Rc::new(RefCell::new(TracingLayers::default()));

    let mut engine = MapEngine::new(
        config.map.clone(),
        EngineParts {
            surface: Box::new(surface.clone()),
            layers: layers.clone(),
            manifest_source,
            fetcher: Rc::new(HttpTileFetcher::new()),
            resolver: Rc::new(PathUrlResolver::new(&config.tile_base_url)),
        },
    );
    engine.initialize().await?;
    info!(manifest = ?config.manifest, tiles = %config.tile_base_url, "engine ready");

    let mut attempt = 1;
    while !engine.manifest().is_loaded() && attempt < MANIFEST_ATTEMPTS {
        tokio::time::sleep(MANIFEST_RETRY_DELAY).await;
        attempt += 1;
        if let Err(e) = engine.reload_manifest().await {
            warn!(attempt, error = %e, "manifest still unavailable");
        }
    }
    if !engine.manifest().is_loaded() {
        warn!("continuing without a manifest; every square will load empty");
    }

    // Two squares across at the zoom where square labels appear.
    let zoom = config.map.clamp_zoom(config.map.label_zoom_squares);
    surface.zoom_to(zoom);
    let width = grid.square_w() * 2.0;
    let height = grid.square_h() * 1.5;
    for (step, bounds) in sweep_viewports(&grid, width, height, config.sweep_steps)
        .into_iter()
        .enumerate()
    {
        surface.pan_to(bounds);
        tokio::time::sleep(config.step_pause).await;
        let stats = engine.stats();
        info!(
            step,
            loaded = stats.loaded,
            queued = stats.queue_depth,
            in_flight = stats.in_flight,
            cache = stats.cache_size,
            "sweep step"
        );
    }

    // Cross the crossfade threshold so previews are replaced by full tiles.
    surface.zoom_to(config.map.max_zoom);
    tokio::time::sleep(config.step_pause * 4).await;

    let metrics = engine.metrics();
    let drawn = layers.borrow().summary();
    info!(
        reconciliations = metrics.reconciliations_total,
        squares_loaded = metrics.squares_loaded_total,
        layers_loaded = metrics.layers_loaded_total,
        layer_failures = metrics.layer_failures_total,
        evicted = metrics.squares_evicted_total,
        crossfades = drawn.crossfades,
        overlays = drawn.overlays,
        bytes = drawn.bytes_received,
        avg_batch_ms = metrics.average_batch_millis(),
        "probe finished"
    );
    for failure in engine.recent_failures() {
        warn!(
            square = %failure.square,
            layer = %failure.layer,
            url = %failure.url,
            error = %failure.message,
            "layer failed"
        );
    }

    engine.cleanup();
    Ok(())
}
