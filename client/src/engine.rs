use std::rc::Rc;

use tinglemap_shared::{MapConfig, ToggleKey, Viewport};
use tracing::{info, warn};

use crate::debounce::Debouncer;
use crate::error::{EngineError, ManifestError};
use crate::fetch::{TileFetcher, UrlResolver};
use crate::layers::SharedLayers;
use crate::loader::{LoaderDeps, LoaderStats, TileLoader};
use crate::manifest::{Manifest, ManifestSource};
use crate::metrics::{LayerFailure, LoaderMetrics, MetricsSnapshot};
use crate::surface::{MapEvent, MapSurface, SubscriptionId};
use crate::toggles::ToggleState;

/// External collaborators handed to a [`MapEngine`].
pub struct EngineParts {
    pub surface: Box<dyn MapSurface>,
    pub layers: SharedLayers,
    pub manifest_source: Box<dyn ManifestSource>,
    pub fetcher: Rc<dyn TileFetcher>,
    pub resolver: Rc<dyn UrlResolver>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Created,
    Initializing,
    Ready,
    Destroyed,
}

/// Owns the map viewer core and wires renderer events to the loader.
///
/// Must be driven from inside a `tokio::task::LocalSet`.
pub struct MapEngine {
    config: MapConfig,
    status: EngineStatus,
    mounted: bool,
    surface: Box<dyn MapSurface>,
    layers: SharedLayers,
    manifest: Rc<Manifest>,
    loader: TileLoader,
    toggles: Rc<ToggleState>,
    metrics: Rc<LoaderMetrics>,
    settle_move: Rc<Debouncer>,
    settle_zoom: Rc<Debouncer>,
    subscriptions: Vec<SubscriptionId>,
}

impl MapEngine {
    pub fn new(config: MapConfig, parts: EngineParts) -> Self {
        let metrics = Rc::new(LoaderMetrics::default());
        let manifest = Rc::new(Manifest::from_boxed(parts.manifest_source));
        let loader = TileLoader::new(
            config.clone(),
            LoaderDeps {
                manifest: Rc::clone(&manifest),
                layers: Rc::clone(&parts.layers),
                fetcher: parts.fetcher,
                resolver: parts.resolver,
                metrics: Rc::clone(&metrics),
            },
        );
        let toggles = Rc::new(ToggleState::new(&config, Rc::clone(&parts.layers)));
        let settle_move = Rc::new(Debouncer::new(config.settle_debounce()));
        let settle_zoom = Rc::new(Debouncer::new(config.settle_debounce()));

        Self {
            config,
            status: EngineStatus::Created,
            mounted: false,
            surface: parts.surface,
            layers: parts.layers,
            manifest,
            loader,
            toggles,
            metrics,
            settle_move,
            settle_zoom,
            subscriptions: Vec::new(),
        }
    }

    /// Mount the surface, load the manifest and start following the viewport.
    ///
    /// Allowed once. A manifest failure leaves the engine running without tiles;
    /// any other failure cleans the engine up before the error is returned.
    pub async fn initialize(&mut self) -> Result<(), EngineError> {
        match self.status {
            EngineStatus::Created => {}
            EngineStatus::Initializing | EngineStatus::Ready => {
                return Err(EngineError::AlreadyInitialized);
            }
            EngineStatus::Destroyed => return Err(EngineError::Destroyed),
        }
        self.status = EngineStatus::Initializing;

        match self.start().await {
            Ok(()) => {
                self.status = EngineStatus::Ready;
                info!(
                    manifest_loaded = self.manifest.is_loaded(),
                    "map engine ready"
                );
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "map engine initialization failed");
                self.cleanup();
                Err(e)
            }
        }
    }

    async fn start(&mut self) -> Result<(), EngineError> {
        self.config.validate()?;
        self.surface.mount()?;
        self.mounted = true;
        self.toggles.apply_all();

        if let Err(e) = self.manifest.load().await {
            self.metrics.record_manifest_failure();
            warn!(error = %e, "manifest unavailable; map stays empty until reloaded");
        }

        self.subscribe();

        let view = self.surface.current_view();
        let zoom = self.config.clamp_zoom(view.zoom);
        self.loader.on_zoom_change(zoom);
        self.loader.reconcile_now(view.bounds, zoom);
        Ok(())
    }

    fn subscribe(&mut self) {
        let move_handler = {
            let loader = self.loader.clone();
            let settle = Rc::clone(&self.settle_move);
            let config = self.config.clone();
            Rc::new(move |view: Viewport| {
                let loader = loader.clone();
                let zoom = config.clamp_zoom(view.zoom);
                settle.schedule(move || loader.update_viewport(view.bounds, zoom));
            })
        };
        let zoom_handler = {
            let loader = self.loader.clone();
            let settle = Rc::clone(&self.settle_zoom);
            let config = self.config.clone();
            Rc::new(move |view: Viewport| {
                let loader = loader.clone();
                let zoom = config.clamp_zoom(view.zoom);
                settle.schedule(move || {
                    loader.on_zoom_change(zoom);
                    loader.update_viewport(view.bounds, zoom);
                });
            })
        };

        self.subscriptions
            .push(self.surface.add_event_listener(MapEvent::MoveEnd, move_handler));
        self.subscriptions
            .push(self.surface.add_event_listener(MapEvent::ZoomEnd, zoom_handler));
    }

    /// Retry a manifest load that failed during `initialize`, then reconcile
    /// the current view so tiles appear.
    pub async fn reload_manifest(&self) -> Result<(), ManifestError> {
        let was_loaded = self.manifest.is_loaded();
        if let Err(e) = self.manifest.load().await {
            self.metrics.record_manifest_failure();
            warn!(error = %e, "manifest reload failed");
            return Err(e);
        }
        if !was_loaded && self.status == EngineStatus::Ready {
            let view = self.surface.current_view();
            let zoom = self.config.clamp_zoom(view.zoom);
            self.loader.reconcile_now(view.bounds, zoom);
        }
        Ok(())
    }

    /// Tear everything down. Safe to call more than once.
    pub fn cleanup(&mut self) {
        if self.status == EngineStatus::Destroyed {
            return;
        }
        for id in self.subscriptions.drain(..) {
            self.surface.remove_event_listener(id);
        }
        self.settle_move.cancel();
        self.settle_zoom.cancel();
        self.loader.clear();
        self.toggles.clear_listeners();
        self.layers.borrow_mut().clear();
        if self.mounted {
            self.surface.release();
            self.mounted = false;
        }
        self.status = EngineStatus::Destroyed;
        info!("map engine cleaned up");
    }

    pub fn status(&self) -> EngineStatus {
        self.status
    }

    pub fn is_ready(&self) -> bool {
        self.status == EngineStatus::Ready
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    pub fn loader(&self) -> &TileLoader {
        &self.loader
    }

    pub fn toggles(&self) -> &ToggleState {
        &self.toggles
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn set_toggle(&self, key: ToggleKey, value: bool) -> bool {
        self.toggles.set_state(key, value)
    }

    pub fn stats(&self) -> LoaderStats {
        self.loader.stats()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn recent_failures(&self) -> Vec<LayerFailure> {
        self.metrics.recent_failures()
    }
}

impl Drop for MapEngine {
    fn drop(&mut self) {
        self.cleanup();
    }
}
