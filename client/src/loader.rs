use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use chrono::Utc;
use futures::future::join_all;
use tinglemap_shared::{
    Bounds, MapConfig, Quadrant, SquareGrid, SquareId, Viewport, plan_layers,
};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, SquareCache};
use crate::debounce::Debouncer;
use crate::fetch::{TileFetcher, UrlResolver};
use crate::layers::{LabelLevel, OverlayKey, RasterOverlay, SharedLayers};
use crate::manifest::Manifest;
use crate::metrics::{LayerFailure, LoaderMetrics};

/// A square waiting for a batch slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueuedSquare {
    pub square: SquareId,
    /// Distance from the viewport center at the last reconciliation.
    pub distance: f64,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcilePlan {
    /// Buffered target squares, closest to the viewport center first.
    pub targets: Vec<SquareId>,
    /// Squares newly enqueued by this pass, closest first.
    pub squares_to_load: Vec<SquareId>,
    pub unloaded: Vec<SquareId>,
    pub evicted: Vec<SquareId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoaderStats {
    pub loaded_squares: Vec<SquareId>,
    pub loaded: usize,
    pub queue_depth: usize,
    pub in_flight: usize,
    pub cache_size: usize,
    pub target_squares: usize,
}

/// Collaborators the loader reads from and writes to.
pub struct LoaderDeps {
    pub manifest: Rc<Manifest>,
    pub layers: SharedLayers,
    pub fetcher: Rc<dyn TileFetcher>,
    pub resolver: Rc<dyn UrlResolver>,
    pub metrics: Rc<LoaderMetrics>,
}

#[derive(Default)]
struct LoaderState {
    queue: VecDeque<QueuedSquare>,
    /// In-flight squares (queued or fetching) and the ticket of their load.
    loading: HashMap<SquareId, u64>,
    next_ticket: u64,
    cache: SquareCache,
    /// Overlays this loader has handed to the rendering layer.
    overlays: HashSet<OverlayKey>,
    labels: HashMap<SquareId, LabelLevel>,
    targets: Vec<SquareId>,
    viewport: Option<Viewport>,
    pending: Option<Viewport>,
    zoom: Option<f64>,
    pumping: bool,
    crossfading: HashSet<SquareId>,
}

struct LoaderInner {
    config: MapConfig,
    grid: SquareGrid,
    deps: LoaderDeps,
    debounce: Debouncer,
    state: RefCell<LoaderState>,
}

/// Viewport-driven square loader and cache.
///
/// Cheap to clone; clones share state. All work runs on the current
/// `LocalSet`, and no state borrow is held across an await point.
#[derive(Clone)]
pub struct TileLoader {
    inner: Rc<LoaderInner>,
}

/// Drops the in-flight ticket on every exit path of a square load.
struct LoadingGuard<'a> {
    state: &'a RefCell<LoaderState>,
    square: SquareId,
    ticket: u64,
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            if state.loading.get(&self.square) == Some(&self.ticket) {
                state.loading.remove(&self.square);
            }
        }
    }
}

impl TileLoader {
    pub fn new(config: MapConfig, deps: LoaderDeps) -> Self {
        let grid = config.grid();
        let debounce = Debouncer::new(config.debounce());
        Self {
            inner: Rc::new(LoaderInner {
                config,
                grid,
                deps,
                debounce,
                state: RefCell::new(LoaderState::default()),
            }),
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.inner.config
    }

    pub fn metrics(&self) -> &LoaderMetrics {
        &self.inner.deps.metrics
    }

    /// Record the latest viewport and reconcile once updates go quiet for
    /// `DEBOUNCE_MS`. Earlier viewports in the same window are discarded.
    pub fn update_viewport(&self, bounds: Bounds, zoom: f64) {
        if !bounds.is_finite() || !zoom.is_finite() {
            warn!(?bounds, zoom, "ignoring non-finite viewport");
            return;
        }
        self.inner.state.borrow_mut().pending = Some(Viewport::new(bounds, zoom));

        let weak = Rc::downgrade(&self.inner);
        self.inner.debounce.schedule(move || {
            if let Some(inner) = weak.upgrade() {
                TileLoader { inner }.run_pending();
            }
        });
    }

    pub fn has_pending_update(&self) -> bool {
        self.inner.debounce.is_pending()
    }

    fn run_pending(&self) {
        let pending = self.inner.state.borrow_mut().pending.take();
        if let Some(view) = pending {
            self.reconcile_now(view.bounds, view.zoom);
        }
    }

    /// Diff the buffered viewport against the loaded set, unload and evict,
    /// enqueue missing squares by distance and refresh labels.
    ///
    /// No-op while the manifest is unloaded.
    pub fn reconcile_now(&self, bounds: Bounds, zoom: f64) -> ReconcilePlan {
        self.inner.state.borrow_mut().viewport = Some(Viewport::new(bounds, zoom));
        if !self.inner.deps.manifest.is_loaded() {
            debug!("manifest not loaded; skipping reconciliation");
            return ReconcilePlan::default();
        }
        self.inner.deps.metrics.record_reconciliation();
        self.apply_zoom(zoom);

        let config = &self.inner.config;
        let grid = &self.inner.grid;
        let center = bounds.center();
        let buffered = bounds.expand(
            config.buffer_squares * grid.square_w(),
            config.buffer_squares * grid.square_h(),
        );

        let mut ranked: Vec<(SquareId, f64)> = grid
            .squares_in_bounds(&buffered)
            .into_iter()
            .map(|id| (id, grid.distance_to_point(id, center)))
            .collect();
        ranked.sort_by(|a, b| {
            a.1.partial_cmp(&b.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        let targets: Vec<SquareId> = ranked.iter().map(|(id, _)| *id).collect();
        let target_set: HashSet<SquareId> = targets.iter().copied().collect();

        let mut plan = ReconcilePlan {
            targets: targets.clone(),
            ..ReconcilePlan::default()
        };

        // Unload pass: loaded squares that left the targets go first.
        let outside: Vec<SquareId> = {
            let mut state = self.inner.state.borrow_mut();
            state.queue.retain(|q| target_set.contains(&q.square));
            state.loading.retain(|id, _| target_set.contains(id));
            state
                .cache
                .loaded_squares()
                .into_iter()
                .filter(|id| !target_set.contains(id))
                .collect()
        };
        for id in outside {
            if self.unload_square(id) {
                plan.unloaded.push(id);
            }
        }

        // Soft cap: never touches squares intersecting the viewport itself.
        let evictions = self.inner.state.borrow().cache.plan_evictions(
            grid,
            &bounds,
            config.cache_squares_softcap,
        );
        for id in evictions {
            if self.unload_square(id) {
                self.inner.deps.metrics.record_evicted();
                plan.evicted.push(id);
            }
        }

        {
            let mut state = self.inner.state.borrow_mut();
            let mut committed = state.cache.len() + state.loading.len();
            for (id, distance) in &ranked {
                if state.cache.contains(*id) || state.loading.contains_key(id) {
                    continue;
                }
                if config.defer_buffer_at_softcap
                    && committed >= config.cache_squares_softcap
                    && !grid.square_bounds(*id).intersects(&bounds)
                {
                    continue;
                }
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                state.loading.insert(*id, ticket);
                state.queue.push_back(QueuedSquare {
                    square: *id,
                    distance: *distance,
                });
                plan.squares_to_load.push(*id);
                committed += 1;
            }

            for queued in state.queue.iter_mut() {
                queued.distance = grid.distance_to_point(queued.square, center);
            }
            state.queue.make_contiguous().sort_by(|a, b| {
                a.distance
                    .partial_cmp(&b.distance)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.square.cmp(&b.square))
            });
            state.targets = targets;
        }

        self.refresh_labels(zoom);
        debug!(
            targets = plan.targets.len(),
            enqueued = plan.squares_to_load.len(),
            unloaded = plan.unloaded.len(),
            evicted = plan.evicted.len(),
            "viewport reconciled"
        );
        self.ensure_pump();
        plan
    }

    /// Zoom settled: resize labels, refresh them for the current targets, and
    /// swap preview imagery for full resolution when crossing the threshold upward.
    pub fn on_zoom_change(&self, zoom: f64) {
        if !zoom.is_finite() {
            warn!(zoom, "ignoring non-finite zoom");
            return;
        }
        self.apply_zoom(zoom);
        self.refresh_labels(zoom);
    }

    fn apply_zoom(&self, zoom: f64) {
        let previous = {
            let mut state = self.inner.state.borrow_mut();
            let previous = state.zoom;
            if previous == Some(zoom) {
                return;
            }
            state.zoom = Some(zoom);
            previous
        };
        self.inner.deps.layers.borrow_mut().update_label_sizes(zoom);

        let threshold = self.inner.config.crossfade_threshold;
        let crossed_up = previous.is_some_and(|prev| prev < threshold) && zoom >= threshold;
        if crossed_up {
            let squares = self.inner.state.borrow().cache.preview_squares();
            debug!(zoom, squares = squares.len(), "zoom crossed crossfade threshold");
            self.spawn_crossfade(squares);
        }
    }

    fn refresh_labels(&self, zoom: f64) {
        let level = LabelLevel::for_zoom(zoom, &self.inner.config);
        let (changed, dropped) = {
            let mut state = self.inner.state.borrow_mut();
            let target_set: HashSet<SquareId> = state.targets.iter().copied().collect();

            let dropped: Vec<SquareId> = state
                .labels
                .keys()
                .filter(|id| !target_set.contains(id))
                .copied()
                .collect();
            for id in &dropped {
                state.labels.remove(id);
            }

            let mut changed = Vec::new();
            for id in state.targets.clone() {
                let current = state.labels.get(&id).copied().unwrap_or_default();
                if current == level {
                    continue;
                }
                if level == LabelLevel::Hidden {
                    state.labels.remove(&id);
                } else {
                    state.labels.insert(id, level);
                }
                changed.push((id, current));
            }
            (changed, dropped)
        };

        if changed.is_empty() && dropped.is_empty() {
            return;
        }
        let grid = &self.inner.grid;
        let mut layers = self.inner.deps.layers.borrow_mut();
        for id in dropped {
            layers.remove_labels(id);
        }
        for (id, current) in changed {
            if current != LabelLevel::Hidden {
                layers.remove_labels(id);
            }
            if level >= LabelLevel::Squares {
                layers.add_square_label(id, grid.square_bounds(id));
            }
            if level == LabelLevel::Quadrants {
                let quadrants: Vec<(Quadrant, Bounds)> = Quadrant::ALL
                    .into_iter()
                    .map(|q| (q, grid.quadrant_bounds(id, q)))
                    .collect();
                layers.add_quadrant_labels(id, &quadrants);
            }
        }
    }

    fn ensure_pump(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.pumping || state.queue.is_empty() {
                return;
            }
            state.pumping = true;
        }
        let loader = self.clone();
        tokio::task::spawn_local(async move { loader.pump().await });
    }

    /// Drain the queue `BATCH_SIZE` squares at a time. Every member of a batch
    /// settles before the next batch starts.
    async fn pump(&self) {
        loop {
            let batch: Vec<(SquareId, u64)> = {
                let mut state = self.inner.state.borrow_mut();
                let take = self.inner.config.batch_size.min(state.queue.len());
                let drained: Vec<QueuedSquare> = state.queue.drain(..take).collect();
                let batch: Vec<(SquareId, u64)> = drained
                    .into_iter()
                    .filter_map(|q| state.loading.get(&q.square).map(|t| (q.square, *t)))
                    .collect();
                if batch.is_empty() {
                    if state.queue.is_empty() {
                        state.pumping = false;
                        return;
                    }
                    continue;
                }
                batch
            };

            let started = Instant::now();
            join_all(
                batch
                    .iter()
                    .map(|(square, ticket)| self.load_square(*square, *ticket)),
            )
            .await;
            self.inner
                .deps
                .metrics
                .record_batch(batch.len(), started.elapsed());
            debug!(squares = batch.len(), "batch settled");

            tokio::task::yield_now().await;
        }
    }

    fn is_current(&self, square: SquareId, ticket: u64) -> bool {
        self.inner.state.borrow().loading.get(&square) == Some(&ticket)
    }

    async fn load_square(&self, square: SquareId, ticket: u64) {
        let _guard = LoadingGuard {
            state: &self.inner.state,
            square,
            ticket,
        };
        let deps = &self.inner.deps;
        let threshold = self.inner.config.crossfade_threshold;

        let zoom = self
            .inner
            .state
            .borrow()
            .zoom
            .unwrap_or(self.inner.config.max_zoom);
        let preview = deps.manifest.square_has_preview(square) && zoom < threshold;

        let names = deps.manifest.layers_for(square);
        let plan = plan_layers(names);
        if plan.len() < names.len() {
            debug!(square = %square, known = plan.len(), listed = names.len(), "unrecognised layers skipped");
        }
        if plan.is_empty() {
            debug!(square = %square, "nothing to load");
        }

        self.release_variant(square, !preview);

        let bounds = self.inner.grid.square_bounds(square);
        let mut loaded_layers = Vec::with_capacity(plan.len());
        for planned in plan {
            if !self.is_current(square, ticket) {
                self.abandon_stale(square);
                return;
            }
            let key = OverlayKey::new(square, &planned.name, preview);
            if self.inner.state.borrow().overlays.contains(&key) {
                loaded_layers.push(planned.name);
                continue;
            }

            let url = deps.resolver.resolve(square, &planned.name, preview);
            match deps.fetcher.fetch(&url).await {
                Ok(image) => {
                    if !self.is_current(square, ticket) {
                        self.abandon_stale(square);
                        return;
                    }
                    deps.layers.borrow_mut().add_raster_overlay(RasterOverlay {
                        square,
                        layer: planned.name.clone(),
                        kind: planned.kind,
                        preview,
                        bounds,
                        image,
                    });
                    self.inner.state.borrow_mut().overlays.insert(key);
                    deps.metrics.record_layer_loaded();
                    debug!(square = %square, layer = %planned.name, preview, "overlay added");
                    loaded_layers.push(planned.name);
                }
                Err(e) => {
                    warn!(square = %square, layer = %planned.name, url = %url, error = %e, "layer load failed");
                    deps.metrics.record_layer_failure(LayerFailure {
                        square,
                        layer: planned.name,
                        url,
                        message: e.to_string(),
                        at: Utc::now(),
                    });
                }
            }
        }

        {
            let mut state = self.inner.state.borrow_mut();
            if state.loading.get(&square) != Some(&ticket) {
                drop(state);
                self.abandon_stale(square);
                return;
            }
            state.loading.remove(&square);
            state.cache.insert(
                square,
                CacheEntry {
                    layers: loaded_layers,
                    preview,
                    loaded_at: Utc::now(),
                },
            );
        }
        deps.metrics.record_square_loaded();
        debug!(square = %square, preview, "square loaded");

        let zoom_now = self.inner.state.borrow().zoom;
        if preview && zoom_now.is_some_and(|z| z >= threshold) {
            self.spawn_crossfade(vec![square]);
        }
    }

    /// A load whose ticket was revoked gives back what it registered, unless
    /// the square has since been loaded or picked up by a newer load.
    fn abandon_stale(&self, square: SquareId) {
        self.inner.deps.metrics.record_stale_load();
        let owned = {
            let state = self.inner.state.borrow();
            state.cache.contains(square) || state.loading.contains_key(&square)
        };
        if !owned {
            self.release_overlays(square);
        }
        debug!(square = %square, owned, "stale load abandoned");
    }

    /// Drop overlays a revoked load left behind at the other resolution.
    fn release_variant(&self, square: SquareId, preview: bool) {
        let stale: Vec<OverlayKey> = {
            let mut state = self.inner.state.borrow_mut();
            let keys: Vec<OverlayKey> = state
                .overlays
                .iter()
                .filter(|k| k.square == square && k.preview == preview)
                .cloned()
                .collect();
            for key in &keys {
                state.overlays.remove(key);
            }
            keys
        };
        if stale.is_empty() {
            return;
        }
        let mut layers = self.inner.deps.layers.borrow_mut();
        for key in &stale {
            layers.remove_raster_overlay(square, &key.layer, preview);
        }
        debug!(square = %square, preview, overlays = stale.len(), "leftover overlays released");
    }

    /// Remove every overlay of `square`, preview and full, whether or not it was added.
    fn release_overlays(&self, square: SquareId) {
        let mut names: Vec<String> = {
            let mut state = self.inner.state.borrow_mut();
            let keys: Vec<OverlayKey> = state
                .overlays
                .iter()
                .filter(|k| k.square == square)
                .cloned()
                .collect();
            for key in &keys {
                state.overlays.remove(key);
            }
            let mut names: Vec<String> = keys.into_iter().map(|k| k.layer).collect();
            if let Some(entry) = state.cache.get(square) {
                names.extend(entry.layers.iter().cloned());
            }
            names
        };
        names.extend(
            plan_layers(self.inner.deps.manifest.layers_for(square))
                .into_iter()
                .map(|p| p.name),
        );
        names.sort();
        names.dedup();

        let mut layers = self.inner.deps.layers.borrow_mut();
        for name in &names {
            layers.remove_raster_overlay(square, name, false);
            layers.remove_raster_overlay(square, name, true);
        }
    }

    /// Tear down a loaded square in one step: overlays, labels, cache entry.
    fn unload_square(&self, square: SquareId) -> bool {
        if !self.inner.state.borrow().cache.contains(square) {
            return false;
        }
        self.release_overlays(square);
        {
            let mut state = self.inner.state.borrow_mut();
            state.labels.remove(&square);
            state.cache.remove(square);
        }
        self.inner.deps.layers.borrow_mut().remove_labels(square);
        self.inner.deps.metrics.record_unloaded();
        debug!(square = %square, "square unloaded");
        true
    }

    fn spawn_crossfade(&self, squares: Vec<SquareId>) {
        let squares: Vec<SquareId> = {
            let mut state = self.inner.state.borrow_mut();
            squares
                .into_iter()
                .filter(|id| state.crossfading.insert(*id))
                .collect()
        };
        if squares.is_empty() {
            return;
        }
        let loader = self.clone();
        tokio::task::spawn_local(async move {
            for square in squares {
                loader.crossfade_square(square).await;
                loader.inner.state.borrow_mut().crossfading.remove(&square);
            }
        });
    }

    /// Re-fetch a preview square at full resolution, layer by layer, and swap
    /// each overlay in place. Layers already swapped by an earlier pass are
    /// skipped. The loaded set is left alone.
    async fn crossfade_square(&self, square: SquareId) {
        let deps = &self.inner.deps;
        let layer_names = match self.inner.state.borrow().cache.get(square) {
            Some(entry) if entry.preview => entry.layers.clone(),
            _ => return,
        };

        let bounds = self.inner.grid.square_bounds(square);
        let mut complete = true;
        for planned in plan_layers(&layer_names) {
            let preview_key = OverlayKey::new(square, &planned.name, true);
            if !self.inner.state.borrow().overlays.contains(&preview_key) {
                continue;
            }
            let url = deps.resolver.resolve(square, &planned.name, false);
            match deps.fetcher.fetch(&url).await {
                Ok(image) => {
                    let still_preview = self
                        .inner
                        .state
                        .borrow()
                        .cache
                        .get(square)
                        .is_some_and(|entry| entry.preview);
                    if !still_preview {
                        debug!(square = %square, "square changed during crossfade");
                        return;
                    }
                    deps.layers.borrow_mut().crossfade_to_full(
                        square,
                        &planned.name,
                        RasterOverlay {
                            square,
                            layer: planned.name.clone(),
                            kind: planned.kind,
                            preview: false,
                            bounds,
                            image,
                        },
                    );
                    {
                        let mut state = self.inner.state.borrow_mut();
                        state.overlays.remove(&preview_key);
                        state
                            .overlays
                            .insert(OverlayKey::new(square, &planned.name, false));
                    }
                    deps.metrics.record_crossfade();
                }
                Err(e) => {
                    complete = false;
                    deps.metrics.record_crossfade_failure();
                    warn!(square = %square, layer = %planned.name, error = %e, "crossfade fetch failed; keeping preview");
                }
            }
        }

        if complete {
            if let Some(entry) = self.inner.state.borrow_mut().cache.get_mut(square) {
                entry.preview = false;
            }
            debug!(square = %square, "crossfaded to full resolution");
        }
    }

    /// Full reset: cancels the pending reconciliation, unloads every square and
    /// forgets queue, in-flight loads, targets and viewport.
    pub fn clear(&self) {
        self.inner.debounce.cancel();
        let loaded = self.inner.state.borrow().cache.loaded_squares();
        for id in loaded {
            self.unload_square(id);
        }

        let labelled: Vec<SquareId> = {
            let mut state = self.inner.state.borrow_mut();
            state.queue.clear();
            state.loading.clear();
            state.cache.clear();
            state.targets.clear();
            state.viewport = None;
            state.pending = None;
            state.zoom = None;
            state.labels.drain().map(|(id, _)| id).collect()
        };
        let mut layers = self.inner.deps.layers.borrow_mut();
        for id in labelled {
            layers.remove_labels(id);
        }
        info!("tile loader cleared");
    }

    pub fn stats(&self) -> LoaderStats {
        let state = self.inner.state.borrow();
        let loaded_squares = state.cache.loaded_squares();
        LoaderStats {
            loaded: loaded_squares.len(),
            loaded_squares,
            queue_depth: state.queue.len(),
            in_flight: state.loading.len(),
            cache_size: state.cache.len(),
            target_squares: state.targets.len(),
        }
    }

    pub fn is_loaded(&self, square: SquareId) -> bool {
        self.inner.state.borrow().cache.contains(square)
    }

    pub fn is_in_flight(&self, square: SquareId) -> bool {
        self.inner.state.borrow().loading.contains_key(&square)
    }

    pub fn cache_entry(&self, square: SquareId) -> Option<CacheEntry> {
        self.inner.state.borrow().cache.get(square).cloned()
    }

    /// Queue contents in fetch order.
    pub fn queued(&self) -> Vec<QueuedSquare> {
        self.inner.state.borrow().queue.iter().copied().collect()
    }

    pub fn targets(&self) -> Vec<SquareId> {
        self.inner.state.borrow().targets.clone()
    }

    pub fn viewport(&self) -> Option<Viewport> {
        self.inner.state.borrow().viewport
    }

    pub fn current_zoom(&self) -> Option<f64> {
        self.inner.state.borrow().zoom
    }
}
