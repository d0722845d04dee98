//! Recording fakes shared by the async tests.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use tinglemap_shared::{
    Bounds, ManifestDocument, ManifestEntry, Quadrant, SquareId, ToggleKey, Viewport,
};

use crate::error::{FetchError, SurfaceError};
use crate::fetch::{FetchFuture, TileFetcher, TileImage};
use crate::layers::{LayerRegistry, OverlayKey, RasterOverlay};
use crate::manifest::{Manifest, StaticManifestSource};
use crate::surface::{ListenerSet, MapEvent, MapSurface, SubscriptionId, ViewportHandler};

pub fn sq(raw: &str) -> SquareId {
    SquareId::parse(raw).expect("valid square id")
}

pub fn document(entries: &[(&str, &[&str], bool)]) -> ManifestDocument {
    entries
        .iter()
        .map(|(id, layers, has_preview)| {
            (
                id.to_string(),
                ManifestEntry {
                    layers: layers.iter().map(|l| l.to_string()).collect(),
                    has_preview: *has_preview,
                },
            )
        })
        .collect()
}

pub async fn loaded_manifest(doc: ManifestDocument) -> Rc<Manifest> {
    let manifest = Manifest::new(StaticManifestSource::new(doc));
    manifest.load().await.expect("static manifest loads");
    Rc::new(manifest)
}

pub fn test_url(square: SquareId, layer: &str, preview: bool) -> String {
    let variant = if preview { "preview" } else { "full" };
    format!("tiles://{variant}/{layer}/{square}")
}

/// Let spawned local tasks and timers run to completion.
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(10)).await;
}

#[derive(Debug, Clone, PartialEq)]
pub enum LayerCall {
    AddOverlay {
        square: SquareId,
        layer: String,
        preview: bool,
    },
    RemoveOverlay {
        square: SquareId,
        layer: String,
        preview: bool,
    },
    AddSquareLabel(SquareId),
    AddQuadrantLabels(SquareId),
    RemoveLabels(SquareId),
    Visibility(ToggleKey, bool),
    LabelSizes(f64),
    Crossfade {
        square: SquareId,
        layer: String,
    },
    Clear,
}

#[derive(Default)]
pub struct RecordingLayers {
    pub calls: Vec<LayerCall>,
    pub overlays: HashSet<OverlayKey>,
    pub square_labels: HashSet<SquareId>,
    pub quadrant_labels: HashSet<SquareId>,
    pub visibility: HashMap<ToggleKey, bool>,
}

impl RecordingLayers {
    pub fn shared() -> Rc<RefCell<RecordingLayers>> {
        Rc::new(RefCell::new(Self::default()))
    }

    pub fn overlays_for(&self, square: SquareId) -> Vec<&OverlayKey> {
        self.overlays.iter().filter(|k| k.square == square).collect()
    }

    pub fn has_labels(&self, square: SquareId) -> bool {
        self.square_labels.contains(&square) || self.quadrant_labels.contains(&square)
    }

    /// Layer names in the order their overlays were added for `square`.
    pub fn added_layers(&self, square: SquareId) -> Vec<String> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                LayerCall::AddOverlay { square: s, layer, .. } if *s == square => Some(layer.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&LayerCall) -> bool) -> usize {
        self.calls.iter().filter(|call| pred(call)).count()
    }
}

impl LayerRegistry for RecordingLayers {
    fn add_raster_overlay(&mut self, overlay: RasterOverlay) {
        self.overlays
            .insert(OverlayKey::new(overlay.square, &overlay.layer, overlay.preview));
        self.calls.push(LayerCall::AddOverlay {
            square: overlay.square,
            layer: overlay.layer,
            preview: overlay.preview,
        });
    }

    fn remove_raster_overlay(&mut self, square: SquareId, layer: &str, preview: bool) {
        self.overlays.remove(&OverlayKey::new(square, layer, preview));
        self.calls.push(LayerCall::RemoveOverlay {
            square,
            layer: layer.to_string(),
            preview,
        });
    }

    fn add_square_label(&mut self, square: SquareId, _bounds: Bounds) {
        self.square_labels.insert(square);
        self.calls.push(LayerCall::AddSquareLabel(square));
    }

    fn add_quadrant_labels(&mut self, square: SquareId, quadrants: &[(Quadrant, Bounds)]) {
        assert_eq!(quadrants.len(), 4);
        self.quadrant_labels.insert(square);
        self.calls.push(LayerCall::AddQuadrantLabels(square));
    }

    fn remove_labels(&mut self, square: SquareId) {
        self.square_labels.remove(&square);
        self.quadrant_labels.remove(&square);
        self.calls.push(LayerCall::RemoveLabels(square));
    }

    fn set_layer_visibility(&mut self, key: ToggleKey, visible: bool) {
        self.visibility.insert(key, visible);
        self.calls.push(LayerCall::Visibility(key, visible));
    }

    fn update_label_sizes(&mut self, zoom: f64) {
        self.calls.push(LayerCall::LabelSizes(zoom));
    }

    fn crossfade_to_full(&mut self, square: SquareId, layer: &str, overlay: RasterOverlay) {
        assert!(!overlay.preview);
        self.overlays.remove(&OverlayKey::new(square, layer, true));
        self.overlays.insert(OverlayKey::new(square, layer, false));
        self.calls.push(LayerCall::Crossfade {
            square,
            layer: layer.to_string(),
        });
    }

    fn clear(&mut self) {
        self.overlays.clear();
        self.square_labels.clear();
        self.quadrant_labels.clear();
        self.calls.push(LayerCall::Clear);
    }
}

/// Serves every URL after an optional delay; URLs containing a failing
/// pattern get a 503.
#[derive(Default)]
pub struct FakeFetcher {
    delays: Vec<(String, Duration)>,
    failing: Vec<String>,
    failing_once: RefCell<Vec<String>>,
    pub log: RefCell<Vec<String>>,
    active: Cell<usize>,
    pub max_active: Cell<usize>,
}

impl FakeFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, pattern: &str, delay: Duration) -> Self {
        self.delays.push((pattern.to_string(), delay));
        self
    }

    pub fn failing(mut self, pattern: &str) -> Self {
        self.failing.push(pattern.to_string());
        self
    }

    /// The first matching fetch gets a 503; later ones succeed.
    pub fn failing_once(self, pattern: &str) -> Self {
        self.failing_once.borrow_mut().push(pattern.to_string());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn fetch_count(&self, pattern: &str) -> usize {
        self.log.borrow().iter().filter(|u| u.contains(pattern)).count()
    }
}

impl TileFetcher for FakeFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            self.log.borrow_mut().push(url.to_string());
            self.active.set(self.active.get() + 1);
            self.max_active
                .set(self.max_active.get().max(self.active.get()));

            let delay = self
                .delays
                .iter()
                .find(|(pattern, _)| url.contains(pattern.as_str()))
                .map(|(_, d)| *d);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.active.set(self.active.get() - 1);

            let failed_once = {
                let mut once = self.failing_once.borrow_mut();
                match once.iter().position(|p| url.contains(p.as_str())) {
                    Some(i) => {
                        once.remove(i);
                        true
                    }
                    None => false,
                }
            };
            if failed_once || self.failing.iter().any(|p| url.contains(p.as_str())) {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: 503,
                });
            }
            Ok(TileImage {
                url: url.to_string(),
                bytes: Bytes::from(url.as_bytes().to_vec()),
                content_type: Some("image/png".to_string()),
            })
        })
    }
}

#[derive(Default)]
pub struct SurfaceState {
    pub fail_mount: Option<SurfaceError>,
    pub mounted: bool,
    pub released: bool,
    pub view: Option<Viewport>,
    pub listeners: ListenerSet,
}

/// Clone handle; tests keep one copy to emit events into the engine's.
#[derive(Clone, Default)]
pub struct FakeSurface {
    pub state: Rc<RefCell<SurfaceState>>,
}

impl FakeSurface {
    pub fn with_view(view: Viewport) -> Self {
        let surface = Self::default();
        surface.state.borrow_mut().view = Some(view);
        surface
    }

    pub fn failing_mount(err: SurfaceError) -> Self {
        let surface = Self::default();
        surface.state.borrow_mut().fail_mount = Some(err);
        surface
    }

    pub fn emit(&self, event: MapEvent, view: Viewport) {
        self.state.borrow_mut().view = Some(view);
        let handlers = self.state.borrow().listeners.handlers_for(event);
        for handler in handlers {
            handler(view);
        }
    }

    pub fn listener_count(&self) -> usize {
        self.state.borrow().listeners.len()
    }
}

impl MapSurface for FakeSurface {
    fn mount(&mut self) -> Result<(), SurfaceError> {
        let mut state = self.state.borrow_mut();
        if let Some(err) = state.fail_mount.clone() {
            return Err(err);
        }
        state.mounted = true;
        Ok(())
    }

    fn add_event_listener(&mut self, event: MapEvent, handler: ViewportHandler) -> SubscriptionId {
        self.state.borrow_mut().listeners.add(event, handler)
    }

    fn remove_event_listener(&mut self, id: SubscriptionId) -> bool {
        self.state.borrow_mut().listeners.remove(id)
    }

    fn current_view(&self) -> Viewport {
        self.state
            .borrow()
            .view
            .unwrap_or_else(|| Viewport::new(Bounds::new(0.0, 0.0, 1.0, 1.0), -3.0))
    }

    fn release(&mut self) {
        let mut state = self.state.borrow_mut();
        state.mounted = false;
        state.released = true;
        state.listeners.clear();
    }
}
