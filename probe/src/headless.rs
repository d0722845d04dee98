use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use tinglemap_client::{
    LayerRegistry, ListenerSet, MapEvent, MapSurface, OverlayKey, RasterOverlay, SubscriptionId,
    SurfaceError, ViewportHandler,
};
use tinglemap_shared::{
    Bounds, GRID_COLUMNS, GRID_ROWS, Quadrant, SquareGrid, SquareId, ToggleKey, Viewport,
};
use tracing::{debug, trace};

struct HeadlessState {
    view: Viewport,
    mounted: bool,
    listeners: ListenerSet,
}

/// A map surface with no window: the probe moves it by hand and it fires
/// the same settle events a real renderer would.
#[derive(Clone)]
pub struct HeadlessSurface {
    state: Rc<RefCell<HeadlessState>>,
}

impl HeadlessSurface {
    pub fn new(view: Viewport) -> Self {
        Self {
            state: Rc::new(RefCell::new(HeadlessState {
                view,
                mounted: false,
                listeners: ListenerSet::new(),
            })),
        }
    }

    pub fn pan_to(&self, bounds: Bounds) {
        let view = {
            let mut state = self.state.borrow_mut();
            state.view.bounds = bounds;
            state.view
        };
        self.emit(MapEvent::MoveEnd, view);
    }

    /// Zoom about the current center; bounds shrink or grow by 2^Δzoom.
    pub fn zoom_to(&self, zoom: f64) {
        let view = {
            let mut state = self.state.borrow_mut();
            let scale = 2f64.powf(state.view.zoom - zoom);
            let center = state.view.bounds.center();
            let half_w = state.view.bounds.width() * scale * 0.5;
            let half_h = state.view.bounds.height() * scale * 0.5;
            state.view = Viewport::new(
                Bounds::new(center.x - half_w, center.y - half_h, center.x + half_w, center.y + half_h),
                zoom,
            );
            state.view
        };
        self.emit(MapEvent::ZoomEnd, view);
    }

    fn emit(&self, event: MapEvent, view: Viewport) {
        let handlers = {
            let state = self.state.borrow();
            if !state.mounted {
                return;
            }
            state.listeners.handlers_for(event)
        };
        for handler in handlers {
            handler(view);
        }
    }
}

impl MapSurface for HeadlessSurface {
    fn mount(&mut self) -> Result<(), SurfaceError> {
        let mut state = self.state.borrow_mut();
        if !state.view.bounds.is_finite() {
            return Err(SurfaceError::Mount("initial view is not finite".to_string()));
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
        self.state.borrow().view
    }

    fn release(&mut self) {
        let mut state = self.state.borrow_mut();
        state.mounted = false;
        state.listeners.clear();
    }
}

/// Rendering layer that only keeps books and logs what it is asked to draw.
#[derive(Default)]
pub struct TracingLayers {
    overlays: HashSet<OverlayKey>,
    labelled: HashSet<SquareId>,
    bytes_received: u64,
    crossfades: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerSummary {
    pub overlays: usize,
    pub labelled_squares: usize,
    pub bytes_received: u64,
    pub crossfades: u64,
}

impl TracingLayers {
    pub fn summary(&self) -> LayerSummary {
        LayerSummary {
            overlays: self.overlays.len(),
            labelled_squares: self.labelled.len(),
            bytes_received: self.bytes_received,
            crossfades: self.crossfades,
        }
    }
}

impl LayerRegistry for TracingLayers {
    fn add_raster_overlay(&mut self, overlay: RasterOverlay) {
        trace!(
            square = %overlay.square,
            layer = %overlay.layer,
            preview = overlay.preview,
            bytes = overlay.image.bytes.len(),
            "draw overlay"
        );
        self.bytes_received += overlay.image.bytes.len() as u64;
        self.overlays
            .insert(OverlayKey::new(overlay.square, &overlay.layer, overlay.preview));
    }

    fn remove_raster_overlay(&mut self, square: SquareId, layer: &str, preview: bool) {
        if self.overlays.remove(&OverlayKey::new(square, layer, preview)) {
            trace!(square = %square, layer, preview, "erase overlay");
        }
    }

    fn add_square_label(&mut self, square: SquareId, _bounds: Bounds) {
        self.labelled.insert(square);
    }

    fn add_quadrant_labels(&mut self, square: SquareId, _quadrants: &[(Quadrant, Bounds)]) {
        self.labelled.insert(square);
    }

    fn remove_labels(&mut self, square: SquareId) {
        self.labelled.remove(&square);
    }

    fn set_layer_visibility(&mut self, key: ToggleKey, visible: bool) {
        debug!(key = %key, visible, "layer visibility");
    }

    fn update_label_sizes(&mut self, zoom: f64) {
        trace!(zoom, "label sizes");
    }

    fn crossfade_to_full(&mut self, square: SquareId, layer: &str, overlay: RasterOverlay) {
        self.overlays.remove(&OverlayKey::new(square, layer, true));
        self.add_raster_overlay(overlay);
        self.crossfades += 1;
    }

    fn clear(&mut self) {
        self.overlays.clear();
        self.labelled.clear();
    }
}

/// Viewports of `width` x `height` walking the grid row by row, alternating
/// direction on each row, sampled at `steps` evenly spaced squares.
pub fn sweep_viewports(grid: &SquareGrid, width: f64, height: f64, steps: usize) -> Vec<Bounds> {
    let path: Vec<SquareId> = (1..=GRID_ROWS)
        .flat_map(|row| {
            let cols: Vec<u8> = if row % 2 == 1 {
                (0..GRID_COLUMNS.len() as u8).collect()
            } else {
                (0..GRID_COLUMNS.len() as u8).rev().collect()
            };
            cols.into_iter().filter_map(move |col| SquareId::new(col, row))
        })
        .collect();
    if steps == 0 || path.is_empty() {
        return Vec::new();
    }

    (0..steps)
        .map(|i| {
            let idx = if steps == 1 { 0 } else { i * (path.len() - 1) / (steps - 1) };
            let center = grid.square_bounds(path[idx]).center();
            Bounds::new(
                center.x - width * 0.5,
                center.y - height * 0.5,
                center.x + width * 0.5,
                center.y + height * 0.5,
            )
        })
        .collect()
}
