use std::cell::RefCell;
use std::rc::Rc;

use tinglemap_shared::{Bounds, LayerKind, MapConfig, Quadrant, SquareId, ToggleKey};

use crate::fetch::TileImage;

/// One raster image placed over a square.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterOverlay {
    pub square: SquareId,
    pub layer: String,
    pub kind: LayerKind,
    pub preview: bool,
    pub bounds: Bounds,
    pub image: TileImage,
}

/// Identity of an overlay registered with the rendering layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OverlayKey {
    pub square: SquareId,
    pub layer: String,
    pub preview: bool,
}

impl OverlayKey {
    pub fn new(square: SquareId, layer: &str, preview: bool) -> Self {
        Self {
            square,
            layer: layer.to_string(),
            preview,
        }
    }
}

/// Which labels a square carries at a given zoom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum LabelLevel {
    #[default]
    Hidden,
    Squares,
    /// Square label plus the four quadrant labels.
    Quadrants,
}

impl LabelLevel {
    pub fn for_zoom(zoom: f64, config: &MapConfig) -> Self {
        if zoom >= config.label_zoom_quads {
            LabelLevel::Quadrants
        } else if zoom >= config.label_zoom_squares {
            LabelLevel::Squares
        } else {
            LabelLevel::Hidden
        }
    }
}

/// The rendering layer the map paints through. The core only writes to it.
///
/// Removals must tolerate overlays or labels that were never added.
pub trait LayerRegistry {
    fn add_raster_overlay(&mut self, overlay: RasterOverlay);
    fn remove_raster_overlay(&mut self, square: SquareId, layer: &str, preview: bool);
    fn add_square_label(&mut self, square: SquareId, bounds: Bounds);
    fn add_quadrant_labels(&mut self, square: SquareId, quadrants: &[(Quadrant, Bounds)]);
    fn remove_labels(&mut self, square: SquareId);
    fn set_layer_visibility(&mut self, key: ToggleKey, visible: bool);
    fn update_label_sizes(&mut self, zoom: f64);
    /// Replace the preview overlay of `(square, layer)` with the full-resolution one.
    fn crossfade_to_full(&mut self, square: SquareId, layer: &str, overlay: RasterOverlay);
    fn clear(&mut self);
}

pub type SharedLayers = Rc<RefCell<dyn LayerRegistry>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_level_follows_zoom_thresholds() {
        let config = MapConfig::default();
        assert_eq!(LabelLevel::for_zoom(-3.0, &config), LabelLevel::Hidden);
        assert_eq!(LabelLevel::for_zoom(-2.0, &config), LabelLevel::Squares);
        assert_eq!(LabelLevel::for_zoom(-1.5, &config), LabelLevel::Squares);
        assert_eq!(LabelLevel::for_zoom(-1.0, &config), LabelLevel::Quadrants);
        assert_eq!(LabelLevel::for_zoom(0.0, &config), LabelLevel::Quadrants);
    }
}
