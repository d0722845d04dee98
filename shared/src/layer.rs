use serde::{Deserialize, Serialize};

use crate::toggle::ToggleKey;

pub const HIDDEN_AREAS_LAYER: &str = "hidden-areas";
pub const FOG_LAYER_ALIAS: &str = "fog";
pub const BLIGHT_LAYER: &str = "blight";
pub const BASE_LAYER: &str = "base-terrain";
/// Older manifests name the terrain layer `base`.
pub const LEGACY_BASE_LAYER: &str = "base";
pub const REGION_BORDERS_LAYER: &str = "region-borders";
pub const VILLAGE_CIRCLES_PREFIX: &str = "village-circles";
pub const VILLAGE_MARKERS_PREFIX: &str = "village-markers";

/// Image channels a square can carry. Declaration order is load order and
/// stacking order: earlier kinds are registered first and drawn beneath later ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LayerKind {
    HiddenAreas,
    Blight,
    Base,
    RegionBorders,
    VillageCircles,
    VillageMarkers,
}

impl LayerKind {
    pub const ALL: [LayerKind; 6] = [
        LayerKind::HiddenAreas,
        LayerKind::Blight,
        LayerKind::Base,
        LayerKind::RegionBorders,
        LayerKind::VillageCircles,
        LayerKind::VillageMarkers,
    ];

    /// Map a manifest layer name to its kind. Unknown names are `None`.
    pub fn classify(name: &str) -> Option<LayerKind> {
        match name {
            HIDDEN_AREAS_LAYER | FOG_LAYER_ALIAS => Some(LayerKind::HiddenAreas),
            BLIGHT_LAYER => Some(LayerKind::Blight),
            BASE_LAYER | LEGACY_BASE_LAYER => Some(LayerKind::Base),
            REGION_BORDERS_LAYER => Some(LayerKind::RegionBorders),
            n if n.starts_with(VILLAGE_CIRCLES_PREFIX) => Some(LayerKind::VillageCircles),
            n if n.starts_with(VILLAGE_MARKERS_PREFIX) => Some(LayerKind::VillageMarkers),
            _ => None,
        }
    }

    pub fn toggle_key(self) -> ToggleKey {
        match self {
            LayerKind::HiddenAreas => ToggleKey::HiddenAreas,
            LayerKind::Blight => ToggleKey::Blight,
            LayerKind::Base => ToggleKey::Base,
            LayerKind::RegionBorders => ToggleKey::RegionBorders,
            LayerKind::VillageCircles => ToggleKey::VillageCircles,
            LayerKind::VillageMarkers => ToggleKey::VillageMarkers,
        }
    }
}

/// One manifest layer scheduled for loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedLayer {
    pub name: String,
    pub kind: LayerKind,
}

/// Order a square's manifest layers for loading.
///
/// Unknown names are dropped, the legacy `base` layer is used only when
/// `base-terrain` is absent, and names within a kind sort lexicographically.
pub fn plan_layers<S: AsRef<str>>(names: &[S]) -> Vec<PlannedLayer> {
    let has_current_base = names.iter().any(|n| n.as_ref() == BASE_LAYER);

    let mut planned: Vec<PlannedLayer> = names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| !(has_current_base && *name == LEGACY_BASE_LAYER))
        .filter_map(|name| {
            LayerKind::classify(name).map(|kind| PlannedLayer {
                name: name.to_string(),
                kind,
            })
        })
        .collect();

    planned.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.name.cmp(&b.name)));
    planned.dedup_by(|a, b| a.name == b.name);
    planned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(plan: &[PlannedLayer]) -> Vec<&str> {
        plan.iter().map(|p| p.name.as_str()).collect()
    }

    #[test]
    fn fog_then_blight_then_base_regardless_of_manifest_order() {
        let plan = plan_layers(&["base-terrain", "blight", "hidden-areas"]);
        assert_eq!(names(&plan), vec!["hidden-areas", "blight", "base-terrain"]);
    }

    #[test]
    fn full_stack_orders_by_kind_then_name() {
        let plan = plan_layers(&[
            "village-markers-towns",
            "region-borders",
            "village-circles-rudania",
            "base-terrain",
            "village-circles-inariko",
            "fog",
        ]);
        assert_eq!(
            names(&plan),
            vec![
                "fog",
                "base-terrain",
                "region-borders",
                "village-circles-inariko",
                "village-circles-rudania",
                "village-markers-towns",
            ]
        );
    }

    #[test]
    fn legacy_base_used_only_when_current_absent() {
        assert_eq!(names(&plan_layers(&["base", "blight"])), vec!["blight", "base"]);
        assert_eq!(
            names(&plan_layers(&["base", "base-terrain"])),
            vec!["base-terrain"]
        );
    }

    #[test]
    fn unknown_and_duplicate_names_are_dropped() {
        let plan = plan_layers(&["mystery", "blight", "blight"]);
        assert_eq!(names(&plan), vec!["blight"]);
        assert!(plan_layers::<&str>(&[]).is_empty());
    }

    #[test]
    fn every_kind_has_a_toggle() {
        for kind in LayerKind::ALL {
            assert_eq!(kind.toggle_key().as_str(), serde_json::to_value(kind).unwrap());
        }
    }
}
