use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Visibility switches exposed by the map viewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ToggleKey {
    HiddenAreas,
    Blight,
    Base,
    RegionBorders,
    VillageCircles,
    VillageMarkers,
    GridLines,
    SquareLabels,
    QuadrantLabels,
}

impl ToggleKey {
    pub const ALL: [ToggleKey; 9] = [
        ToggleKey::HiddenAreas,
        ToggleKey::Blight,
        ToggleKey::Base,
        ToggleKey::RegionBorders,
        ToggleKey::VillageCircles,
        ToggleKey::VillageMarkers,
        ToggleKey::GridLines,
        ToggleKey::SquareLabels,
        ToggleKey::QuadrantLabels,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToggleKey::HiddenAreas => "hidden-areas",
            ToggleKey::Blight => "blight",
            ToggleKey::Base => "base",
            ToggleKey::RegionBorders => "region-borders",
            ToggleKey::VillageCircles => "village-circles",
            ToggleKey::VillageMarkers => "village-markers",
            ToggleKey::GridLines => "grid-lines",
            ToggleKey::SquareLabels => "square-labels",
            ToggleKey::QuadrantLabels => "quadrant-labels",
        }
    }

    /// Built-in visibility before any configuration or restored state.
    pub fn default_visibility(self) -> bool {
        !matches!(self, ToggleKey::GridLines)
    }
}

impl fmt::Display for ToggleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownToggleKey(pub String);

impl fmt::Display for UnknownToggleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown toggle key '{}'", self.0)
    }
}

impl std::error::Error for UnknownToggleKey {}

impl FromStr for ToggleKey {
    type Err = UnknownToggleKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ToggleKey::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| UnknownToggleKey(s.to_string()))
    }
}
