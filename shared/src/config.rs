use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::geometry::SquareGrid;
use crate::toggle::ToggleKey;

pub const DEFAULT_SQUARE_W: f64 = 2400.0;
pub const DEFAULT_SQUARE_H: f64 = 1666.0;
pub const DEFAULT_MIN_ZOOM: f64 = -3.0;
pub const DEFAULT_MAX_ZOOM: f64 = 0.0;
pub const DEFAULT_DEBOUNCE_MS: u64 = 150;
pub const DEFAULT_SETTLE_DEBOUNCE_MS: u64 = 50;
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_BUFFER_SQUARES: f64 = 0.25;
pub const DEFAULT_CACHE_SQUARES_SOFTCAP: usize = 48;
// Zoom thresholds were tuned by eye for the dashboard map; they are defaults only.
pub const DEFAULT_LABEL_ZOOM_SQUARES: f64 = -2.0;
pub const DEFAULT_LABEL_ZOOM_QUADS: f64 = -1.0;
pub const DEFAULT_CROSSFADE_THRESHOLD: f64 = -1.5;

/// Grid, scheduling and zoom settings for the map viewer.
///
/// Serialized keys use the upper-case names the dashboard config has always used
/// (`SQUARE_W`, `DEBOUNCE_MS`, ...). Missing keys fall back to the defaults above.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", default)]
pub struct MapConfig {
    pub square_w: f64,
    pub square_h: f64,
    pub min_zoom: f64,
    pub max_zoom: f64,
    /// Quiet period after the last viewport update before reconciling.
    pub debounce_ms: u64,
    /// Shorter window used to collapse renderer settle events.
    pub settle_debounce_ms: u64,
    pub batch_size: usize,
    /// Preload margin as a fraction of one square's width/height.
    pub buffer_squares: f64,
    pub cache_squares_softcap: usize,
    /// Hold back buffer-only squares while loaded plus in-flight squares
    /// already fill the soft cap. Off by default.
    pub defer_buffer_at_softcap: bool,
    pub label_zoom_squares: f64,
    pub label_zoom_quads: f64,
    pub crossfade_threshold: f64,
    pub layer_defaults: BTreeMap<ToggleKey, bool>,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            square_w: DEFAULT_SQUARE_W,
            square_h: DEFAULT_SQUARE_H,
            min_zoom: DEFAULT_MIN_ZOOM,
            max_zoom: DEFAULT_MAX_ZOOM,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            settle_debounce_ms: DEFAULT_SETTLE_DEBOUNCE_MS,
            batch_size: DEFAULT_BATCH_SIZE,
            buffer_squares: DEFAULT_BUFFER_SQUARES,
            cache_squares_softcap: DEFAULT_CACHE_SQUARES_SOFTCAP,
            defer_buffer_at_softcap: false,
            label_zoom_squares: DEFAULT_LABEL_ZOOM_SQUARES,
            label_zoom_quads: DEFAULT_LABEL_ZOOM_QUADS,
            crossfade_threshold: DEFAULT_CROSSFADE_THRESHOLD,
            layer_defaults: ToggleKey::ALL
                .into_iter()
                .map(|key| (key, key.default_visibility()))
                .collect(),
        }
    }
}

impl MapConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: MapConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite = [
            ("SQUARE_W", self.square_w),
            ("SQUARE_H", self.square_h),
            ("MIN_ZOOM", self.min_zoom),
            ("MAX_ZOOM", self.max_zoom),
            ("BUFFER_SQUARES", self.buffer_squares),
            ("LABEL_ZOOM_SQUARES", self.label_zoom_squares),
            ("LABEL_ZOOM_QUADS", self.label_zoom_quads),
            ("CROSSFADE_THRESHOLD", self.crossfade_threshold),
        ];
        if let Some(&(key, _)) = finite.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ConfigError::Invalid {
                key,
                reason: "must be a finite number",
            });
        }
        if self.square_w <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "SQUARE_W",
                reason: "must be positive",
            });
        }
        if self.square_h <= 0.0 {
            return Err(ConfigError::Invalid {
                key: "SQUARE_H",
                reason: "must be positive",
            });
        }
        if self.min_zoom > self.max_zoom {
            return Err(ConfigError::Invalid {
                key: "MIN_ZOOM",
                reason: "must not exceed MAX_ZOOM",
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                key: "BATCH_SIZE",
                reason: "must be at least 1",
            });
        }
        if self.buffer_squares < 0.0 {
            return Err(ConfigError::Invalid {
                key: "BUFFER_SQUARES",
                reason: "must not be negative",
            });
        }
        Ok(())
    }

    pub fn grid(&self) -> SquareGrid {
        SquareGrid::new(self.square_w, self.square_h)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn settle_debounce(&self) -> Duration {
        Duration::from_millis(self.settle_debounce_ms)
    }

    pub fn clamp_zoom(&self, zoom: f64) -> f64 {
        zoom.clamp(self.min_zoom, self.max_zoom)
    }

    /// Initial visibility for `key`, falling back to the built-in default
    /// when the config omits it.
    pub fn layer_default(&self, key: ToggleKey) -> bool {
        self.layer_defaults
            .get(&key)
            .copied()
            .unwrap_or_else(|| key.default_visibility())
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Parse(serde_json::Error),
    Invalid {
        key: &'static str,
        reason: &'static str,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Parse(e) => write!(f, "failed to parse map config: {e}"),
            ConfigError::Invalid { key, reason } => write!(f, "invalid map config: {key} {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid { .. } => None,
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = MapConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.debounce(), Duration::from_millis(150));
        assert!(!config.layer_default(ToggleKey::GridLines));
        assert!(config.layer_default(ToggleKey::HiddenAreas));
        assert!(!config.defer_buffer_at_softcap);
    }

    #[test]
    fn upper_case_keys_override_defaults() {
        let config = MapConfig::from_json_str(
            r#"{ "SQUARE_W": 100, "BATCH_SIZE": 3, "CACHE_SQUARES_SOFTCAP": 5,
                 "DEFER_BUFFER_AT_SOFTCAP": true,
                 "LAYER_DEFAULTS": { "grid-lines": true } }"#,
        )
        .expect("valid config");
        assert_eq!(config.square_w, 100.0);
        assert_eq!(config.square_h, DEFAULT_SQUARE_H);
        assert_eq!(config.batch_size, 3);
        assert_eq!(config.cache_squares_softcap, 5);
        assert!(config.defer_buffer_at_softcap);
        assert!(config.layer_default(ToggleKey::GridLines));
        // Omitted keys in a partial LAYER_DEFAULTS map keep the built-in value.
        assert!(config.layer_default(ToggleKey::Blight));
    }

    #[test]
    fn rejects_invalid_values() {
        let err = MapConfig::from_json_str(r#"{ "BATCH_SIZE": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "BATCH_SIZE", .. }));

        let err = MapConfig::from_json_str(r#"{ "MIN_ZOOM": 2, "MAX_ZOOM": 1 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "MIN_ZOOM", .. }));

        let err = MapConfig::from_json_str(r#"{ "SQUARE_H": -4 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SQUARE_H", .. }));

        assert!(matches!(
            MapConfig::from_json_str("not json"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn clamp_zoom_respects_bounds() {
        let config = MapConfig::default();
        assert_eq!(config.clamp_zoom(-10.0), DEFAULT_MIN_ZOOM);
        assert_eq!(config.clamp_zoom(4.0), DEFAULT_MAX_ZOOM);
        assert_eq!(config.clamp_zoom(-1.25), -1.25);
    }
}
