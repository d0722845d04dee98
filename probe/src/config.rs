use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use tinglemap_shared::MapConfig;

pub const DEFAULT_SWEEP_STEPS: usize = 12;
pub const DEFAULT_STEP_PAUSE_MS: u64 = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLocation {
    Url(String),
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub manifest: ManifestLocation,
    pub tile_base_url: String,
    pub map: MapConfig,
    pub sweep_steps: usize,
    pub step_pause: Duration,
}

impl ProbeConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let Some(manifest) = manifest_location() else {
            bail!("set TINGLEMAP_MANIFEST_URL or TINGLEMAP_MANIFEST_PATH");
        };
        let Some(tile_base_url) = tile_base_url() else {
            bail!("TINGLEMAP_TILE_BASE_URL is required");
        };
        let map = match map_config_path() {
            Some(path) => load_map_config(&path)?,
            None => MapConfig::default(),
        };
        Ok(Self {
            manifest,
            tile_base_url,
            map,
            sweep_steps: sweep_steps(),
            step_pause: step_pause(),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// The URL wins when both are set.
pub fn manifest_location() -> Option<ManifestLocation> {
    non_empty_var("TINGLEMAP_MANIFEST_URL")
        .map(ManifestLocation::Url)
        .or_else(|| non_empty_var("TINGLEMAP_MANIFEST_PATH").map(|p| ManifestLocation::Path(p.into())))
}

pub fn tile_base_url() -> Option<String> {
    non_empty_var("TINGLEMAP_TILE_BASE_URL")
}

pub fn map_config_path() -> Option<PathBuf> {
    non_empty_var("TINGLEMAP_CONFIG_PATH").map(PathBuf::from)
}

pub fn sweep_steps() -> usize {
    std::env::var("TINGLEMAP_SWEEP_STEPS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(DEFAULT_SWEEP_STEPS)
}

pub fn step_pause() -> Duration {
    std::env::var("TINGLEMAP_STEP_PAUSE_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(DEFAULT_STEP_PAUSE_MS))
}

pub fn load_map_config(path: &Path) -> anyhow::Result<MapConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading map config {}", path.display()))?;
    MapConfig::from_json_str(&raw).with_context(|| format!("invalid map config {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 6] = [
        "TINGLEMAP_MANIFEST_URL",
        "TINGLEMAP_MANIFEST_PATH",
        "TINGLEMAP_TILE_BASE_URL",
        "TINGLEMAP_CONFIG_PATH",
        "TINGLEMAP_SWEEP_STEPS",
        "TINGLEMAP_STEP_PAUSE_MS",
    ];

    #[test]
    fn defaults_apply_when_unset_or_invalid() {
        temp_env::with_vars_unset(VARS, || {
            assert_eq!(sweep_steps(), DEFAULT_SWEEP_STEPS);
            assert_eq!(step_pause(), Duration::from_millis(DEFAULT_STEP_PAUSE_MS));
            assert!(manifest_location().is_none());
            assert!(ProbeConfig::from_env().is_err());
        });
        temp_env::with_vars(
            [("TINGLEMAP_SWEEP_STEPS", Some("0")), ("TINGLEMAP_STEP_PAUSE_MS", Some("soon"))],
            || {
                assert_eq!(sweep_steps(), DEFAULT_SWEEP_STEPS);
                assert_eq!(step_pause(), Duration::from_millis(DEFAULT_STEP_PAUSE_MS));
            },
        );
    }

    #[test]
    fn manifest_url_takes_precedence_over_path() {
        temp_env::with_vars(
            [
                ("TINGLEMAP_MANIFEST_URL", Some("https://tiles.example/manifest.json")),
                ("TINGLEMAP_MANIFEST_PATH", Some("/srv/manifest.json")),
            ],
            || {
                assert_eq!(
                    manifest_location(),
                    Some(ManifestLocation::Url("https://tiles.example/manifest.json".to_string()))
                );
            },
        );
        temp_env::with_vars(
            [
                ("TINGLEMAP_MANIFEST_URL", Some("  ")),
                ("TINGLEMAP_MANIFEST_PATH", Some("/srv/manifest.json")),
            ],
            || {
                assert_eq!(
                    manifest_location(),
                    Some(ManifestLocation::Path(PathBuf::from("/srv/manifest.json")))
                );
            },
        );
    }

    #[test]
    fn full_config_reads_map_overrides() {
        let path = std::env::temp_dir().join(format!("tinglemap-probe-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "BATCH_SIZE": 4, "DEBOUNCE_MS": 80 }"#).expect("write config");

        temp_env::with_vars(
            [
                ("TINGLEMAP_MANIFEST_PATH", Some("/srv/manifest.json")),
                ("TINGLEMAP_MANIFEST_URL", None),
                ("TINGLEMAP_TILE_BASE_URL", Some("https://tiles.example")),
                ("TINGLEMAP_CONFIG_PATH", path.to_str()),
                ("TINGLEMAP_SWEEP_STEPS", Some("3")),
                ("TINGLEMAP_STEP_PAUSE_MS", Some("25")),
            ],
            || {
                let config = ProbeConfig::from_env().expect("config");
                assert_eq!(config.map.batch_size, 4);
                assert_eq!(config.map.debounce_ms, 80);
                assert_eq!(config.sweep_steps, 3);
                assert_eq!(config.step_pause, Duration::from_millis(25));
                assert_eq!(config.tile_base_url, "https://tiles.example");
            },
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn invalid_map_config_is_reported() {
        let path = std::env::temp_dir().join(format!("tinglemap-probe-bad-{}.json", std::process::id()));
        std::fs::write(&path, r#"{ "SQUARE_W": 0 }"#).expect("write config");
        let err = load_map_config(&path).unwrap_err();
        assert!(err.to_string().contains("invalid map config"));
        let _ = std::fs::remove_file(&path);
    }
}
