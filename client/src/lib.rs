//! Viewport-driven tile loading and caching for the Tinglebot map.
//!
//! Everything here is single-threaded: build a [`MapEngine`] and drive it
//! from a tokio current-thread runtime inside a `LocalSet`.

pub mod cache;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod layers;
pub mod loader;
pub mod manifest;
pub mod metrics;
pub mod surface;
pub mod toggles;

#[cfg(test)]
mod test_support;

pub use cache::{CacheEntry, SquareCache};
pub use debounce::Debouncer;
pub use engine::{EngineParts, EngineStatus, MapEngine};
pub use error::{EngineError, FetchError, ManifestError, SurfaceError};
pub use fetch::{HttpTileFetcher, PathUrlResolver, TileFetcher, TileImage, UrlResolver};
pub use layers::{LabelLevel, LayerRegistry, OverlayKey, RasterOverlay, SharedLayers};
pub use loader::{LoaderDeps, LoaderStats, QueuedSquare, ReconcilePlan, TileLoader};
pub use manifest::{
    FileManifestSource, HttpManifestSource, Manifest, ManifestSource, StaticManifestSource,
};
pub use metrics::{LayerFailure, LoaderMetrics, MetricsSnapshot};
pub use surface::{ListenerSet, MapEvent, MapSurface, SubscriptionId, ViewportHandler};
pub use toggles::{ListenerId, ListenerScope, ToggleSnapshot, ToggleState};
