pub mod config;
pub mod geometry;
pub mod layer;
pub mod manifest;
pub mod toggle;

pub use config::*;
pub use geometry::*;
pub use layer::*;
pub use manifest::*;
pub use toggle::ToggleKey;
