use std::fmt;

use tinglemap_shared::ConfigError;

/// Failure fetching a single resource (tile image or manifest document).
#[derive(Debug)]
pub enum FetchError {
    Http(reqwest::Error),
    Status { url: String, status: u16 },
    Io(std::io::Error),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Http(e) => write!(f, "request failed: {e}"),
            FetchError::Status { url, status } => write!(f, "{url} returned HTTP {status}"),
            FetchError::Io(e) => write!(f, "read failed: {e}"),
        }
    }
}

impl std::error::Error for FetchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FetchError::Http(e) => Some(e),
            FetchError::Io(e) => Some(e),
            FetchError::Status { .. } => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Http(err)
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::Io(err)
    }
}

#[derive(Debug)]
pub enum ManifestError {
    Fetch(FetchError),
    Parse(serde_json::Error),
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::Fetch(e) => write!(f, "manifest fetch failed: {e}"),
            ManifestError::Parse(e) => write!(f, "manifest parse failed: {e}"),
        }
    }
}

impl std::error::Error for ManifestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ManifestError::Fetch(e) => Some(e),
            ManifestError::Parse(e) => Some(e),
        }
    }
}

impl From<FetchError> for ManifestError {
    fn from(err: FetchError) -> Self {
        ManifestError::Fetch(err)
    }
}

impl From<serde_json::Error> for ManifestError {
    fn from(err: serde_json::Error) -> Self {
        ManifestError::Parse(err)
    }
}

impl From<reqwest::Error> for ManifestError {
    fn from(err: reqwest::Error) -> Self {
        ManifestError::Fetch(FetchError::Http(err))
    }
}

impl From<std::io::Error> for ManifestError {
    fn from(err: std::io::Error) -> Self {
        ManifestError::Fetch(FetchError::Io(err))
    }
}

/// Failure reported by the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceError {
    /// The container the map should attach to does not exist.
    MissingContainer(String),
    Mount(String),
}

impl fmt::Display for SurfaceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SurfaceError::MissingContainer(id) => write!(f, "map container '{id}' not found"),
            SurfaceError::Mount(msg) => write!(f, "failed to mount map surface: {msg}"),
        }
    }
}

impl std::error::Error for SurfaceError {}

#[derive(Debug)]
pub enum EngineError {
    AlreadyInitialized,
    Destroyed,
    Config(ConfigError),
    Surface(SurfaceError),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::AlreadyInitialized => f.write_str("map engine is already initialized"),
            EngineError::Destroyed => f.write_str("map engine has been cleaned up"),
            EngineError::Config(e) => write!(f, "{e}"),
            EngineError::Surface(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Config(e) => Some(e),
            EngineError::Surface(e) => Some(e),
            EngineError::AlreadyInitialized | EngineError::Destroyed => None,
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        EngineError::Config(err)
    }
}

impl From<SurfaceError> for EngineError {
    fn from(err: SurfaceError) -> Self {
        EngineError::Surface(err)
    }
}
