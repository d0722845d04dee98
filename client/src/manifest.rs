use std::cell::{Cell, OnceCell};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use tinglemap_shared::{Catalog, ManifestDocument, ManifestEntry, SquareId};
use tracing::{debug, info};

use crate::error::{FetchError, ManifestError};

pub type ManifestFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ManifestDocument, ManifestError>> + 'a>>;

/// Where the tile catalog document comes from.
pub trait ManifestSource {
    fn fetch(&self) -> ManifestFuture<'_>;
}

/// GET a JSON manifest over HTTP.
pub struct HttpManifestSource {
    client: reqwest::Client,
    url: String,
}

impl HttpManifestSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), url)
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl ManifestSource for HttpManifestSource {
    fn fetch(&self) -> ManifestFuture<'_> {
        Box::pin(async move {
            let resp = self.client.get(&self.url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: self.url.clone(),
                    status: status.as_u16(),
                }
                .into());
            }
            let bytes = resp.bytes().await?;
            Ok(serde_json::from_slice(&bytes)?)
        })
    }
}

/// Read a JSON manifest from disk.
pub struct FileManifestSource {
    path: PathBuf,
}

impl FileManifestSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ManifestSource for FileManifestSource {
    fn fetch(&self) -> ManifestFuture<'_> {
        Box::pin(async move {
            let bytes = tokio::fs::read(&self.path).await?;
            Ok(serde_json::from_slice(&bytes)?)
        })
    }
}

/// In-memory manifest, mostly for embedding and tests.
pub struct StaticManifestSource {
    document: ManifestDocument,
}

impl StaticManifestSource {
    pub fn new(document: ManifestDocument) -> Self {
        Self { document }
    }
}

impl ManifestSource for StaticManifestSource {
    fn fetch(&self) -> ManifestFuture<'_> {
        let document = self.document.clone();
        Box::pin(async move { Ok(document) })
    }
}

/// The tile catalog, loaded once and read-only afterwards.
///
/// Until a load succeeds every lookup answers "nothing here".
pub struct Manifest {
    source: Box<dyn ManifestSource>,
    catalog: OnceCell<Catalog>,
    progress: Cell<f32>,
}

impl Manifest {
    pub fn new(source: impl ManifestSource + 'static) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn ManifestSource>) -> Self {
        Self {
            source,
            catalog: OnceCell::new(),
            progress: Cell::new(0.0),
        }
    }

    /// Fetch and parse the catalog. A loaded manifest returns immediately;
    /// after a failure the manifest stays unloaded and `load` may be retried.
    pub async fn load(&self) -> Result<(), ManifestError> {
        if self.is_loaded() {
            return Ok(());
        }
        self.progress.set(0.0);

        let document = match self.source.fetch().await {
            Ok(document) => document,
            Err(e) => {
                self.progress.set(0.0);
                return Err(e);
            }
        };

        let catalog = Catalog::from_document(document, |parsed, total| {
            self.progress.set(parsed as f32 / total as f32);
        });
        self.progress.set(1.0);

        if !catalog.skipped().is_empty() {
            debug!(skipped = ?catalog.skipped(), "manifest keys outside the grid ignored");
        }
        info!(
            squares = catalog.len(),
            skipped = catalog.skipped().len(),
            "manifest loaded"
        );
        // A concurrent load may have finished first; both parsed the same document.
        let _ = self.catalog.set(catalog);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.catalog.get().is_some()
    }

    pub fn catalog(&self) -> Option<&Catalog> {
        self.catalog.get()
    }

    /// Fraction of catalog entries parsed, 0.0 to 1.0. Advisory only.
    pub fn loading_progress(&self) -> f32 {
        self.progress.get()
    }

    pub fn get_square(&self, raw_id: &str) -> Option<&ManifestEntry> {
        self.catalog.get().and_then(|c| c.get_str(raw_id))
    }

    pub fn list_layers_for_square(&self, raw_id: &str) -> &[String] {
        self.get_square(raw_id)
            .map(|entry| entry.layers.as_slice())
            .unwrap_or(&[])
    }

    pub fn has_preview(&self, raw_id: &str) -> bool {
        self.get_square(raw_id).is_some_and(|entry| entry.has_preview)
    }

    pub fn square(&self, id: SquareId) -> Option<&ManifestEntry> {
        self.catalog.get().and_then(|c| c.get(id))
    }

    pub fn layers_for(&self, id: SquareId) -> &[String] {
        self.catalog.get().map(|c| c.layers_for(id)).unwrap_or(&[])
    }

    pub fn square_has_preview(&self, id: SquareId) -> bool {
        self.catalog.get().is_some_and(|c| c.has_preview(id))
    }
}
