use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tinglemap_shared::SquareId;

use crate::error::FetchError;

/// Downloaded image payload, handed to the rendering layer untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    pub url: String,
    pub bytes: Bytes,
    pub content_type: Option<String>,
}

pub type FetchFuture<'a> = Pin<Box<dyn Future<Output = Result<TileImage, FetchError>> + 'a>>;

/// Retrieves tile images by URL.
pub trait TileFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a>;
}

/// Plain HTTP GET. Non-2xx responses are errors; no retries or timeouts beyond the client's own.
#[derive(Clone, Default)]
pub struct HttpTileFetcher {
    client: reqwest::Client,
}

impl HttpTileFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl TileFetcher for HttpTileFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> FetchFuture<'a> {
        Box::pin(async move {
            let resp = self.client.get(url).send().await?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: status.as_u16(),
                });
            }
            let content_type = resp
                .headers()
                .get(reqwest::header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let bytes = resp.bytes().await?;
            Ok(TileImage {
                url: url.to_string(),
                bytes,
                content_type,
            })
        })
    }
}

/// Maps `(square, layer, preview)` to a fetchable image URL.
pub trait UrlResolver {
    fn resolve(&self, square: SquareId, layer: &str, preview: bool) -> String;
}

impl<F> UrlResolver for F
where
    F: Fn(SquareId, &str, bool) -> String,
{
    fn resolve(&self, square: SquareId, layer: &str, preview: bool) -> String {
        self(square, layer, preview)
    }
}

/// Object-store layout `{base}/{full|preview}/{layer}/{layer}_{square}.png`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathUrlResolver {
    base_url: String,
}

impl PathUrlResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl UrlResolver for PathUrlResolver {
    fn resolve(&self, square: SquareId, layer: &str, preview: bool) -> String {
        let variant = if preview { "preview" } else { "full" };
        format!("{}/{variant}/{layer}/{layer}_{square}.png", self.base_url)
    }
}
