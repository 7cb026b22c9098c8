//! Fetching scripts, project documents, and remote results.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;

/// Failure fetching a resource.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport failure.
    #[error("request to {url} failed")]
    Http {
        /// Requested URL.
        url: Url,
        /// Client error.
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status.
    #[error("{url} answered with status {status}")]
    Status {
        /// Requested URL.
        url: Url,
        /// HTTP status code.
        status: u16,
    },

    /// Local file could not be read.
    #[error("cannot read {url}")]
    Io {
        /// Requested URL.
        url: Url,
        /// Filesystem error.
        #[source]
        source: std::io::Error,
    },

    /// The string was not a URL.
    #[error("invalid URL '{input}'")]
    InvalidUrl {
        /// Text received.
        input: String,
        /// Parse error.
        #[source]
        source: url::ParseError,
    },

    /// Neither `http(s)` nor `file`.
    #[error("unsupported URL scheme '{0}'")]
    UnsupportedScheme(String),

    /// A `file` URL outside the served directory, or file URLs are disabled.
    #[error("{url} is not served")]
    NotServed {
        /// Requested URL.
        url: Url,
    },
}

/// Parse user-supplied text as a URL.
pub fn parse_url(input: &str) -> Result<Url, FetchError> {
    Url::parse(input.trim()).map_err(|source| FetchError::InvalidUrl {
        input: input.to_owned(),
        source,
    })
}

/// Reads text or bytes behind a URL.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    /// Fetch raw bytes.
    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes, FetchError>;

    /// Fetch UTF-8 text. Invalid sequences are replaced.
    async fn fetch_text(&self, url: &Url) -> Result<String, FetchError> {
        let bytes = self.fetch_bytes(url).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Fetcher for `http` and `https` URLs, and `file` URLs below one directory.
///
/// URLs come from clients, so `file` URLs are refused unless a root was
/// configured with [`HttpFetcher::with_file_root`].
#[derive(Clone, Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    file_root: Option<PathBuf>,
}

impl HttpFetcher {
    /// Fetcher with a 30 second request timeout.
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self::with_client(client)
    }

    /// Fetcher using an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            file_root: None,
        }
    }

    /// Serve `file` URLs that resolve inside `root`.
    #[must_use]
    pub fn with_file_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.file_root = Some(root.into());
        self
    }

    /// Resolve a `file` URL to a path inside the served root.
    async fn served_path(&self, url: &Url) -> Result<PathBuf, FetchError> {
        let not_served = || FetchError::NotServed { url: url.clone() };
        let root = self.file_root.as_deref().ok_or_else(not_served)?;
        let path = url.to_file_path().map_err(|()| not_served())?;
        let root = canonical(root, url).await?;
        // lexical check first so nothing outside the root is touched
        if !path.starts_with(&root) {
            return Err(not_served());
        }
        let resolved = canonical(&path, url).await?;
        if resolved.starts_with(&root) {
            Ok(resolved)
        } else {
            Err(not_served())
        }
    }
}

async fn canonical(path: &Path, url: &Url) -> Result<PathBuf, FetchError> {
    tokio::fs::canonicalize(path)
        .await
        .map_err(|source| FetchError::Io {
            url: url.clone(),
            source,
        })
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn fetch_bytes(&self, url: &Url) -> Result<Bytes, FetchError> {
        debug!(%url, "fetching resource");
        match url.scheme() {
            "http" | "https" => {
                let http = |source| FetchError::Http {
                    url: url.clone(),
                    source,
                };
                let response = self.client.get(url.clone()).send().await.map_err(http)?;
                let status = response.status();
                if !status.is_success() {
                    return Err(FetchError::Status {
                        url: url.clone(),
                        status: status.as_u16(),
                    });
                }
                response.bytes().await.map_err(http)
            }
            "file" => {
                let path = self.served_path(url).await?;
                tokio::fs::read(&path)
                    .await
                    .map(Bytes::from)
                    .map_err(|source| FetchError::Io {
                        url: url.clone(),
                        source,
                    })
            }
            other => Err(FetchError::UnsupportedScheme(other.to_owned())),
        }
    }
}
