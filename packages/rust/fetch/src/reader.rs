//! Byte-level source readers, selected by URL scheme.

use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blackboard_shared::{BlackboardError, FetchConfig, Result};
use reqwest::{Client, StatusCode};
use tracing::{debug, instrument};

use crate::object::ObjectStoreReader;
use crate::source::{READABLE_SCHEMES, SourceId};

/// Maximum number of redirects followed by [`HttpReader`].
const MAX_REDIRECTS: usize = 5;

/// User-Agent sent by [`HttpReader`].
const USER_AGENT: &str = concat!("Blackboard/", env!("CARGO_PKG_VERSION"));

/// Raw bytes read from a source, with the transport's content type if any.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// A backend able to read sources of some URL schemes.
#[async_trait]
pub trait SourceReader: Send + Sync {
    /// URL schemes this reader handles.
    fn schemes(&self) -> &'static [&'static str];

    /// Read the full contents of `source`.
    async fn read(&self, source: &SourceId) -> Result<Fetched>;
}

// ---------------------------------------------------------------------------
// Local files
// ---------------------------------------------------------------------------

/// Reads `file://` sources from the local filesystem.
pub struct FileReader {
    max_bytes: u64,
}

impl FileReader {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

#[async_trait]
impl SourceReader for FileReader {
    fn schemes(&self) -> &'static [&'static str] {
        &["file"]
    }

    #[instrument(skip_all, fields(source = %source))]
    async fn read(&self, source: &SourceId) -> Result<Fetched> {
        let path = source.to_file_path()?;
        let meta = tokio::fs::metadata(&path)
            .await
            .map_err(|e| io_error(source, &e))?;

        if !meta.is_file() {
            return Err(BlackboardError::fetch(source.as_str(), "not a regular file"));
        }
        if meta.len() > self.max_bytes {
            return Err(BlackboardError::fetch(
                source.as_str(),
                format!("file too large ({} bytes, max {})", meta.len(), self.max_bytes),
            ));
        }

        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| io_error(source, &e))?;
        debug!(len = bytes.len(), "read local file");

        Ok(Fetched {
            bytes,
            content_type: None,
        })
    }
}

/// Missing or forbidden files stay that way; other I/O errors may clear up.
fn io_error(source: &SourceId, e: &std::io::Error) -> BlackboardError {
    match e.kind() {
        ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
            BlackboardError::fetch(source.as_str(), e.to_string())
        }
        _ => BlackboardError::fetch_transient(source.as_str(), e.to_string()),
    }
}

// ---------------------------------------------------------------------------
// HTTP(S)
// ---------------------------------------------------------------------------

/// Reads `http://` and `https://` sources with a shared reqwest client.
pub struct HttpReader {
    client: Client,
    max_bytes: u64,
}

impl HttpReader {
    pub fn new(request_timeout: Duration, max_bytes: u64) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(request_timeout)
            .build()
            .map_err(|e| BlackboardError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, max_bytes })
    }
}

#[async_trait]
impl SourceReader for HttpReader {
    fn schemes(&self) -> &'static [&'static str] {
        &["http", "https"]
    }

    #[instrument(skip_all, fields(source = %source))]
    async fn read(&self, source: &SourceId) -> Result<Fetched> {
        let id = source.as_str();
        let mut response = self
            .client
            .get(source.url().clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_builder() || e.is_redirect() {
                    BlackboardError::fetch(id, e.to_string())
                } else {
                    BlackboardError::fetch_transient(id, e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let message = format!("HTTP {status}");
            return Err(if retryable_status(status) {
                BlackboardError::fetch_transient(id, message)
            } else {
                BlackboardError::fetch(id, message)
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(BlackboardError::fetch(
                    id,
                    format!("response too large ({len} bytes, max {})", self.max_bytes),
                ));
            }
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| BlackboardError::fetch_transient(id, format!("failed to read body: {e}")))?
        {
            if (bytes.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(BlackboardError::fetch(
                    id,
                    format!("response exceeds {} bytes", self.max_bytes),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }

        debug!(%status, len = bytes.len(), content_type = ?content_type, "fetched");
        Ok(Fetched {
            bytes,
            content_type,
        })
    }
}

fn retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Scheme-indexed set of readers. Later registrations win.
#[derive(Default, Clone)]
pub struct ReaderRegistry {
    readers: Vec<Arc<dyn SourceReader>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// File, HTTP(S) and object storage readers configured from `[fetch]`.
    pub fn with_defaults(config: &FetchConfig) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(FileReader::new(config.max_response_bytes)));
        registry.register(Arc::new(HttpReader::new(
            config.request_timeout(),
            config.max_response_bytes,
        )?));
        registry.register(Arc::new(ObjectStoreReader::new(
            config.object_store.clone(),
            config.max_response_bytes,
        )));
        Ok(registry)
    }

    pub fn register(&mut self, reader: Arc<dyn SourceReader>) {
        self.readers.push(reader);
    }

    /// The reader for `source`'s scheme, or a Fetch error naming what is supported.
    pub fn reader_for(&self, source: &SourceId) -> Result<Arc<dyn SourceReader>> {
        self.readers
            .iter()
            .rev()
            .find(|r| r.schemes().contains(&source.scheme()))
            .cloned()
            .ok_or_else(|| {
                BlackboardError::fetch(
                    source.as_str(),
                    format!(
                        "no reader for scheme '{}' (supported: {})",
                        source.scheme(),
                        READABLE_SCHEMES.join(", ")
                    ),
                )
            })
    }
}
