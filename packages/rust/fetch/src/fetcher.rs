use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use blackboard_markdown::{ConvertOptions, MediaKind};
use blackboard_shared::{BlackboardError, FetchConfig, Result};
use tracing::{info, instrument, warn};

use crate::reader::{Fetched, ReaderRegistry, SourceReader};
use crate::source::SourceId;

/// Fetches a source and returns it as Markdown text.
///
/// The content cache depends only on this trait.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, source: &SourceId) -> Result<String>;
}

/// Default [`Fetcher`]: scheme-selected reader, retried reads, media-aware conversion.
pub struct MarkdownFetcher {
    readers: ReaderRegistry,
    max_attempts: u32,
    backoff: Duration,
}

impl MarkdownFetcher {
    pub fn new(readers: ReaderRegistry, config: &FetchConfig) -> Self {
        Self {
            readers,
            max_attempts: config.max_attempts.max(1),
            backoff: config.retry_backoff(),
        }
    }

    /// Fetcher with the built-in file and HTTP(S) readers.
    pub fn from_config(config: &FetchConfig) -> Result<Self> {
        Ok(Self::new(ReaderRegistry::with_defaults(config)?, config))
    }

    async fn read_with_retry(
        &self,
        reader: &Arc<dyn SourceReader>,
        source: &SourceId,
    ) -> Result<Fetched> {
        let mut delay = self.backoff;
        let mut attempt = 1;
        loop {
            match reader.read(source).await {
                Ok(fetched) => return Ok(fetched),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    warn!(source = %source, attempt, error = %e, "read failed, retrying");
                    tokio::time::sleep(delay).await;
                    delay = delay.saturating_mul(2);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Fetcher for MarkdownFetcher {
    #[instrument(skip_all, fields(source = %source))]
    async fn fetch(&self, source: &SourceId) -> Result<String> {
        let reader = self.readers.reader_for(source)?;
        let fetched = self.read_with_retry(&reader, source).await?;

        let kind = MediaKind::detect(fetched.content_type.as_deref(), source.url().path())?;
        let opts = ConvertOptions {
            source_url: source.as_str().to_string(),
            kind,
        };

        let converted = tokio::task::spawn_blocking(move || {
            blackboard_markdown::convert(&fetched.bytes, &opts)
        })
        .await
        .map_err(|e| BlackboardError::Conversion(format!("conversion task failed: {e}")))??;

        info!(
            %kind,
            words = converted.word_count,
            title = converted.title.as_deref().unwrap_or(""),
            "source converted"
        );
        Ok(converted.markdown)
    }
}
