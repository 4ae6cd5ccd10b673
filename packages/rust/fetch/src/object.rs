//! Object storage sources (S3, GCS, Azure Blob) through `object_store`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use blackboard_shared::{BlackboardError, ObjectStoreOptions, Result};
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, ObjectStore};
use tracing::{debug, instrument};
use url::Url;

use crate::reader::{Fetched, SourceReader};
use crate::source::SourceId;

/// Schemes served by [`ObjectStoreReader`].
pub const OBJECT_STORE_SCHEMES: &[&str] = &["s3", "gs", "gcs", "abfs", "abfss"];

/// Prefix marking an option value as an environment variable name.
const ENV_PREFIX: &str = "env:";

/// Reads objects from cloud storage. A client is built per read from the
/// `[fetch.object_store.*]` table matching the source scheme.
pub struct ObjectStoreReader {
    options: ObjectStoreOptions,
    max_bytes: u64,
}

impl ObjectStoreReader {
    pub fn new(options: ObjectStoreOptions, max_bytes: u64) -> Self {
        Self { options, max_bytes }
    }

    fn open(&self, source: &SourceId) -> Result<(Box<dyn ObjectStore>, ObjectPath)> {
        let table = self.options.for_scheme(source.scheme()).ok_or_else(|| {
            BlackboardError::fetch(
                source.as_str(),
                format!("'{}' is not an object storage scheme", source.scheme()),
            )
        })?;
        let url = store_url(source)?;
        let options = resolve_options(table)?;

        object_store::parse_url_opts(&url, options)
            .map_err(|e| BlackboardError::fetch(source.as_str(), e.to_string()))
    }
}

#[async_trait]
impl SourceReader for ObjectStoreReader {
    fn schemes(&self) -> &'static [&'static str] {
        OBJECT_STORE_SCHEMES
    }

    #[instrument(skip_all, fields(source = %source))]
    async fn read(&self, source: &SourceId) -> Result<Fetched> {
        let (store, path) = self.open(source)?;
        read_object(store.as_ref(), &path, source.as_str(), self.max_bytes).await
    }
}

async fn read_object(
    store: &dyn ObjectStore,
    path: &ObjectPath,
    id: &str,
    max_bytes: u64,
) -> Result<Fetched> {
    let result = store.get(path).await.map_err(|e| object_error(id, e))?;

    let size = result.meta.size as u64;
    if size > max_bytes {
        return Err(BlackboardError::fetch(
            id,
            format!("object too large ({size} bytes, max {max_bytes})"),
        ));
    }

    let content_type = result
        .attributes
        .get(&Attribute::ContentType)
        .map(|v| v.to_string());
    let bytes = result.bytes().await.map_err(|e| object_error(id, e))?;
    debug!(len = bytes.len(), content_type = ?content_type, "read object");

    Ok(Fetched {
        bytes: bytes.to_vec(),
        content_type,
    })
}

/// Missing objects, bad paths and auth failures are permanent; everything
/// else (network, throttling, server errors) may clear up.
fn object_error(id: &str, e: object_store::Error) -> BlackboardError {
    let message = e.to_string();
    match e {
        object_store::Error::NotFound { .. }
        | object_store::Error::InvalidPath { .. }
        | object_store::Error::PermissionDenied { .. }
        | object_store::Error::Unauthenticated { .. }
        | object_store::Error::NotSupported { .. }
        | object_store::Error::NotImplemented => BlackboardError::fetch(id, message),
        _ => BlackboardError::fetch_transient(id, message),
    }
}

/// `object_store` knows Google Cloud Storage only as `gs://`.
fn store_url(source: &SourceId) -> Result<Url> {
    let url = source.url();
    if url.scheme() != "gcs" {
        return Ok(url.clone());
    }
    let rewritten = format!("gs{}", &url.as_str()["gcs".len()..]);
    Url::parse(&rewritten).map_err(|e| BlackboardError::fetch(source.as_str(), e.to_string()))
}

fn resolve_options(table: &BTreeMap<String, String>) -> Result<Vec<(String, String)>> {
    table
        .iter()
        .map(|(key, value)| match value.strip_prefix(ENV_PREFIX) {
            Some(var) => std::env::var(var)
                .map(|resolved| (key.clone(), resolved))
                .map_err(|_| {
                    BlackboardError::config(format!(
                        "object store option '{key}' names unset env var {var}"
                    ))
                }),
            None => Ok((key.clone(), value.clone())),
        })
        .collect()
}
