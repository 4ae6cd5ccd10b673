//! Canonical source identifiers.
//!
//! Every identifier is reduced to a URL: remote identifiers are parsed and
//! normalized, bare paths become absolute `file://` URLs. Two identifiers
//! naming the same source produce the same canonical string.

use std::fmt;
use std::path::{Component, Path, PathBuf};

use blackboard_shared::{BlackboardError, Result, expand_home};
use url::Url;

/// Schemes with a built-in reader.
pub const READABLE_SCHEMES: &[&str] = &[
    "file", "http", "https", "s3", "gs", "gcs", "abfs", "abfss",
];

/// Schemes accepted as identifiers but without a built-in reader.
pub const RECOGNIZED_SCHEMES: &[&str] = &["sftp", "smb"];

/// A validated, canonical source identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceId {
    url: Url,
}

impl SourceId {
    /// Canonicalize a raw identifier (local path or URL).
    pub fn parse(identifier: &str) -> Result<Self> {
        let raw = identifier.trim();
        if raw.is_empty() {
            return Err(BlackboardError::validation(
                "source identifier must not be empty",
            ));
        }

        let mut url = if raw.contains("://") {
            Url::parse(raw).map_err(|e| {
                BlackboardError::validation(format!("invalid source URL '{raw}': {e}"))
            })?
        } else {
            let path = absolute_lexical(&expand_home(raw)?)?;
            Url::from_file_path(&path).map_err(|()| {
                BlackboardError::validation(format!("cannot express '{raw}' as a file URL"))
            })?
        };

        let scheme = url.scheme().to_string();
        if !READABLE_SCHEMES.contains(&scheme.as_str())
            && !RECOGNIZED_SCHEMES.contains(&scheme.as_str())
        {
            return Err(BlackboardError::validation(format!(
                "unsupported scheme '{scheme}' in '{raw}'"
            )));
        }

        url.set_fragment(None);
        // Non-special schemes keep their host verbatim; fold case here too.
        if let Some(host) = url.host_str().map(str::to_ascii_lowercase) {
            let _ = url.set_host(Some(&host));
        }

        Ok(Self { url })
    }

    /// The canonical form, used as the cache key input.
    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    /// Local filesystem path for `file://` identifiers.
    pub fn to_file_path(&self) -> Result<PathBuf> {
        self.url
            .to_file_path()
            .map_err(|()| BlackboardError::fetch(self.as_str(), "not a local file path"))
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Absolute path with `.` and `..` removed without touching the filesystem.
fn absolute_lexical(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path).map_err(|e| BlackboardError::io(path, e))?;
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}
