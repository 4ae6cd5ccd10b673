//! Source fetching and conversion to Markdown.
//!
//! [`SourceId`] canonicalizes identifiers, [`ReaderRegistry`] picks a
//! [`SourceReader`] by scheme, and [`MarkdownFetcher`] ties reading and
//! conversion together behind the [`Fetcher`] trait.
//!
//! Built-in readers cover local files, HTTP(S) and object storage
//! (`s3://`, `gs://`, `abfs://`).

mod fetcher;
mod object;
mod reader;
mod source;

pub use fetcher::{Fetcher, MarkdownFetcher};
pub use object::{OBJECT_STORE_SCHEMES, ObjectStoreReader};
pub use reader::{FileReader, Fetched, HttpReader, ReaderRegistry, SourceReader};
pub use source::{READABLE_SCHEMES, RECOGNIZED_SCHEMES, SourceId};
