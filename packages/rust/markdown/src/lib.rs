//! Conversion of fetched source bytes into normalized Markdown.
//!
//! HTML goes through `htmd` after content extraction and table
//! pre-processing; Markdown only gets the cleanup passes; CSV becomes a
//! Markdown table and JSON a pretty-printed fenced block. Binary formats are
//! rejected.

mod cleanup;
mod tabular;

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use blackboard_shared::{BlackboardError, Result};

// ---------------------------------------------------------------------------
// Media kinds
// ---------------------------------------------------------------------------

/// Content formats the converter understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Html,
    Markdown,
    PlainText,
    Csv,
    Json,
}

const BINARY_EXTENSIONS: &[&str] = &[
    "pdf", "png", "jpg", "jpeg", "gif", "bmp", "tiff", "webp", "ico", "doc", "docx", "ppt",
    "pptx", "xls", "xlsx", "odt", "zip", "gz", "tar",
];

impl MediaKind {
    /// Map an HTTP `Content-Type` to a kind.
    ///
    /// Generic types (`text/plain`, `application/octet-stream`) give `None` so
    /// the extension can decide.
    pub fn from_content_type(content_type: &str) -> Result<Option<Self>> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        let kind = match mime.as_str() {
            "text/html" | "application/xhtml+xml" => Some(Self::Html),
            "text/markdown" | "text/x-markdown" => Some(Self::Markdown),
            "text/csv" => Some(Self::Csv),
            "application/json" | "text/json" => Some(Self::Json),
            m if m.ends_with("+json") => Some(Self::Json),
            "application/pdf" | "application/msword" | "application/zip" => {
                return Err(unsupported(&mime));
            }
            m if m.starts_with("image/")
                || m.starts_with("audio/")
                || m.starts_with("video/")
                || m.starts_with("application/vnd.openxmlformats")
                || m.starts_with("application/vnd.ms-") =>
            {
                return Err(unsupported(&mime));
            }
            _ => None,
        };
        Ok(kind)
    }

    /// Map a path or URL path's extension to a kind.
    pub fn from_extension(path: &str) -> Result<Option<Self>> {
        let Some(ext) = Path::new(path).extension().and_then(|e| e.to_str()) else {
            return Ok(None);
        };
        let ext = ext.to_ascii_lowercase();

        let kind = match ext.as_str() {
            "html" | "htm" | "xhtml" => Some(Self::Html),
            "md" | "markdown" | "mdx" => Some(Self::Markdown),
            "txt" | "text" | "log" | "rst" => Some(Self::PlainText),
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            e if BINARY_EXTENSIONS.contains(&e) => return Err(unsupported(e)),
            _ => None,
        };
        Ok(kind)
    }

    /// Content type first, then extension, then plain text.
    pub fn detect(content_type: Option<&str>, path: &str) -> Result<Self> {
        if let Some(kind) = content_type.map(Self::from_content_type).transpose()?.flatten() {
            return Ok(kind);
        }
        Ok(Self::from_extension(path)?.unwrap_or(Self::PlainText))
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Html => "html",
            Self::Markdown => "markdown",
            Self::PlainText => "text",
            Self::Csv => "csv",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

fn unsupported(what: &str) -> BlackboardError {
    BlackboardError::Conversion(format!(
        "unsupported media type '{what}' (supported: html, markdown, text, csv, json)"
    ))
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// Output of [`convert`].
#[derive(Debug, Clone)]
pub struct ConvertResult {
    pub markdown: String,
    /// First H1, when the source has one.
    pub title: Option<String>,
    pub word_count: usize,
}

/// Options for [`convert`].
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    /// Canonical source URL; relative links resolve against it.
    pub source_url: String,
    pub kind: MediaKind,
}

/// Convert raw source bytes to Markdown according to `opts.kind`.
#[instrument(skip_all, fields(url = %opts.source_url, kind = %opts.kind, len = bytes.len()))]
pub fn convert(bytes: &[u8], opts: &ConvertOptions) -> Result<ConvertResult> {
    let text = std::str::from_utf8(bytes).map_err(|e| {
        BlackboardError::Conversion(format!("{} is not valid UTF-8: {e}", opts.source_url))
    })?;
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let base_url = Url::parse(&opts.source_url).ok();

    let markdown = match opts.kind {
        MediaKind::Html => html_to_markdown(text, base_url.as_ref())?,
        MediaKind::Markdown => cleanup::normalize(text, base_url.as_ref()),
        MediaKind::PlainText => text.to_string(),
        MediaKind::Csv => tabular::csv_to_markdown(text)?,
        MediaKind::Json => tabular::json_to_markdown(text)?,
    };

    let title = match opts.kind {
        MediaKind::Html | MediaKind::Markdown => first_heading(&markdown),
        _ => None,
    };
    let word_count = count_words(&markdown);

    debug!(word_count, out_len = markdown.len(), "conversion complete");

    Ok(ConvertResult {
        markdown,
        title,
        word_count,
    })
}

fn html_to_markdown(html: &str, base_url: Option<&Url>) -> Result<String> {
    let content = main_content(html);
    let content = inline_tables(&content);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec![
            "script", "style", "nav", "iframe", "noscript", "svg", "form", "button",
        ])
        .build();

    let raw = converter
        .convert(&content)
        .map_err(|e| BlackboardError::Conversion(format!("htmd conversion failed: {e}")))?;

    debug!(raw_len = raw.len(), "htmd conversion complete");
    Ok(cleanup::normalize(&raw, base_url))
}

// ---------------------------------------------------------------------------
// HTML helpers
// ---------------------------------------------------------------------------

/// Inner HTML of the first matching content container, else `<body>`.
fn main_content(html: &str) -> String {
    const CONTAINERS: &[&str] = &[
        "article .markdown",
        "[role=\"main\"]",
        "main",
        "article",
        "#content",
        ".content",
        "body",
    ];

    let doc = Html::parse_document(html);
    CONTAINERS
        .iter()
        .filter_map(|sel| Selector::parse(sel).ok())
        .find_map(|sel| doc.select(&sel).next().map(|el| el.inner_html()))
        .unwrap_or_else(|| html.to_string())
}

/// Swap each `<table>` for Markdown table text; htmd leaves tables alone.
fn inline_tables(html: &str) -> String {
    static TABLE: LazyLock<Option<Selector>> = LazyLock::new(|| Selector::parse("table").ok());
    let Some(table_sel) = TABLE.as_ref() else {
        return html.to_string();
    };

    let doc = Html::parse_fragment(html);
    let mut out = html.to_string();
    for table in doc.select(table_sel) {
        let rows = table_rows(&table);
        let replacement = format!("\n\n{}\n", tabular::render_table(&rows));
        out = out.replacen(&table.html(), &replacement, 1);
    }
    out
}

fn table_rows(table: &ElementRef) -> Vec<Vec<String>> {
    static ROW: LazyLock<Option<Selector>> = LazyLock::new(|| Selector::parse("tr").ok());
    static CELL: LazyLock<Option<Selector>> = LazyLock::new(|| Selector::parse("th, td").ok());
    let (Some(row_sel), Some(cell_sel)) = (ROW.as_ref(), CELL.as_ref()) else {
        return Vec::new();
    };

    table
        .select(row_sel)
        .map(|tr| {
            tr.select(cell_sel)
                .map(|cell| {
                    cell.text()
                        .collect::<String>()
                        .split_whitespace()
                        .collect::<Vec<_>>()
                        .join(" ")
                })
                .collect::<Vec<_>>()
        })
        .filter(|row| !row.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

fn first_heading(md: &str) -> Option<String> {
    static H1_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?m)^# (.+)$").expect("valid regex"));
    H1_RE.captures(md).map(|c| c[1].trim().to_string())
}

/// Words outside fenced code blocks.
fn count_words(md: &str) -> usize {
    static FENCED_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid regex"));
    FENCED_RE
        .replace_all(md, "")
        .split_whitespace()
        .filter(|w| w.chars().any(char::is_alphanumeric))
        .count()
}
