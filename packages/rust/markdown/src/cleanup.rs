//! Normalization passes applied to Markdown before it is cached.
//!
//! Each pass is a plain `&str -> String` function; [`normalize`] runs them in
//! order. Code fences are left untouched by passes that rewrite text.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run every pass over converted or hand-written Markdown.
pub(crate) fn normalize(md: &str, base_url: Option<&Url>) -> String {
    let md = demote_extra_h1(md);
    let md = strip_fence_language_prefixes(&md);
    let md = drop_layout_tags(&md);
    let md = absolutize_links(&md, base_url);
    let md = collapse_blank_runs(&md);
    finish_lines(&md)
}

/// Keep the first `# ` heading; later ones become `## `.
fn demote_extra_h1(md: &str) -> String {
    let mut seen_h1 = false;
    map_outside_fences(md, |line| match line.strip_prefix("# ") {
        Some(text) if seen_h1 => format!("## {text}"),
        Some(_) => {
            seen_h1 = true;
            line.to_string()
        }
        None => line.to_string(),
    })
}

/// ```` ```language-rust ```` → ```` ```rust ````.
fn strip_fence_language_prefixes(md: &str) -> String {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^(\s*)```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });
    FENCE_RE.replace_all(md, "$1```$2").into_owned()
}

/// Remove wrapper tags htmd passes through, keeping their text.
fn drop_layout_tags(md: &str) -> String {
    static LAYOUT_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });
    map_outside_fences(md, |line| LAYOUT_TAG_RE.replace_all(line, "").into_owned())
}

/// Resolve relative link targets against the source URL. Images and anchors are kept.
fn absolutize_links(md: &str, base_url: Option<&Url>) -> String {
    static LINK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(!?)\[([^\]]*)\]\(([^)\s]+)\)").expect("valid regex"));

    let Some(base) = base_url else {
        return md.to_string();
    };

    map_outside_fences(md, |line| {
        LINK_RE
            .replace_all(line, |caps: &regex::Captures| {
                let (bang, text, href) = (&caps[1], &caps[2], &caps[3]);
                let keep = !bang.is_empty()
                    || href.starts_with('#')
                    || href.contains("://")
                    || href.starts_with("mailto:");
                if keep {
                    return caps[0].to_string();
                }
                match base.join(href) {
                    Ok(resolved) => format!("[{text}]({resolved})"),
                    Err(_) => caps[0].to_string(),
                }
            })
            .into_owned()
    })
}

/// At most two consecutive blank lines.
fn collapse_blank_runs(md: &str) -> String {
    static BLANKS_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex"));
    BLANKS_RE.replace_all(md, "\n\n\n").into_owned()
}

/// Trim trailing whitespace per line and end with exactly one newline.
fn finish_lines(md: &str) -> String {
    let body = md
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}\n", body.trim_end_matches('\n'))
}

/// Apply `f` to each line that is not inside a fenced code block.
fn map_outside_fences(md: &str, mut f: impl FnMut(&str) -> String) -> String {
    let mut in_fence = false;
    md.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_fence = !in_fence;
                return line.to_string();
            }
            if in_fence { line.to_string() } else { f(line) }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_h1_is_demoted() {
        let out = demote_extra_h1("# One\n\ntext\n\n# Two");
        assert_eq!(out, "# One\n\ntext\n\n## Two");
    }

    #[test]
    fn headings_inside_fences_are_untouched() {
        let input = "# Title\n\n```sh\n# comment\n```";
        assert_eq!(demote_extra_h1(input), input);
    }

    #[test]
    fn fence_prefixes_are_stripped() {
        let out = strip_fence_language_prefixes("```language-python\nprint(1)\n```");
        assert!(out.starts_with("```python\n"));
    }

    #[test]
    fn layout_tags_removed_outside_code() {
        let out = drop_layout_tags("<div class=\"x\">kept</div>\n```html\n<div>raw</div>\n```");
        assert!(out.starts_with("kept\n"));
        assert!(out.contains("<div>raw</div>"));
    }

    #[test]
    fn relative_links_resolved_images_kept() {
        let base = Url::parse("https://docs.example.com/guide/intro").unwrap();
        let out = absolutize_links(
            "[Next](/api/ref) ![logo](img/logo.png) [Top](#top) [Ext](https://x.org/)",
            Some(&base),
        );
        assert!(out.contains("[Next](https://docs.example.com/api/ref)"));
        assert!(out.contains("![logo](img/logo.png)"));
        assert!(out.contains("[Top](#top)"));
        assert!(out.contains("[Ext](https://x.org/)"));
    }

    #[test]
    fn blank_runs_and_trailing_space() {
        let out = normalize("a   \n\n\n\n\n\nb\n\n\n", None);
        assert_eq!(out, "a\n\n\nb\n");
    }
}
