//! CSV and JSON renderers, plus the shared Markdown table writer.

use blackboard_shared::{BlackboardError, Result};

/// Render rows as a Markdown table; the first row is the header.
///
/// Short rows are padded to the widest row. Pipes in cells are escaped.
pub(crate) fn render_table(rows: &[Vec<String>]) -> String {
    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    if width == 0 {
        return String::new();
    }

    let line = |row: &[String]| {
        let cells: Vec<String> = (0..width)
            .map(|i| row.get(i).map(|c| escape_cell(c)).unwrap_or_default())
            .collect();
        format!("| {} |\n", cells.join(" | "))
    };

    let mut out = line(rows[0].as_slice());
    out.push_str(&format!("|{}\n", " --- |".repeat(width)));
    for row in &rows[1..] {
        out.push_str(&line(row.as_slice()));
    }
    out
}

fn escape_cell(cell: &str) -> String {
    cell.replace('|', "\\|").replace('\n', " ")
}

/// CSV text to a Markdown table.
pub(crate) fn csv_to_markdown(text: &str) -> Result<String> {
    let rows = parse_csv(text)?;
    Ok(render_table(&rows))
}

/// RFC 4180-style parse: quoted fields, `""` escapes, CRLF or LF rows.
fn parse_csv(text: &str) -> Result<Vec<Vec<String>>> {
    let mut rows = Vec::new();
    let mut row = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, in_quotes) {
            ('"', true) if chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            ('"', true) => in_quotes = false,
            ('"', false) if field.is_empty() => in_quotes = true,
            (',', false) => row.push(std::mem::take(&mut field)),
            ('\r', false) => {}
            ('\n', false) => {
                row.push(std::mem::take(&mut field));
                rows.push(std::mem::take(&mut row));
            }
            (c, _) => field.push(c),
        }
    }

    if in_quotes {
        return Err(BlackboardError::Conversion(
            "CSV has an unterminated quoted field".into(),
        ));
    }
    if !field.is_empty() || !row.is_empty() {
        row.push(field);
        rows.push(row);
    }
    rows.retain(|r| !(r.len() == 1 && r[0].trim().is_empty()));
    Ok(rows)
}

/// JSON text to a pretty-printed fenced block.
pub(crate) fn json_to_markdown(text: &str) -> Result<String> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| BlackboardError::Conversion(format!("invalid JSON: {e}")))?;
    let pretty = serde_json::to_string_pretty(&value)
        .map_err(|e| BlackboardError::Conversion(e.to_string()))?;
    Ok(format!("```json\n{pretty}\n```\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_quoted_fields() {
        let csv = "name,quote\r\nada,\"said \"\"hi\"\", then left\"\nbob,\"a|b\"\n";
        let md = csv_to_markdown(csv).unwrap();
        assert_eq!(
            md,
            "| name | quote |\n| --- | --- |\n| ada | said \"hi\", then left |\n| bob | a\\|b |\n"
        );
    }

    #[test]
    fn csv_ragged_rows_are_padded() {
        let md = csv_to_markdown("a,b,c\n1\n").unwrap();
        assert!(md.ends_with("| 1 |  |  |\n"));
    }

    #[test]
    fn csv_unterminated_quote_fails() {
        assert!(csv_to_markdown("a,\"open\n").is_err());
    }

    #[test]
    fn empty_csv_is_empty() {
        assert_eq!(csv_to_markdown("\n\n").unwrap(), "");
    }

    #[test]
    fn json_is_fenced_and_pretty() {
        let md = json_to_markdown(r#"{"a":[1,2]}"#).unwrap();
        assert!(md.starts_with("```json\n{\n"));
        assert!(md.ends_with("\n```\n"));
        assert!(json_to_markdown("{nope").is_err());
    }
}
