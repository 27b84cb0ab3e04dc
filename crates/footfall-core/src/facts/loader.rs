//! CSV and JSON Lines readers for fact files

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use super::{COLUMNS, RawRow, RejectedRow};
use crate::error::{Error, Result};

/// Rows read from a source file, plus lines that could not even be split into fields
#[derive(Debug, Default)]
pub struct ParsedSource {
    pub rows: Vec<RawRow>,
    pub rejected: Vec<RejectedRow>,
}

/// Parse CSV text with a header row naming the fact columns.
///
/// Quoted fields (`"Mall, Phase 2"`) and doubled quotes inside them are
/// supported; fields may not span lines.
pub fn parse_csv(contents: &str) -> Result<ParsedSource> {
    let mut lines = contents
        .lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim_end_matches('\r')))
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header_line) = lines
        .next()
        .ok_or_else(|| Error::DataSource("file is empty".to_string()))?;
    let header = split_csv_line(header_line.trim_start_matches('\u{feff}'))
        .map_err(|reason| Error::DataSource(format!("unreadable header: {}", reason)))?;

    let positions = column_positions(&header)?;
    let mut parsed = ParsedSource::default();

    for (line, text) in lines {
        let fields = match split_csv_line(text) {
            Ok(fields) => fields,
            Err(reason) => {
                warn!(line, reason = %reason, "Skipping unreadable CSV line");
                parsed.rejected.push(RejectedRow { line, reason });
                continue;
            }
        };

        let cell = |column: &str| -> String {
            positions
                .get(column)
                .and_then(|&idx| fields.get(idx))
                .cloned()
                .unwrap_or_default()
        };

        parsed.rows.push(RawRow {
            line,
            date: cell("Date"),
            region: cell("Region"),
            area: cell("Area"),
            site_code: cell("Site Code"),
            site_name: cell("Site Name"),
            total_in: cell("Total In Count"),
            group_count: cell("Group Count"),
            unique_groups: cell("Total Unique Groups"),
        });
    }

    debug!(rows = parsed.rows.len(), "Parsed CSV fact source");
    Ok(parsed)
}

/// Parse JSON Lines text, one object per line keyed by the fact column names
pub fn parse_jsonl(contents: &str) -> Result<ParsedSource> {
    let mut parsed = ParsedSource::default();

    for (idx, text) in contents.lines().enumerate() {
        let line = idx + 1;
        if text.trim().is_empty() {
            continue;
        }

        let object: HashMap<String, Value> = match serde_json::from_str(text) {
            Ok(object) => object,
            Err(e) => {
                warn!(line, error = %e, "Skipping unreadable JSON line");
                parsed.rejected.push(RejectedRow {
                    line,
                    reason: format!("invalid JSON: {}", e),
                });
                continue;
            }
        };

        let cell = |column: &str| object.get(column).map(value_to_cell).unwrap_or_default();

        parsed.rows.push(RawRow {
            line,
            date: cell("Date"),
            region: cell("Region"),
            area: cell("Area"),
            site_code: cell("Site Code"),
            site_name: cell("Site Name"),
            total_in: cell("Total In Count"),
            group_count: cell("Group Count"),
            unique_groups: cell("Total Unique Groups"),
        });
    }

    debug!(rows = parsed.rows.len(), "Parsed JSON Lines fact source");
    Ok(parsed)
}

fn value_to_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn column_positions(header: &[String]) -> Result<HashMap<&'static str, usize>> {
    let mut positions = HashMap::new();
    let mut missing = Vec::new();

    for column in COLUMNS {
        match header.iter().position(|h| h.trim().eq_ignore_ascii_case(column)) {
            Some(idx) => {
                positions.insert(column, idx);
            }
            None => missing.push(column),
        }
    }

    if !missing.is_empty() {
        return Err(Error::DataSource(format!(
            "missing columns: {}",
            missing.join(", ")
        )));
    }

    Ok(positions)
}

fn split_csv_line(line: &str) -> std::result::Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            }
            '"' if field.trim().is_empty() => {
                field.clear();
                in_quotes = true;
            }
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            _ => field.push(c),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(field);
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str =
        "Date,Region,Area,Site Code,Site Name,Total In Count,Group Count,Total Unique Groups";

    #[test]
    fn test_split_csv_line_with_quotes() {
        let fields = split_csv_line(r#"01-05-2025,"North, East","Say ""hi""",x"#).unwrap();
        assert_eq!(fields, vec!["01-05-2025", "North, East", r#"Say "hi""#, "x"]);
    }

    #[test]
    fn test_split_csv_line_unterminated() {
        assert!(split_csv_line(r#"a,"b"#).is_err());
    }

    #[test]
    fn test_parse_csv() {
        let text = format!(
            "{}\n01-05-2025,North,A1,C1,Alpha,10,5,4\n\n02-05-2025,North,A1,C1,Alpha,12,6,5\n",
            HEADER
        );
        let parsed = parse_csv(&text).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0].line, 2);
        assert_eq!(parsed.rows[1].line, 4);
        assert_eq!(parsed.rows[1].total_in, "12");
    }

    #[test]
    fn test_parse_csv_reordered_columns() {
        let text = "Site Name,Date,Region,Area,Site Code,Total Unique Groups,Group Count,Total In Count\n\
                    Alpha,01-05-2025,North,A1,C1,4,5,10\n";
        let parsed = parse_csv(text).unwrap();
        assert_eq!(parsed.rows[0].site_name, "Alpha");
        assert_eq!(parsed.rows[0].total_in, "10");
        assert_eq!(parsed.rows[0].unique_groups, "4");
    }

    #[test]
    fn test_parse_csv_missing_column_is_fatal() {
        let err = parse_csv("Date,Region\n01-05-2025,North\n").unwrap_err();
        assert!(matches!(err, Error::DataSource(_)));
        assert!(err.to_string().contains("Site Name"));
    }

    #[test]
    fn test_parse_csv_short_row_yields_empty_cells() {
        let text = format!("{}\n01-05-2025,North,A1\n", HEADER);
        let parsed = parse_csv(&text).unwrap();
        assert_eq!(parsed.rows[0].site_name, "");
    }

    #[test]
    fn test_parse_jsonl() {
        let text = r#"{"Date":"01-05-2025","Region":"North","Area":"A1","Site Code":"C1","Site Name":"Alpha","Total In Count":10,"Group Count":5,"Total Unique Groups":4}
not json
{"Date":"02-05-2025","Region":"North","Area":"A1","Site Code":7,"Site Name":"Alpha","Total In Count":"12","Group Count":null,"Total Unique Groups":5}"#;
        let parsed = parse_jsonl(text).unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rejected.len(), 1);
        assert_eq!(parsed.rejected[0].line, 2);
        assert_eq!(parsed.rows[0].total_in, "10");
        assert_eq!(parsed.rows[1].site_code, "7");
        assert_eq!(parsed.rows[1].group_count, "");
    }
}
