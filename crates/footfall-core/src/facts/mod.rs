//! Fact table - normalized in-memory view of visitor observations
//!
//! Every observation carries a date, its place in the region/area hierarchy,
//! the site it was recorded at and three visitor counters. Source rows are
//! normalized once on load; a row whose counters cannot be coerced to
//! non-negative integers is skipped and remembered as rejected.

mod loader;

use std::ops::{Add, AddAssign};
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};

pub use loader::{ParsedSource, parse_csv, parse_jsonl};

/// Source column names, in the order the spreadsheet export uses
pub const COLUMNS: [&str; 8] = [
    "Date",
    "Region",
    "Area",
    "Site Code",
    "Site Name",
    "Total In Count",
    "Group Count",
    "Total Unique Groups",
];

/// The three visitor counters recorded per observation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Metrics {
    pub total_in: u64,
    pub group_count: u64,
    pub unique_groups: u64,
}

impl Metrics {
    pub fn new(total_in: u64, group_count: u64, unique_groups: u64) -> Self {
        Self {
            total_in,
            group_count,
            unique_groups,
        }
    }
}

impl Add for Metrics {
    type Output = Metrics;

    fn add(self, rhs: Metrics) -> Metrics {
        Metrics {
            total_in: self.total_in + rhs.total_in,
            group_count: self.group_count + rhs.group_count,
            unique_groups: self.unique_groups + rhs.unique_groups,
        }
    }
}

impl AddAssign for Metrics {
    fn add_assign(&mut self, rhs: Metrics) {
        *self = *self + rhs;
    }
}

impl std::iter::Sum for Metrics {
    fn sum<I: Iterator<Item = Metrics>>(iter: I) -> Metrics {
        iter.fold(Metrics::default(), Add::add)
    }
}

/// A source row exactly as read, before numeric coercion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawRow {
    /// 1-based line in the source file (header is line 1 for CSV)
    pub line: usize,
    pub date: String,
    pub region: String,
    pub area: String,
    pub site_code: String,
    pub site_name: String,
    pub total_in: String,
    pub group_count: String,
    pub unique_groups: String,
}

/// A normalized observation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactRow {
    /// Date exactly as written in the source
    pub date: String,
    pub region: String,
    pub area: String,
    pub site_code: String,
    pub site_name: String,
    pub metrics: Metrics,
}

impl FactRow {
    /// Create a row from already-typed values
    pub fn new(
        date: impl Into<String>,
        region: impl Into<String>,
        area: impl Into<String>,
        site_code: impl Into<String>,
        site_name: impl Into<String>,
        metrics: Metrics,
    ) -> Self {
        Self {
            date: date.into(),
            region: region.into(),
            area: area.into(),
            site_code: site_code.into(),
            site_name: site_name.into(),
            metrics,
        }
    }

    /// Normalize a raw row, coercing the counters
    pub fn try_from_raw(raw: &RawRow) -> Result<Self> {
        let text_fields = [
            ("Date", &raw.date),
            ("Region", &raw.region),
            ("Area", &raw.area),
            ("Site Code", &raw.site_code),
            ("Site Name", &raw.site_name),
        ];
        for (column, value) in text_fields {
            if value.trim().is_empty() {
                return Err(Error::MalformedRow {
                    line: raw.line,
                    reason: format!("{} is empty", column),
                });
            }
        }

        let metrics = Metrics {
            total_in: parse_count("Total In Count", &raw.total_in, raw.line)?,
            group_count: parse_count("Group Count", &raw.group_count, raw.line)?,
            unique_groups: parse_count("Total Unique Groups", &raw.unique_groups, raw.line)?,
        };

        Ok(Self {
            date: raw.date.trim().to_string(),
            region: raw.region.trim().to_string(),
            area: raw.area.trim().to_string(),
            site_code: raw.site_code.trim().to_string(),
            site_name: raw.site_name.trim().to_string(),
            metrics,
        })
    }

    /// The observation date, parsed day-first
    pub fn parsed_date(&self) -> Option<NaiveDate> {
        parse_day_first(&self.date)
    }
}

/// Coerce a counter cell to a non-negative integer.
///
/// Spreadsheet exports often write whole numbers as `10.0`; those are
/// accepted, anything with a fractional part or a sign is not.
fn parse_count(column: &str, value: &str, line: usize) -> Result<u64> {
    let trimmed = value.trim();
    if let Ok(n) = trimmed.parse::<u64>() {
        return Ok(n);
    }

    match trimmed.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= u64::MAX as f64 => {
            Ok(f as u64)
        }
        _ => Err(Error::MalformedRow {
            line,
            reason: format!("{} is not a non-negative integer: '{}'", column, value),
        }),
    }
}

/// Parse a date using the day-first convention.
///
/// Accepts `DD-MM-YYYY`, `DD/MM/YYYY`, `DD.MM.YYYY`, ISO `YYYY-MM-DD`
/// and ISO with a trailing time of day.
pub fn parse_day_first(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    for format in ["%d-%m-%Y", "%d/%m/%Y", "%d.%m.%Y", "%Y-%m-%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(value, format) {
            return Some(date);
        }
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Some(dt.date());
        }
    }
    None
}

/// A source row that failed normalization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub line: usize,
    pub reason: String,
}

/// Normalized rows plus the rows that were skipped on the way in
#[derive(Debug, Clone, Default)]
pub struct FactTable {
    rows: Vec<FactRow>,
    rejected: Vec<RejectedRow>,
}

impl FactTable {
    /// Build a table from already-normalized rows
    pub fn from_rows(rows: Vec<FactRow>) -> Self {
        Self {
            rows,
            rejected: Vec::new(),
        }
    }

    /// Normalize raw rows, skipping (and logging) malformed ones
    pub fn from_raw_rows(raw_rows: impl IntoIterator<Item = RawRow>) -> Self {
        let mut table = FactTable::default();

        for raw in raw_rows {
            match FactRow::try_from_raw(&raw) {
                Ok(row) => table.rows.push(row),
                Err(e) => {
                    warn!(line = raw.line, error = %e, "Skipping malformed row");
                    let reason = match e {
                        Error::MalformedRow { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    table.rejected.push(RejectedRow {
                        line: raw.line,
                        reason,
                    });
                }
            }
        }

        table
    }

    /// Load a fact file, choosing the format by extension.
    ///
    /// `.jsonl`/`.ndjson` are read as JSON Lines, everything else as CSV.
    /// Failing to read the file at all, or ending up with no usable rows,
    /// is fatal.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::DataSource(format!("{}: {}", path.display(), e)))?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());

        let source = match extension.as_deref() {
            Some("jsonl") | Some("ndjson") => parse_jsonl(&contents)?,
            _ => parse_csv(&contents)?,
        };

        let mut table = Self::from_raw_rows(source.rows);
        table.rejected.extend(source.rejected);
        table.rejected.sort_by_key(|r| r.line);
        if table.rows.is_empty() {
            return Err(Error::DataSource(format!(
                "{} contains no usable rows ({} rejected)",
                path.display(),
                table.rejected.len()
            )));
        }

        info!(
            path = %path.display(),
            rows = table.rows.len(),
            rejected = table.rejected.len(),
            "Loaded fact table"
        );

        Ok(table)
    }

    pub fn rows(&self) -> &[FactRow] {
        &self.rows
    }

    pub fn rejected(&self) -> &[RejectedRow] {
        &self.rejected
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
