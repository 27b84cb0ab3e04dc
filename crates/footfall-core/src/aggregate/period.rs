//! Time periods used as rollup keys

use chrono::{Datelike, Month, NaiveDate};
use serde::{Deserialize, Serialize};

/// Rollup granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
}

impl Granularity {
    pub fn all() -> &'static [Granularity] {
        &[Self::Daily, Self::Weekly, Self::Monthly]
    }
}

/// A day, an ISO week tagged with its week-year, or a calendar month
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Period {
    Day(NaiveDate),
    Week { year: i32, week: u32 },
    Month { year: i32, month: u32 },
}

impl Period {
    /// The period of a given granularity containing a date
    pub fn containing(date: NaiveDate, granularity: Granularity) -> Self {
        match granularity {
            Granularity::Daily => Self::Day(date),
            Granularity::Weekly => {
                let iso = date.iso_week();
                Self::Week {
                    year: iso.year(),
                    week: iso.week(),
                }
            }
            Granularity::Monthly => Self::Month {
                year: date.year(),
                month: date.month(),
            },
        }
    }

    /// Compact sortable key: `2025-05-03`, `2025-W18` or `2025-05`
    pub fn key(&self) -> String {
        match self {
            Self::Day(date) => date.format("%Y-%m-%d").to_string(),
            Self::Week { year, week } => format!("{:04}-W{:02}", year, week),
            Self::Month { year, month } => format!("{:04}-{:02}", year, month),
        }
    }

    /// Human-readable label; months read as `May 2025`
    pub fn label(&self) -> String {
        match self {
            Self::Month { year, month } => match u8::try_from(*month)
                .ok()
                .and_then(|m| Month::try_from(m).ok())
            {
                Some(name) => format!("{} {}", name.name(), year),
                None => self.key(),
            },
            _ => self.key(),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}
