// src/period.rs
use anyhow::{Context, Result};
use chrono::{Datelike, NaiveDate};
use std::fmt;

use crate::error::ExtractError;

/// The calendar month a run targets. Used for remote date filtering and for
/// tagging every output row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReferencePeriod {
    name: String,
    month: u32,
    year: i32,
    start: NaiveDate,
    end: NaiveDate,
}

impl ReferencePeriod {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            ExtractError::config(format!("invalid reference period {year}-{month:02}"))
        })?;
        let next_month = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)
        }
        .ok_or_else(|| ExtractError::config(format!("period {year}-{month:02} out of range")))?;
        let end = next_month.pred_opt().unwrap_or(start);

        Ok(Self {
            name: format!("{:04}_{:02}", year, month),
            month,
            year,
            start,
            end,
        })
    }

    /// Parse a `YYYY_MM` period name.
    pub fn parse(name: &str) -> Result<Self> {
        let (year, month) = name
            .trim()
            .split_once('_')
            .ok_or_else(|| ExtractError::config(format!("period `{name}` is not YYYY_MM")))?;
        let year: i32 = year
            .parse()
            .with_context(|| format!("parsing year of period `{name}`"))?;
        let month: u32 = month
            .parse()
            .with_context(|| format!("parsing month of period `{name}`"))?;
        Self::new(year, month)
    }

    /// The period containing `date`.
    pub fn containing(date: NaiveDate) -> Self {
        let start = date.with_day(1).unwrap_or(date);
        Self::new(start.year(), start.month()).unwrap_or_else(|_| Self {
            name: format!("{:04}_{:02}", start.year(), start.month()),
            month: start.month(),
            year: start.year(),
            start,
            end: date,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// Period names for every month of this period's year.
    pub fn year_names(&self) -> Vec<String> {
        (1..=12)
            .map(|month| format!("{:04}_{:02}", self.year, month))
            .collect()
    }
}

impl fmt::Display for ReferencePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_month_bounds() {
        let period = ReferencePeriod::parse("2024_02").unwrap();
        assert_eq!(period.name(), "2024_02");
        assert_eq!(period.start(), NaiveDate::from_ymd_opt(2024, 2, 1).unwrap());
        assert_eq!(period.end(), NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());
    }

    #[test]
    fn december_ends_on_the_31st() {
        let period = ReferencePeriod::new(2023, 12).unwrap();
        assert_eq!(period.end(), NaiveDate::from_ymd_opt(2023, 12, 31).unwrap());
    }

    #[test]
    fn rejects_bad_names() {
        assert!(ReferencePeriod::parse("2023-09").is_err());
        assert!(ReferencePeriod::parse("2023_13").is_err());
    }

    #[test]
    fn containing_date() {
        let period = ReferencePeriod::containing(NaiveDate::from_ymd_opt(2023, 9, 17).unwrap());
        assert_eq!(period.name(), "2023_09");
        assert_eq!(period.year_names()[0], "2023_01");
    }
}
