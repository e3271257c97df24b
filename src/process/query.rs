// src/process/query.rs
//! Deriving parameter lists from previously exported tables.

use serde::Deserialize;
use std::collections::BTreeSet;

use crate::process::row::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterKind {
    EqualsAny,
    EqualsAll,
    ContainsAll,
    ContainsAny,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RowFilter {
    pub column: String,
    pub kind: FilterKind,
    pub args: Vec<String>,
}

impl RowFilter {
    pub fn new(column: &str, kind: FilterKind, args: &[&str]) -> Self {
        Self {
            column: column.to_string(),
            kind,
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn accepts(&self, value: &str) -> bool {
        match self.kind {
            FilterKind::EqualsAny => self.args.iter().any(|a| a == value),
            FilterKind::EqualsAll => self.args.iter().all(|a| a == value),
            FilterKind::ContainsAll => self.args.iter().all(|a| value.contains(a.as_str())),
            FilterKind::ContainsAny => self.args.iter().any(|a| value.contains(a.as_str())),
        }
    }

    /// Rows lacking the column never pass.
    pub fn accepts_row(&self, row: &Row) -> bool {
        row.get(&self.column).is_some_and(|v| self.accepts(v))
    }
}

/// Distinct non-empty values of `column` over the rows passing every filter,
/// in sorted order.
pub fn distinct_values(rows: &[Row], column: &str, filters: &[RowFilter]) -> Vec<String> {
    rows.iter()
        .filter(|row| filters.iter().all(|f| f.accepts_row(row)))
        .filter_map(|row| row.get(column))
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}
