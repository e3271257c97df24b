// src/process/row.rs
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Output column carrying the reference period name.
pub const PERIOD_FIELD: &str = "REFERENCIA";
/// Output column carrying the retrieval timestamp.
pub const RETRIEVED_AT_FIELD: &str = "DATA_HORA_CONSULTA";
/// Format of [`RETRIEVED_AT_FIELD`] values.
pub const RETRIEVED_AT_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// One extracted record: field name → normalized value, in insertion order.
/// Insertion order is the column order of every output format.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Row(IndexMap<String, String>);

/// All rows of one extraction for the run, in parse order.
pub type ResultSet = Vec<Row>;

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.0.insert(field.into(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// At least one field holds a non-empty value.
    pub fn has_content(&self) -> bool {
        self.0.values().any(|v| !v.is_empty())
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Row {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Stamp every row with the period name and retrieval time.
pub fn tag_rows(rows: &mut [Row], period_name: &str, retrieved_at: &str) {
    for row in rows {
        row.insert(PERIOD_FIELD, period_name);
        row.insert(RETRIEVED_AT_FIELD, retrieved_at);
    }
}
