// src/process/header.rs
//! Column layout recovery for exported spool text.
//!
//! Everything here is a pure function of a line and an [`ImportSchema`], so
//! header detection and column resolution can be tested in isolation.

use std::borrow::Cow;

use crate::schema::ImportSchema;

pub const DELIMITER: char = '|';

/// Strip the line terminator and make sure the line ends with a delimiter,
/// so position arithmetic is the same for every line.
pub fn normalize_line(line: &str) -> Cow<'_, str> {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.ends_with(DELIMITER) {
        Cow::Borrowed(line)
    } else {
        Cow::Owned(format!("{line}{DELIMITER}"))
    }
}

/// A line is a header iff every field has at least one title spelling that
/// occurs somewhere in it, ignoring case. Order and surrounding text do not
/// matter.
pub fn is_header_line(line: &str, schema: &ImportSchema) -> bool {
    let folded = line.to_lowercase();
    schema.fields().iter().all(|field| field.appears_in(&folded))
}

/// Character (not byte) positions of every delimiter in `chars`.
pub fn delimiter_offsets(chars: &[char]) -> Vec<usize> {
    chars
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == DELIMITER)
        .map(|(i, _)| i)
        .collect()
}

/// Cut `chars` at `offsets` and clean each piece of delimiters and
/// whitespace. Yields `offsets.len() + 1` segments.
pub fn split_at_offsets(chars: &[char], offsets: &[usize]) -> Vec<String> {
    let starts = std::iter::once(0).chain(offsets.iter().copied());
    let ends = offsets.iter().copied().chain(std::iter::once(chars.len()));
    starts
        .zip(ends)
        .map(|(start, end)| {
            let end = end.min(chars.len());
            let start = start.min(end);
            chars[start..end]
                .iter()
                .filter(|c| **c != DELIMITER)
                .collect::<String>()
                .trim()
                .to_string()
        })
        .collect()
}

/// Column boundaries and field positions recovered from one header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    offsets: Vec<usize>,
    /// Segment index per schema field, in schema order. `None` when the
    /// header carries no column titled like the field.
    columns: Vec<Option<usize>>,
    /// Header cells carry no padding, so the export is plain delimited text
    /// rather than fixed-width and positions cannot be compared.
    compact: bool,
}

impl ColumnMap {
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn is_compact(&self) -> bool {
        self.compact
    }

    /// Segment index of the schema field at `field_pos`.
    pub fn column(&self, field_pos: usize) -> Option<usize> {
        self.columns.get(field_pos).copied().flatten()
    }

    /// Segment index for the field called `name`.
    #[cfg(test)]
    pub fn column_of(&self, schema: &ImportSchema, name: &str) -> Option<usize> {
        schema
            .fields()
            .iter()
            .position(|f| f.name() == name)
            .and_then(|pos| self.column(pos))
    }

    /// Whether `chars` is a data line under this layout; returns its cleaned
    /// segments if so.
    ///
    /// Fixed-width exports: every header delimiter must sit at the same
    /// character position. Compact exports: the delimiter count must match.
    pub fn data_segments(&self, chars: &[char]) -> Option<Vec<String>> {
        if self.offsets.is_empty() {
            return None;
        }
        if self.compact {
            let own = delimiter_offsets(chars);
            if own.len() != self.offsets.len() {
                return None;
            }
            return Some(split_at_offsets(chars, &own));
        }
        let aligned = self
            .offsets
            .iter()
            .all(|&pos| chars.get(pos) == Some(&DELIMITER));
        aligned.then(|| split_at_offsets(chars, &self.offsets))
    }
}

/// Resolve the column layout of `line` if it is a header for `schema`.
///
/// Each field maps to the first segment whose text equals one of its title
/// spellings, ignoring case. Substring hits are enough to detect the header
/// but not to place a field.
pub fn resolve_columns(line: &str, schema: &ImportSchema) -> Option<ColumnMap> {
    if !is_header_line(line, schema) {
        return None;
    }
    let chars: Vec<char> = line.chars().collect();
    let offsets = delimiter_offsets(&chars);
    let segments = split_at_offsets(&chars, &offsets);

    let columns = schema
        .fields()
        .iter()
        .map(|field| segments.iter().position(|title| field.is_titled(title)))
        .collect();

    Some(ColumnMap {
        compact: is_compact(&chars, &offsets),
        offsets,
        columns,
    })
}

fn is_compact(chars: &[char], offsets: &[usize]) -> bool {
    let starts = std::iter::once(0).chain(offsets.iter().map(|p| p + 1));
    starts
        .zip(offsets.iter().copied())
        .map(|(start, end)| &chars[start.min(end)..end])
        .filter(|cell| !cell.is_empty())
        .all(|cell| {
            !cell.first().is_some_and(|c| c.is_whitespace())
                && !cell.last().is_some_and(|c| c.is_whitespace())
        })
}
