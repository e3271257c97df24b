// src/process/spool.rs
use anyhow::{Context, Result};
use glob::{glob, Pattern};
use rayon::prelude::*;
use serde::Deserialize;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Instant,
};
use tracing::{debug, info, warn};

use crate::error::ExtractError;
use crate::process::header::{normalize_line, resolve_columns, ColumnMap, DELIMITER};
use crate::process::row::{ResultSet, Row};
use crate::schema::ImportSchema;

/// What to do when some files of a batch fail to parse.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseMode {
    /// Any failing file fails the whole batch; no partial rows.
    #[default]
    AllOrNothing,
    /// Keep rows of the files that parsed and log the others.
    KeepPartial,
}

/// Turns exported spool text files into rows for one [`ImportSchema`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SpoolTextParser {
    mode: ParseMode,
}

impl SpoolTextParser {
    pub fn new(mode: ParseMode) -> Self {
        Self { mode }
    }

    /// Parse every file in `files`, in parallel, and concatenate the rows in
    /// input order.
    #[tracing::instrument(level = "info", skip(self, files, schema), fields(transaction = schema.transaction(), files = files.len()))]
    pub fn parse(&self, files: &[PathBuf], schema: &ImportSchema) -> Result<ResultSet> {
        let start = Instant::now();
        let per_file: Vec<Result<Vec<Row>>> = files
            .par_iter()
            .map(|path| parse_file(path, schema))
            .collect();

        let mut rows = Vec::new();
        let mut failed = 0usize;
        for (path, parsed) in files.iter().zip(per_file) {
            match (parsed, self.mode) {
                (Ok(file_rows), _) => rows.extend(file_rows),
                (Err(e), ParseMode::AllOrNothing) => {
                    return Err(e.context(format!(
                        "parsing {} ({} files in batch discarded)",
                        path.display(),
                        files.len()
                    )));
                }
                (Err(e), ParseMode::KeepPartial) => {
                    failed += 1;
                    warn!(path = %path.display(), "skipping unparseable spool file: {:#}", e);
                }
            }
        }

        info!(rows = rows.len(), failed, elapsed = ?start.elapsed(), "parsed spool files");
        Ok(rows)
    }
}

/// Read one exported file and extract its rows.
pub fn parse_file(path: &Path, schema: &ImportSchema) -> Result<Vec<Row>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let text = decode_export(bytes);

    let parsed = parse_text(&text, schema);
    if parsed.header_seen {
        debug!(path = %path.display(), rows = parsed.rows.len(), "parsed spool file");
        Ok(parsed.rows)
    } else if !parsed.tabular {
        debug!(path = %path.display(), "spool holds no table");
        Ok(Vec::new())
    } else {
        Err(ExtractError::HeaderNotFound {
            transaction: schema.transaction().to_string(),
            path: path.to_path_buf(),
        }
        .into())
    }
}

/// Outcome of scanning one file's text.
#[derive(Debug, Default)]
pub struct ParsedText {
    pub rows: Vec<Row>,
    pub header_seen: bool,
    /// Some line carried a column delimiter. Spools of empty results are
    /// only a title and a message, with no table at all.
    pub tabular: bool,
}

/// Scan `text` line by line. Every header occurrence replaces the active
/// layout; lines that are neither header nor aligned data are skipped.
pub fn parse_text(text: &str, schema: &ImportSchema) -> ParsedText {
    let mut parsed = ParsedText::default();
    let mut layout: Option<ColumnMap> = None;

    for raw in text.lines() {
        parsed.tabular |= raw.contains(DELIMITER);
        let line = normalize_line(raw);

        if let Some(map) = resolve_columns(&line, schema) {
            layout = Some(map);
            parsed.header_seen = true;
            continue;
        }

        let Some(map) = layout.as_ref() else {
            continue;
        };
        let chars: Vec<char> = line.chars().collect();
        let Some(segments) = map.data_segments(&chars) else {
            continue;
        };

        let row: Row = schema
            .fields()
            .iter()
            .enumerate()
            .map(|(pos, field)| {
                let raw = map
                    .column(pos)
                    .and_then(|idx| segments.get(idx))
                    .map(String::as_str)
                    .unwrap_or("");
                (field.name(), field.normalize(raw))
            })
            .collect();

        if row.has_content() {
            parsed.rows.push(row);
        }
    }

    parsed
}

/// Exports come out as UTF-8 or Latin-1 depending on the front end's code
/// page.
fn decode_export(bytes: Vec<u8>) -> String {
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => e.into_bytes().iter().map(|&b| b as char).collect(),
    }
}

/// `.txt` files in `dir` whose name contains any of `needles`, ignoring
/// case, sorted by path.
pub fn text_files_matching(dir: &Path, needles: &[&str]) -> Result<Vec<PathBuf>> {
    let pattern = format!("{}/*", Pattern::escape(&dir.to_string_lossy()));
    let needles: Vec<String> = needles.iter().map(|n| n.to_lowercase()).collect();

    let mut files: Vec<PathBuf> = glob(&pattern)
        .with_context(|| format!("invalid glob pattern {pattern}"))?
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(path = %e.path().display(), "skipping unreadable entry: {}", e.error());
                None
            }
        })
        .filter(|p| p.is_file())
        .filter(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            name.ends_with(".txt") && needles.iter().any(|n| name.contains(n.as_str()))
        })
        .collect();
    files.sort();
    Ok(files)
}
