// src/process/output.rs
//! Persisting result sets and consolidating them into table files.

use anyhow::{Context, Result};
use arrow::array::{ArrayRef, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde::Deserialize;
use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{BufWriter, Write},
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{info, warn};

use crate::process::header::DELIMITER;
use crate::process::row::Row;
use crate::process::spool::text_files_matching;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// `|`-delimited text, header line first. Values are not escaped.
    #[default]
    Text,
    Json,
    Parquet,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Text => "txt",
            OutputFormat::Json => "json",
            OutputFormat::Parquet => "parquet",
        }
    }
}

/// Column order for a set of rows: the first row's keys.
fn header_of(rows: &[Row]) -> Vec<String> {
    rows.first()
        .map(|r| r.keys().map(str::to_string).collect())
        .unwrap_or_default()
}

/// Write `rows` to `{dir}/{name}.{ext}`. Returns `None` without touching
/// the filesystem when there is nothing to write.
pub fn write_rows(
    dir: &Path,
    name: &str,
    rows: &[Row],
    format: OutputFormat,
) -> Result<Option<PathBuf>> {
    if rows.is_empty() {
        warn!(name, "no data to export");
        return Ok(None);
    }
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!("{}.{}", name, format.extension()));
    let tmp = dir.join(format!(".{}.{}.tmp", name, format.extension()));

    match format {
        OutputFormat::Text => write_delimited(&tmp, rows)?,
        OutputFormat::Json => write_json(&tmp, rows)?,
        OutputFormat::Parquet => write_parquet(&tmp, rows)?,
    }
    fs::rename(&tmp, &path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;

    info!(path = %path.display(), rows = rows.len(), "exported rows");
    Ok(Some(path))
}

fn write_delimited(path: &Path, rows: &[Row]) -> Result<()> {
    let header = header_of(rows);
    let sep = DELIMITER.to_string();
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "{}", header.join(&sep))?;
    for row in rows {
        let values: Vec<&str> = header
            .iter()
            .map(|key| row.get(key).unwrap_or(""))
            .collect();
        writeln!(out, "{}", values.join(&sep))?;
    }
    out.flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

fn write_json(path: &Path, rows: &[Row]) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut out = BufWriter::new(file);
    serde_json::to_writer(&mut out, rows).context("serializing rows to JSON")?;
    out.flush()?;
    Ok(())
}

/// Every column as non-null Utf8; values are already normalized text.
fn write_parquet(path: &Path, rows: &[Row]) -> Result<()> {
    let header = header_of(rows);
    let schema = Arc::new(Schema::new(
        header
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, false))
            .collect::<Vec<_>>(),
    ));
    let columns: Vec<ArrayRef> = header
        .iter()
        .map(|key| {
            Arc::new(StringArray::from_iter_values(
                rows.iter().map(|row| row.get(key).unwrap_or("")),
            )) as ArrayRef
        })
        .collect();

    let batch = RecordBatch::try_new(schema.clone(), columns).context("building record batch")?;
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(BufWriter::new(file), schema, Some(props))
        .context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

/// Read delimited text files written by [`write_rows`]: the first line of
/// each file is its header. Blank rows are dropped.
pub fn read_delimited(files: &[PathBuf]) -> Result<Vec<Row>> {
    let mut rows = Vec::new();
    for path in files {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let mut lines = text.lines();
        let Some(first) = lines.next() else {
            continue;
        };
        let header: Vec<&str> = first.split(DELIMITER).map(str::trim).collect();

        for line in lines {
            let values: Vec<&str> = line.split(DELIMITER).map(str::trim).collect();
            let row: Row = header
                .iter()
                .enumerate()
                .map(|(i, key)| (*key, values.get(i).copied().unwrap_or("")))
                .collect();
            if row.has_content() {
                rows.push(row);
            }
        }
    }
    Ok(rows)
}

/// Union every exported text file whose name contains a transaction prefix
/// into `{table_dir}/{table}.txt`. `only` restricts the merge to one prefix.
pub fn merge_tables(
    exported_dir: &Path,
    table_dir: &Path,
    tables: &BTreeMap<String, String>,
    only: Option<&str>,
) -> Result<Vec<PathBuf>> {
    let only = only.map(str::to_uppercase);
    let mut written = Vec::new();

    for (prefix, table) in tables {
        if only.as_deref().is_some_and(|o| o != prefix.to_uppercase()) {
            continue;
        }
        let files = text_files_matching(exported_dir, &[prefix.as_str()])?;
        info!(prefix = %prefix, table = %table, files = files.len(), "merging exported files");
        let rows = read_delimited(&files)
            .with_context(|| format!("reading exported files for {prefix}"))?;
        if let Some(path) = write_rows(table_dir, table, &rows, OutputFormat::Text)? {
            written.push(path);
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parquet::file::reader::{FileReader, SerializedFileReader};
    use tempfile::tempdir;

    fn rows() -> Vec<Row> {
        vec![
            Row::from_iter([("NOTA", "1"), ("STATUS", "OK"), ("REFERENCIA", "2023_09")]),
            Row::from_iter([("NOTA", "2"), ("STATUS", ""), ("REFERENCIA", "2023_09")]),
        ]
    }

    #[test]
    fn text_output_has_header_then_rows() {
        let dir = tempdir().unwrap();
        let path = write_rows(dir.path(), "IW67_MEDL", &rows(), OutputFormat::Text)
            .unwrap()
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "IW67_MEDL.txt");
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text, "NOTA|STATUS|REFERENCIA\n1|OK|2023_09\n2||2023_09\n");
    }

    #[test]
    fn nothing_is_written_for_empty_results() {
        let dir = tempdir().unwrap();
        let out = write_rows(dir.path(), "EMPTY", &[], OutputFormat::Text).unwrap();
        assert!(out.is_none());
        assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn delimited_output_reads_back() {
        let dir = tempdir().unwrap();
        let path = write_rows(dir.path(), "IW67_MEDL", &rows(), OutputFormat::Text)
            .unwrap()
            .unwrap();
        assert_eq!(read_delimited(&[path]).unwrap(), rows());
    }

    #[test]
    fn json_and_parquet_outputs() {
        let dir = tempdir().unwrap();
        let json = write_rows(dir.path(), "T", &rows(), OutputFormat::Json)
            .unwrap()
            .unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(json).unwrap()).unwrap();
        assert_eq!(parsed[0]["STATUS"], "OK");

        let pq = write_rows(dir.path(), "T", &rows(), OutputFormat::Parquet)
            .unwrap()
            .unwrap();
        let reader = SerializedFileReader::new(File::open(pq).unwrap()).unwrap();
        assert_eq!(reader.metadata().file_metadata().num_rows(), 2);
    }

    #[test]
    fn merge_unions_files_sharing_a_prefix() {
        let exported = tempdir().unwrap();
        let tables_dir = tempdir().unwrap();
        let sep = vec![Row::from_iter([("NOTA", "3"), ("STATUS", "X"), ("REFERENCIA", "2023_08")])];
        write_rows(exported.path(), "IW67_MEDE_2023_09", &rows(), OutputFormat::Text).unwrap();
        write_rows(exported.path(), "IW67_MEDE_2023_08", &sep, OutputFormat::Text).unwrap();
        write_rows(exported.path(), "IW39_ORDENS", &sep, OutputFormat::Text).unwrap();

        let tables = BTreeMap::from([
            ("IW67".to_string(), "TB_ECC_MEDIDA".to_string()),
            ("IW39".to_string(), "TB_ECC_ORDEM".to_string()),
        ]);
        let written = merge_tables(exported.path(), tables_dir.path(), &tables, Some("iw67")).unwrap();
        assert_eq!(written, vec![tables_dir.path().join("TB_ECC_MEDIDA.txt")]);

        let merged = read_delimited(&written).unwrap();
        assert_eq!(merged.len(), 3);
        assert_eq!(merged[0].get("REFERENCIA"), Some("2023_08"));
    }
}
