// src/process/mod.rs
//! Turning exported spool text into rows, and rows into output files.

pub mod header;
pub mod output;
pub mod query;
pub mod row;
pub mod spool;

pub use output::{merge_tables, read_delimited, write_rows, OutputFormat};
pub use row::{ResultSet, Row};
pub use spool::{ParseMode, SpoolTextParser};
