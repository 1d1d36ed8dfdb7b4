//! Report sinks
//!
//! Each writer implements [`ReportWriter`] and receives rows one at a time from the
//! pipeline's collector:
//! - **CSV**: RFC 4180 records via the `csv` crate
//! - **JSON**: A streamed array with one header-keyed object per row
//! - **Excel**: A single `.xlsx` worksheet with a bold, frozen header row
//!
//! Every writer remembers the header's width and rejects rows of any other width.

mod csv;
mod excel;
mod json;

pub use csv::CsvWriter;
pub use excel::ExcelWriter;
pub use json::JsonWriter;

use crate::Result;
use crate::engine::ReportWriter;
use camino::Utf8Path;
use clap::ValueEnum;
use ohno::{IntoAppError, bail};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
    Excel,
}

impl OutputFormat {
    /// Guess the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Utf8Path) -> Option<Self> {
        match path.extension()?.to_ascii_lowercase().as_str() {
            "csv" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "xlsx" => Some(Self::Excel),
            _ => None,
        }
    }

    /// File extension for reports in this format.
    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Excel => "xlsx",
        }
    }

    /// An explicit choice wins, then the output extension, then CSV.
    #[must_use]
    pub fn resolve(explicit: Option<Self>, path: Option<&Utf8Path>) -> Self {
        explicit.or_else(|| path.and_then(Self::from_path)).unwrap_or_default()
    }
}

/// Reject a row whose width differs from the header's.
fn check_width(expected: Option<usize>, row: &[String]) -> Result<()> {
    match expected {
        None => bail!("row written before the header"),
        Some(width) if width != row.len() => {
            bail!("row has {} column(s) but the header has {width}", row.len())
        }
        Some(_) => Ok(()),
    }
}

/// Check that a `format` report can go to `path` (or to stdout when there is none).
///
/// This touches nothing on disk.
pub fn check_destination(format: OutputFormat, path: Option<&Utf8Path>) -> Result<()> {
    if path.is_none() && format == OutputFormat::Excel {
        bail!("Excel output requires an output file");
    }
    Ok(())
}

/// Open the sink for `format`, writing to `path` or, when there is none, to `stdout`.
///
/// An existing file at `path` is truncated, so open it only once the report's items are in hand.
pub fn open_writer<'a>(
    format: OutputFormat,
    path: Option<&Utf8Path>,
    stdout: impl Write + 'a,
) -> Result<Box<dyn ReportWriter + 'a>> {
    let Some(path) = path else {
        let writer: Box<dyn ReportWriter + 'a> = match format {
            OutputFormat::Csv => Box::new(CsvWriter::new(stdout)),
            OutputFormat::Json => Box::new(JsonWriter::new(stdout)),
            OutputFormat::Excel => bail!("Excel output requires an output file"),
        };
        return Ok(writer);
    };

    create_writer(format, path)
}

/// Create (or truncate) the report file at `path`.
pub fn create_writer(format: OutputFormat, path: &Utf8Path) -> Result<Box<dyn ReportWriter>> {
    let file = File::create(path).into_app_err_with(|| format!("creating output file '{path}'"))?;
    let file = BufWriter::new(file);

    let writer: Box<dyn ReportWriter> = match format {
        OutputFormat::Csv => Box::new(CsvWriter::new(file)),
        OutputFormat::Json => Box::new(JsonWriter::new(file)),
        OutputFormat::Excel => Box::new(ExcelWriter::new(file)),
    };

    Ok(writer)
}
