use super::check_width;
use crate::Result;
use crate::engine::ReportWriter;
use ohno::{IntoAppError, app_err, bail};
use serde_json::{Map, Value};
use std::io::Write;

/// Streams a JSON array with one object per row, keyed by the header's column names.
///
/// Keys keep the header's column order. After a failed write the output is no longer
/// valid JSON, so every later row and the final close fail too.
#[derive(Debug)]
pub struct JsonWriter<W: Write> {
    out: Option<W>,
    header: Vec<String>,
    started: bool,
    rows: usize,
    broken: bool,
}

impl<W: Write> JsonWriter<W> {
    pub const fn new(out: W) -> Self {
        Self {
            out: Some(out),
            header: Vec::new(),
            started: false,
            rows: 0,
            broken: false,
        }
    }

    fn out(&mut self) -> Result<&mut W> {
        if self.broken {
            bail!("JSON report is incomplete after an earlier write failure");
        }
        self.out.as_mut().ok_or_else(|| app_err!("JSON report already closed"))
    }

    fn write(&mut self, bytes: &[u8], what: &'static str) -> Result<()> {
        let result = self.out()?.write_all(bytes).into_app_err(what);
        self.broken = result.is_err();
        result
    }
}

impl<W: Write> ReportWriter for JsonWriter<W> {
    fn write_header(&mut self, header: &[String]) -> Result<()> {
        self.write(b"[", "writing JSON report")?;
        self.header = header.to_vec();
        self.started = true;
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<()> {
        check_width(self.started.then_some(self.header.len()), row)?;

        let object: Map<String, Value> = self
            .header
            .iter()
            .zip(row)
            .map(|(key, value)| (key.clone(), Value::String(value.clone())))
            .collect();

        let mut bytes = if self.rows == 0 { b"\n  ".to_vec() } else { b",\n  ".to_vec() };
        serde_json::to_writer(&mut bytes, &object)?;

        self.write(&bytes, "writing JSON row")?;
        self.rows += 1;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.out.is_none() {
            return Ok(());
        }

        let tail: &[u8] = if self.rows == 0 { b"]\n" } else { b"\n]\n" };
        self.write(tail, "writing JSON report")?;

        let Some(mut out) = self.out.take() else {
            return Ok(());
        };
        out.flush().into_app_err("flushing JSON report")
    }
}
