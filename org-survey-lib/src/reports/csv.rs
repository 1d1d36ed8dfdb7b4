use super::check_width;
use crate::Result;
use crate::engine::ReportWriter;
use ohno::{IntoAppError, app_err};
use std::io::Write;

#[derive(Debug)]
pub struct CsvWriter<W: Write> {
    writer: Option<csv::Writer<W>>,
    width: Option<usize>,
}

impl<W: Write> CsvWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            writer: Some(csv::Writer::from_writer(out)),
            width: None,
        }
    }

    fn writer(&mut self) -> Result<&mut csv::Writer<W>> {
        self.writer.as_mut().ok_or_else(|| app_err!("CSV report already closed"))
    }
}

impl<W: Write> ReportWriter for CsvWriter<W> {
    fn write_header(&mut self, header: &[String]) -> Result<()> {
        self.writer()?.write_record(header).into_app_err("writing CSV header")?;
        self.width = Some(header.len());
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<()> {
        check_width(self.width, row)?;
        self.writer()?.write_record(row).into_app_err("writing CSV row")
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush().into_app_err("flushing CSV report")?;
        }
        Ok(())
    }
}
