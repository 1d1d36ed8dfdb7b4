use super::check_width;
use crate::Result;
use crate::engine::ReportWriter;
use ohno::{IntoAppError, app_err};
use rust_xlsxwriter::{DocProperties, Format, Workbook, Worksheet};
use std::io::Write;

const SHEET_NAME: &str = "Survey";

/// Builds a single-sheet workbook in memory and writes it out on close.
pub struct ExcelWriter<W: Write> {
    out: Option<W>,
    worksheet: Worksheet,
    bold: Format,
    width: Option<usize>,
    next_row: u32,
}

impl<W: Write> ExcelWriter<W> {
    #[must_use]
    pub fn new(out: W) -> Self {
        Self {
            out: Some(out),
            worksheet: Worksheet::new(),
            bold: Format::new().set_bold(),
            width: None,
            next_row: 0,
        }
    }

    #[expect(clippy::cast_precision_loss, reason = "Counts written to Excel stay well within f64 precision")]
    fn write_cell(&mut self, col: usize, value: &str, header: bool) -> Result<()> {
        let col = u16::try_from(col).into_app_err("too many columns for an Excel worksheet")?;
        let row = self.next_row;

        let _ = if header {
            self.worksheet.write_string_with_format(row, col, value, &self.bold)?
        } else if let Some(number) = as_integer(value) {
            self.worksheet.write_number(row, col, number as f64)?
        } else {
            self.worksheet.write_string(row, col, value)?
        };

        Ok(())
    }
}

impl<W: Write> core::fmt::Debug for ExcelWriter<W> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ExcelWriter")
            .field("closed", &self.out.is_none())
            .field("width", &self.width)
            .field("next_row", &self.next_row)
            .finish_non_exhaustive()
    }
}

/// Plain integers become numeric cells so they sort and sum; anything with a leading zero
/// (or otherwise not canonical) stays text.
fn as_integer(value: &str) -> Option<i64> {
    let number = value.parse::<i64>().ok()?;
    (number.to_string() == value).then_some(number)
}

impl<W: Write> ReportWriter for ExcelWriter<W> {
    fn write_header(&mut self, header: &[String]) -> Result<()> {
        let _ = self.worksheet.set_name(SHEET_NAME)?;
        for (col, name) in header.iter().enumerate() {
            self.write_cell(col, name, true)?;
        }
        let _ = self.worksheet.set_freeze_panes(1, 0)?;

        self.width = Some(header.len());
        self.next_row = 1;
        Ok(())
    }

    fn write_row(&mut self, row: &[String]) -> Result<()> {
        check_width(self.width, row)?;
        if self.out.is_none() {
            return Err(app_err!("Excel report already closed"));
        }

        for (col, value) in row.iter().enumerate() {
            self.write_cell(col, value, false)?;
        }

        self.next_row = self
            .next_row
            .checked_add(1)
            .ok_or_else(|| app_err!("too many rows for an Excel worksheet"))?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let Some(mut out) = self.out.take() else {
            return Ok(());
        };

        let _ = self.worksheet.autofit();

        let mut workbook = Workbook::new();
        let _ = workbook.set_properties(&DocProperties::new().set_author("org-survey"));
        workbook.push_worksheet(core::mem::replace(&mut self.worksheet, Worksheet::new()));

        let data = workbook.save_to_buffer()?;
        out.write_all(&data).into_app_err("writing Excel report")?;
        out.flush().into_app_err("flushing Excel report")
    }
}
