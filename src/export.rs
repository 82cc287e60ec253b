//! Roster export.
//!
//! Records are first flattened into an [`ExportTable`]; the CSV and workbook
//! encoders both read that same table, so the two files can only differ in
//! framing, never in content.

use chrono::{DateTime, FixedOffset, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use std::io::Write;

use crate::config::ExportConfig;
use crate::dto::StudentRecord;
use crate::error::ExportError;

/// Column headers of both export formats, in column order.
pub const HEADERS: [&str; 5] = [
    "Roll Number (Last 2 digits)",
    "PhonePe Amount (₹)",
    "Cash Amount (₹)",
    "Total Amount (₹)",
    "Last Updated",
];

const COLUMN_WIDTHS: [f64; 5] = [25.0, 18.0, 18.0, 18.0, 20.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "xlsx" | "excel" => Ok(ExportFormat::Xlsx),
            other => Err(format!("unknown export format {other:?}, expected csv or xlsx")),
        }
    }
}

/// One exported row. Field order is the column order of [`HEADERS`].
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ExportRow {
    pub roll_number: String,
    pub phone_pe: Decimal,
    pub cash: Decimal,
    pub total: Decimal,
    pub last_updated: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportTable {
    pub rows: Vec<ExportRow>,
}

/// Flattens records into export rows, keeping the given order.
/// The total is recomputed here from the two balances.
pub fn to_table(records: &[StudentRecord], offset: FixedOffset) -> ExportTable {
    let rows = records
        .iter()
        .map(|record| ExportRow {
            roll_number: record.roll_number.to_string(),
            phone_pe: record.phone_pe,
            cash: record.cash,
            total: record.phone_pe + record.cash,
            last_updated: format_timestamp(record.last_updated, offset),
        })
        .collect();
    ExportTable { rows }
}

/// Indian-English locale style: `18/10/2026, 9:05:03 pm`.
pub fn format_timestamp(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset)
        .format("%-d/%-m/%Y, %-I:%M:%S %P")
        .to_string()
}

/// Writes the table as comma-separated UTF-8 text with a header row.
pub fn write_csv<W: Write>(table: &ExportTable, writer: W) -> Result<(), ExportError> {
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(HEADERS)?;
    for row in &table.rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Builds a single-sheet workbook from the table and returns the file bytes.
pub fn to_xlsx(table: &ExportTable, config: &ExportConfig) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let header_format = Format::new().set_bold();

    let sheet = workbook.add_worksheet();
    sheet.set_name(&config.sheet_name)?;
    for (col, (header, width)) in HEADERS.iter().zip(COLUMN_WIDTHS).enumerate() {
        let col = col as u16;
        sheet.write_string_with_format(0, col, *header, &header_format)?;
        sheet.set_column_width(col, width)?;
    }

    for (i, row) in table.rows.iter().enumerate() {
        let r = i as u32 + 1;
        sheet.write_string(r, 0, &row.roll_number)?;
        sheet.write_number(r, 1, amount_to_f64(row.phone_pe)?)?;
        sheet.write_number(r, 2, amount_to_f64(row.cash)?)?;
        sheet.write_number(r, 3, amount_to_f64(row.total)?)?;
        sheet.write_string(r, 4, &row.last_updated)?;
    }

    Ok(workbook.save_to_buffer()?)
}

/// Encodes the table in the requested format into `writer`.
pub fn write_table<W: Write>(
    table: &ExportTable,
    format: ExportFormat,
    config: &ExportConfig,
    mut writer: W,
) -> Result<(), ExportError> {
    match format {
        ExportFormat::Csv => write_csv(table, writer),
        ExportFormat::Xlsx => {
            let bytes = to_xlsx(table, config)?;
            writer.write_all(&bytes)?;
            writer.flush()?;
            Ok(())
        }
    }
}

fn amount_to_f64(amount: Decimal) -> Result<f64, ExportError> {
    amount.to_f64().ok_or(ExportError::Amount(amount))
}
