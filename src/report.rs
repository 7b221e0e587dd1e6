// Terminal tables and spreadsheet export for stored margins.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use rust_xlsxwriter::{Format, Workbook};
use serde::Serialize;
use tracing::info;

use crate::config::ExportFormat;
use crate::persist::{MarginStore, PersistResult, StoredMargin, SymbolSummary};

pub const WORKBOOK_FILE: &str = "mcx_margins.xlsx";
pub const MARGINS_FILE: &str = "mcx_margins.csv";
pub const SUMMARY_FILE: &str = "mcx_margins_summary.csv";
pub const MARGINS_SHEET: &str = "Daily Margins";
pub const SUMMARY_SHEET: &str = "Summary";

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{v:.precision$}"),
        None => "N/A".to_string(),
    }
}

fn banner(out: &mut impl Write, title: &str, width: usize) -> io::Result<()> {
    let rule = "=".repeat(width);
    writeln!(out, "\n{rule}")?;
    writeln!(out, "  {title}")?;
    writeln!(out, "{rule}")
}

pub fn write_records(out: &mut impl Write, title: &str, records: &[StoredMargin]) -> io::Result<()> {
    if !title.is_empty() {
        banner(out, title, 70)?;
    }
    if records.is_empty() {
        return writeln!(out, "  No records found.");
    }

    writeln!(
        out,
        "\n{:<12} {:<15} {:<12} {:>8} {:>8} {:>8} {:>12}",
        "Date", "Symbol", "Expiry", "IM%", "ELM%", "Total%", "Volatility"
    )?;
    writeln!(out, "{}", "-".repeat(80))?;
    for stored in records {
        let r = &stored.record;
        writeln!(
            out,
            "{:<12} {:<15} {:<12} {:>8} {:>8} {:>8} {:>12}",
            r.date.to_string(),
            r.symbol,
            r.expiry,
            fmt_opt(r.initial_margin_pct, 2),
            fmt_opt(r.elm_pct, 2),
            fmt_opt(r.total_margin_pct, 2),
            fmt_opt(r.annualized_volatility, 4),
        )?;
    }
    writeln!(out, "\nTotal: {} records", records.len())
}

/// The short sample printed after a single-date fetch.
pub fn write_sample(out: &mut impl Write, date: NaiveDate, records: &[StoredMargin], limit: usize) -> io::Result<()> {
    writeln!(out, "\nSample records for {date} (first {limit}):")?;
    writeln!(out, "{:<15} {:<12} {:>8} {:>8} {:>8}", "Symbol", "Expiry", "IM%", "ELM%", "Total%")?;
    writeln!(out, "{}", "-".repeat(55))?;
    for stored in records.iter().take(limit) {
        let r = &stored.record;
        writeln!(
            out,
            "{:<15} {:<12} {:>8} {:>8} {:>8}",
            r.symbol,
            r.expiry,
            fmt_opt(r.initial_margin_pct, 2),
            fmt_opt(r.elm_pct, 2),
            fmt_opt(r.total_margin_pct, 2),
        )?;
    }
    Ok(())
}

pub fn write_summary(out: &mut impl Write, summary: &[SymbolSummary]) -> io::Result<()> {
    banner(out, "MCX CCL Margin Data Summary", 90)?;
    if summary.is_empty() {
        return writeln!(out, "  No data in database.");
    }

    writeln!(
        out,
        "\n{:<20} {:>6} {:<12} {:<12} {:>8} {:>8} {:>8}",
        "Symbol", "Count", "Earliest", "Latest", "Avg IM%", "Min IM%", "Max IM%"
    )?;
    writeln!(out, "{}", "-".repeat(80))?;
    for row in summary {
        writeln!(
            out,
            "{:<20} {:>6} {:<12} {:<12} {:>8} {:>8} {:>8}",
            row.symbol,
            row.record_count,
            row.earliest_date.to_string(),
            row.latest_date.to_string(),
            fmt_opt(row.avg_initial_margin, 2),
            fmt_opt(row.min_initial_margin, 2),
            fmt_opt(row.max_initial_margin, 2),
        )?;
    }
    let total: i64 = summary.iter().map(|r| r.record_count).sum();
    writeln!(out, "\nTotal symbols: {}, Total records: {}", summary.len(), total)
}

pub fn write_dates(out: &mut impl Write, dates: &[NaiveDate]) -> io::Result<()> {
    if dates.is_empty() {
        return writeln!(out, "No dates in database.");
    }
    writeln!(out, "\nDates in database ({} total):", dates.len())?;
    for d in dates {
        writeln!(out, "  {d}")?;
    }
    Ok(())
}

#[derive(Serialize)]
struct ExportRow<'a> {
    #[serde(rename = "Date")]
    date: NaiveDate,
    #[serde(rename = "Symbol")]
    symbol: &'a str,
    #[serde(rename = "Expiry")]
    expiry: &'a str,
    #[serde(rename = "Instrument ID")]
    instrument_id: &'a str,
    #[serde(rename = "File ID")]
    file_id: Option<i64>,
    #[serde(rename = "Initial Margin %")]
    initial_margin_pct: Option<f64>,
    #[serde(rename = "ELM %")]
    elm_pct: Option<f64>,
    #[serde(rename = "Tender Margin %")]
    tender_margin_pct: Option<f64>,
    #[serde(rename = "Total Margin %")]
    total_margin_pct: Option<f64>,
    #[serde(rename = "Additional Long Margin %")]
    additional_long_margin_pct: Option<f64>,
    #[serde(rename = "Additional Short Margin %")]
    additional_short_margin_pct: Option<f64>,
    #[serde(rename = "Special Long Margin %")]
    special_long_margin_pct: Option<f64>,
    #[serde(rename = "Special Short Margin %")]
    special_short_margin_pct: Option<f64>,
    #[serde(rename = "Delivery Margin %")]
    delivery_margin_pct: Option<f64>,
    #[serde(rename = "Daily Volatility")]
    daily_volatility: Option<f64>,
    #[serde(rename = "Annualized Volatility")]
    annualized_volatility: Option<f64>,
    #[serde(rename = "Created At")]
    created_at: &'a str,
}

impl<'a> From<&'a StoredMargin> for ExportRow<'a> {
    fn from(s: &'a StoredMargin) -> Self {
        let r = &s.record;
        Self {
            date: r.date,
            symbol: &r.symbol,
            expiry: &r.expiry,
            instrument_id: &r.instrument_id,
            file_id: r.file_id,
            initial_margin_pct: r.initial_margin_pct,
            elm_pct: r.elm_pct,
            tender_margin_pct: r.tender_margin_pct,
            total_margin_pct: r.total_margin_pct,
            additional_long_margin_pct: r.additional_long_margin_pct,
            additional_short_margin_pct: r.additional_short_margin_pct,
            special_long_margin_pct: r.special_long_margin_pct,
            special_short_margin_pct: r.special_short_margin_pct,
            delivery_margin_pct: r.delivery_margin_pct,
            daily_volatility: r.daily_volatility,
            annualized_volatility: r.annualized_volatility,
            created_at: &s.created_at,
        }
    }
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    #[serde(rename = "Symbol")]
    symbol: &'a str,
    #[serde(rename = "Record Count")]
    record_count: i64,
    #[serde(rename = "Earliest Date")]
    earliest_date: NaiveDate,
    #[serde(rename = "Latest Date")]
    latest_date: NaiveDate,
    #[serde(rename = "Avg Initial Margin %")]
    avg_initial_margin: Option<f64>,
    #[serde(rename = "Min Initial Margin %")]
    min_initial_margin: Option<f64>,
    #[serde(rename = "Max Initial Margin %")]
    max_initial_margin: Option<f64>,
}

pub fn write_margins_csv<W: Write>(writer: W, records: &[StoredMargin]) -> PersistResult<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for stored in records {
        csv.serialize(ExportRow::from(stored))?;
    }
    csv.flush()?;
    Ok(())
}

impl<'a> From<&'a SymbolSummary> for SummaryRow<'a> {
    fn from(row: &'a SymbolSummary) -> Self {
        Self {
            symbol: &row.symbol,
            record_count: row.record_count,
            earliest_date: row.earliest_date,
            latest_date: row.latest_date,
            avg_initial_margin: row.avg_initial_margin,
            min_initial_margin: row.min_initial_margin,
            max_initial_margin: row.max_initial_margin,
        }
    }
}

pub fn write_summary_csv<W: Write>(writer: W, summary: &[SymbolSummary]) -> PersistResult<()> {
    let mut csv = csv::Writer::from_writer(writer);
    for row in summary {
        csv.serialize(SummaryRow::from(row))?;
    }
    csv.flush()?;
    Ok(())
}

/// One workbook: a bold, frozen header row and fitted columns on each sheet.
/// The summary sheet is left out when `summary` is empty.
pub fn write_workbook(path: &Path, records: &[StoredMargin], summary: &[SymbolSummary]) -> PersistResult<()> {
    let mut workbook = Workbook::new();
    let header = Format::new().set_bold();

    let sheet = workbook.add_worksheet().set_name(MARGINS_SHEET)?;
    if let Some(first) = records.first() {
        sheet.serialize_headers_with_format(0, 0, &ExportRow::from(first), &header)?;
        for stored in records {
            sheet.serialize(&ExportRow::from(stored))?;
        }
    }
    sheet.set_freeze_panes(1, 0)?;
    sheet.autofit();

    if let Some(first) = summary.first() {
        let sheet = workbook.add_worksheet().set_name(SUMMARY_SHEET)?;
        sheet.serialize_headers_with_format(0, 0, &SummaryRow::from(first), &header)?;
        for row in summary {
            sheet.serialize(&SummaryRow::from(row))?;
        }
        sheet.set_freeze_panes(1, 0)?;
        sheet.autofit();
    }

    workbook.save(path)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub paths: Vec<PathBuf>,
    pub rows: usize,
}

/// Writes the margins (and the per-symbol summary when there is one) into `dir`.
/// Returns `None` when nothing matched `symbols`.
pub fn export<S: MarginStore>(
    store: &S,
    dir: &Path,
    symbols: &[String],
    format: ExportFormat,
) -> PersistResult<Option<ExportSummary>> {
    let records = store.for_export(symbols)?;
    if records.is_empty() {
        return Ok(None);
    }
    let summary = store.summary()?;
    fs::create_dir_all(dir)?;

    let paths = match format {
        ExportFormat::Xlsx => {
            let path = dir.join(WORKBOOK_FILE);
            write_workbook(&path, &records, &summary)?;
            vec![path]
        }
        ExportFormat::Csv => {
            let margins_path = dir.join(MARGINS_FILE);
            write_margins_csv(fs::File::create(&margins_path)?, &records)?;
            let mut paths = vec![margins_path];
            if !summary.is_empty() {
                let path = dir.join(SUMMARY_FILE);
                write_summary_csv(fs::File::create(&path)?, &summary)?;
                paths.push(path);
            }
            paths
        }
    };

    info!(rows = records.len(), ?format, path = %paths[0].display(), "exported margins");
    Ok(Some(ExportSummary { paths, rows: records.len() }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::SqliteMarginStore;
    use crate::scrape::types::MarginRecord;

    fn stored(symbol: &str, im: Option<f64>) -> StoredMargin {
        let mut record = MarginRecord::new(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(), symbol);
        record.expiry = "26MAR2024".into();
        record.initial_margin_pct = im;
        StoredMargin { record, created_at: "2024-03-01 18:00:00".into() }
    }

    #[test]
    fn test_records_table_marks_missing() {
        let mut out = Vec::new();
        write_records(&mut out, "Margins", &[stored("NATURALGAS", Some(5.25)), stored("GOLD", None)]).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("  Margins"));
        let gas = text.lines().find(|l| l.contains("NATURALGAS")).unwrap();
        assert!(gas.starts_with("2024-03-01"));
        assert!(gas.contains("5.25"));
        let gold = text.lines().find(|l| l.contains("GOLD")).unwrap();
        assert!(gold.contains("N/A"));
        assert!(text.contains("Total: 2 records"));
    }

    #[test]
    fn test_empty_outputs() {
        let mut out = Vec::new();
        write_records(&mut out, "", &[]).unwrap();
        write_summary(&mut out, &[]).unwrap();
        write_dates(&mut out, &[]).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("No records found."));
        assert!(text.contains("No data in database."));
        assert!(text.contains("No dates in database."));
    }

    #[test]
    fn test_margins_csv_layout() {
        let mut buf = Vec::new();
        write_margins_csv(&mut buf, &[stored("NATURALGAS", Some(5.25)), stored("GOLD", None)]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let mut lines = text.lines();

        let header = lines.next().unwrap();
        assert!(header.starts_with("Date,Symbol,Expiry,Instrument ID,File ID,Initial Margin %,ELM %"));
        assert!(header.ends_with("Annualized Volatility,Created At"));
        assert_eq!(lines.next().unwrap(), "2024-03-01,NATURALGAS,26MAR2024,,,5.25,,,,,,,,,,,2024-03-01 18:00:00");
        assert!(lines.next().unwrap().starts_with("2024-03-01,GOLD,26MAR2024,,,,"));
    }

    fn export_store() -> SqliteMarginStore {
        let store = SqliteMarginStore::in_memory().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let mut r = MarginRecord::new(day, "NATURALGAS");
        r.initial_margin_pct = Some(5.0);
        store.upsert(&r).unwrap();
        store.upsert(&MarginRecord::new(day, "GOLD")).unwrap();
        store
    }

    #[test]
    fn test_csv_export_writes_both_sheets() {
        let store = export_store();
        let dir = std::env::temp_dir().join(format!("mcx-export-csv-{}", std::process::id()));
        assert_eq!(export(&store, &dir, &["SILVER".to_string()], ExportFormat::Csv).unwrap(), None);

        let done = export(&store, &dir, &["NATURALGAS".to_string()], ExportFormat::Csv).unwrap().unwrap();
        assert_eq!(done.rows, 1);
        assert_eq!(done.paths, vec![dir.join(MARGINS_FILE), dir.join(SUMMARY_FILE)]);
        let margins = fs::read_to_string(&done.paths[0]).unwrap();
        assert_eq!(margins.lines().count(), 2);
        let sheet = fs::read_to_string(&done.paths[1]).unwrap();
        assert!(sheet.starts_with("Symbol,Record Count,Earliest Date,Latest Date"));
        assert!(sheet.contains("NATURALGAS,1,2024-03-01,2024-03-01,5.0,5.0,5.0"));
        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_xlsx_export_writes_one_workbook() {
        let store = export_store();
        let dir = std::env::temp_dir().join(format!("mcx-export-xlsx-{}", std::process::id()));

        let done = export(&store, &dir, &[], ExportFormat::Xlsx).unwrap().unwrap();
        assert_eq!(done.rows, 2);
        assert_eq!(done.paths, vec![dir.join(WORKBOOK_FILE)]);
        assert!(!dir.join(MARGINS_FILE).exists());

        // xlsx is a zip container.
        let bytes = fs::read(&done.paths[0]).unwrap();
        assert!(bytes.starts_with(b"PK\x03\x04"));
        assert!(bytes.len() > 1000);
        fs::remove_dir_all(dir).unwrap();
    }
}
