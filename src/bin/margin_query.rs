use std::io;

use anyhow::Context;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use mcx_margin::config::{ExportFormat, Settings};
use mcx_margin::persist::{MarginStore, SqliteMarginStore};
use mcx_margin::{parse_date, report, telemetry};

/// Query and export stored MCX CCL margins.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Rows whose symbol contains SYMBOL (case-insensitive), e.g. ng, gold
    Symbol { symbol: String },
    /// Every row stored for one date
    Date {
        #[arg(value_parser = parse_date)]
        date: NaiveDate,
    },
    /// Per-symbol counts, date range and initial margin stats
    Summary,
    /// Dates present in the database
    Dates,
    /// Write the configured export symbols to a workbook (or CSV files)
    Export {
        /// Overrides `export.format` from the settings
        #[arg(long, value_enum)]
        format: Option<ExportFormat>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;
    telemetry::init_tracing(&settings.log);

    let store = SqliteMarginStore::open(&settings.database.path)
        .with_context(|| format!("opening {}", settings.database.path.display()))?;
    let mut out = io::stdout().lock();

    match cli.command {
        Command::Symbol { symbol } => {
            let symbol = symbol.to_uppercase();
            let records = store.by_symbol(&symbol)?;
            report::write_records(&mut out, &format!("Margins for symbol matching '{symbol}'"), &records)?;
        }
        Command::Date { date } => {
            let records = store.by_date(date)?;
            report::write_records(&mut out, &format!("Margins for {date}"), &records)?;
        }
        Command::Summary => report::write_summary(&mut out, &store.summary()?)?,
        Command::Dates => report::write_dates(&mut out, &store.dates()?)?,
        Command::Export { format } => {
            let dir = &settings.export.dir;
            let format = format.unwrap_or(settings.export.format);
            match report::export(&store, dir, &settings.export.symbols, format)
                .with_context(|| format!("exporting to {}", dir.display()))?
            {
                Some(done) => {
                    println!("Exported {} records to:", done.rows);
                    for path in &done.paths {
                        println!("  {}", path.display());
                    }
                }
                None => println!("No data to export."),
            }
        }
    }
    Ok(())
}
