use anyhow::Context;
use chrono::{Local, NaiveDate};
use clap::Parser;
use tracing::info;

use mcx_margin::backfill::Backfill;
use mcx_margin::config::Settings;
use mcx_margin::persist::{MarginStore, SqliteMarginStore};
use mcx_margin::{chromium_fetcher, parse_date, telemetry};

/// Fetch every missing weekday from START up to today.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// First date to backfill, YYYY-MM-DD
    #[arg(value_parser = parse_date)]
    start: NaiveDate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;
    telemetry::init_tracing(&settings.log);

    let store = SqliteMarginStore::open(&settings.database.path)
        .with_context(|| format!("opening {}", settings.database.path.display()))?;
    let fetcher = chromium_fetcher(&settings);
    let today = Local::now().date_naive();

    let backfill = Backfill::new(
        &fetcher,
        &store,
        &settings.backfill.symbols,
        settings.backfill.request_delay(),
    );
    let report = backfill.run(cli.start, today).await?;
    info!(saved = report.records_saved, "backfill finished");

    println!("\n{}", "=".repeat(60));
    println!("  BACKFILL SUMMARY");
    println!("{}", "=".repeat(60));
    println!("{report}");

    let dates = store.dates()?;
    if let (Some(latest), Some(earliest)) = (dates.first(), dates.last()) {
        println!("\n  DB date range: {earliest} to {latest}");
        println!("  Total dates in DB: {}", dates.len());
    }
    Ok(())
}
