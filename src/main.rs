use std::io;

use anyhow::Context;
use chrono::NaiveDate;
use clap::Parser;
use tracing::info;

use mcx_margin::config::Settings;
use mcx_margin::ingest::ingest_rows;
use mcx_margin::persist::{MarginStore, SqliteMarginStore};
use mcx_margin::report;
use mcx_margin::scrape::MarginSource;
use mcx_margin::{chromium_fetcher, parse_date, telemetry};

const SAMPLE_ROWS: usize = 10;

/// Fetch one day's MCX CCL margins and store them.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Trading date, YYYY-MM-DD
    #[arg(value_parser = parse_date)]
    date: NaiveDate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load().context("loading settings")?;
    telemetry::init_tracing(&settings.log);

    info!(date = %cli.date, "starting scrape");
    let store = SqliteMarginStore::open(&settings.database.path)
        .with_context(|| format!("opening {}", settings.database.path.display()))?;

    let outcome = chromium_fetcher(&settings).fetch(cli.date).await;
    let kind = outcome.label();
    let rows = outcome.into_rows();
    if rows.is_empty() {
        info!(date = %cli.date, outcome = kind, "no data returned");
        return Ok(());
    }

    info!(rows = rows.len(), "got raw rows");
    if let Some(sample) = rows.first() {
        info!(sample = %serde_json::to_string_pretty(sample)?, "sample raw row");
    }

    let tally = ingest_rows(&store, rows, cli.date, None);
    println!("Saved: {}, Skipped: {}", tally.saved, tally.skipped + tally.failed);

    if tally.saved > 0 {
        let records = store.by_date(cli.date)?;
        report::write_sample(&mut io::stdout().lock(), cli.date, &records, SAMPLE_ROWS)?;
    }
    Ok(())
}
