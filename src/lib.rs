//! Scraper for the MCX CCL daily margin page.
//!
//! A headless Chromium session fetches one date's margin table from the
//! clearing house, rows are normalised into [`scrape::MarginRecord`]s, and
//! stored in SQLite for querying and CSV export.

pub mod backfill;
pub mod config;
pub mod ingest;
pub mod persist;
pub mod report;
pub mod scrape;
pub mod telemetry;

use chrono::NaiveDate;
use crate::config::Settings;
use crate::scrape::adapters::chromium::ChromiumLauncher;
use crate::scrape::MarginFetcher;

/// The production fetcher: Chromium, configured from `settings`.
pub fn chromium_fetcher(settings: &Settings) -> MarginFetcher<ChromiumLauncher> {
    MarginFetcher::new(
        ChromiumLauncher::new(settings.browser.clone()),
        settings.site.clone(),
        settings.timeouts.clone(),
    )
}

/// Dates on the command line are YYYY-MM-DD.
pub fn parse_date(s: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("invalid date format '{s}', use YYYY-MM-DD"))
}
