//! Walks a date range one scrape at a time, pausing between requests so the site's
//! rate limiting and bot defences stay quiet. Dates already stored are skipped.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono::{Datelike, NaiveDate, Weekday};
use tracing::{info, warn};

use crate::ingest::ingest_rows;
use crate::persist::{MarginStore, PersistResult};
use crate::scrape::fetcher::MarginSource;
use crate::scrape::types::FetchOutcome;

/// Monday to Friday, inclusive of both ends.
pub fn weekdays(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut days = Vec::new();
    let mut current = start;
    while current <= end {
        if !matches!(current.weekday(), Weekday::Sat | Weekday::Sun) {
            days.push(current);
        }
        match current.succ_opt() {
            Some(next) => current = next,
            None => break,
        }
    }
    days
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillReport {
    pub attempted: usize,
    pub already_stored: usize,
    pub with_data: usize,
    pub empty: usize,
    pub blocked: usize,
    pub timed_out: usize,
    pub errors: usize,
    pub records_saved: usize,
    /// Rows that normalised but could not be stored.
    pub records_failed: usize,
}

impl fmt::Display for BackfillReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Dates attempted:     {}", self.attempted)?;
        writeln!(f, "  Already in DB:       {}", self.already_stored)?;
        writeln!(f, "  Dates with data:     {}", self.with_data)?;
        writeln!(f, "  Dates empty/holiday: {}", self.empty)?;
        writeln!(f, "  Dates blocked:       {}", self.blocked)?;
        writeln!(f, "  Dates timed out:     {}", self.timed_out)?;
        writeln!(f, "  Dates with errors:   {}", self.errors)?;
        writeln!(f, "  Total records saved: {}", self.records_saved)?;
        write!(f, "  Records not stored:  {}", self.records_failed)
    }
}

pub struct Backfill<'a, F, S> {
    source: &'a F,
    store: &'a S,
    symbols: HashSet<String>,
    delay: Duration,
}

impl<'a, F: MarginSource, S: MarginStore> Backfill<'a, F, S> {
    pub fn new(source: &'a F, store: &'a S, symbols: &[String], delay: Duration) -> Self {
        Self { source, store, symbols: symbols.iter().cloned().collect(), delay }
    }

    pub async fn run(&self, start: NaiveDate, end: NaiveDate) -> PersistResult<BackfillReport> {
        let existing: HashSet<NaiveDate> = self.store.dates()?.into_iter().collect();
        let all = weekdays(start, end);
        let missing: Vec<NaiveDate> = all.iter().copied().filter(|d| !existing.contains(d)).collect();

        let mut report = BackfillReport {
            attempted: missing.len(),
            already_stored: all.len() - missing.len(),
            ..Default::default()
        };
        info!(%start, %end, weekdays = all.len(), to_fetch = missing.len(), "backfill planned");

        let symbols = (!self.symbols.is_empty()).then_some(&self.symbols);
        for (i, date) in missing.iter().enumerate() {
            let n = i + 1;
            info!(%date, "date {n}/{}", missing.len());

            match self.source.fetch(*date).await {
                FetchOutcome::Success(rows) => {
                    let tally = ingest_rows(self.store, rows, *date, symbols);
                    report.records_saved += tally.saved;
                    report.records_failed += tally.failed;
                    if tally.saved > 0 {
                        report.with_data += 1;
                        info!(%date, saved = tally.saved, failed = tally.failed, "records saved");
                    } else if tally.failed > 0 {
                        report.errors += 1;
                        warn!(%date, failed = tally.failed, "no records could be stored");
                    } else {
                        report.empty += 1;
                        info!(%date, "no matching records");
                    }
                }
                FetchOutcome::NoData => {
                    report.empty += 1;
                    info!(%date, "0 records (holiday/no data)");
                }
                FetchOutcome::Blocked(at) => {
                    report.blocked += 1;
                    warn!(%date, %at, "blocked");
                }
                FetchOutcome::Timeout => {
                    report.timed_out += 1;
                    warn!(%date, "timed out");
                }
                FetchOutcome::ParseError(reason) | FetchOutcome::Failed(reason) => {
                    report.errors += 1;
                    warn!(%date, %reason, "fetch failed");
                }
            }

            if n < missing.len() && !self.delay.is_zero() {
                info!(delay_secs = self.delay.as_secs_f32(), "waiting before next request");
                tokio::time::sleep(self.delay).await;
            }
        }

        Ok(report)
    }
}
