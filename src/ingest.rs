use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::{debug, error, info};

use crate::persist::MarginStore;
use crate::scrape::normaliser::normalise_row;
use crate::scrape::types::RawRow;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IngestTally {
    pub saved: usize,
    /// Placeholder rows and symbols outside the filter.
    pub skipped: usize,
    pub failed: usize,
}

/// Normalise each raw row and upsert it. A failing row is logged and counted,
/// never fatal. `symbols` of `None` keeps every symbol.
pub fn ingest_rows<S: MarginStore>(
    store: &S,
    rows: Vec<RawRow>,
    date: NaiveDate,
    symbols: Option<&HashSet<String>>,
) -> IngestTally {
    let mut tally = IngestTally::default();

    for raw in rows {
        let Some(record) = normalise_row(&raw, date) else {
            tally.skipped += 1;
            continue;
        };
        if symbols.is_some_and(|keep| !keep.contains(&record.symbol)) {
            debug!(symbol = %record.symbol, "symbol filtered out");
            tally.skipped += 1;
            continue;
        }
        match store.upsert(&record) {
            Ok(_) => tally.saved += 1,
            Err(e) => {
                error!(error = %e, symbol = %record.symbol, expiry = %record.expiry, "failed to store margin row");
                tally.failed += 1;
            }
        }
    }

    info!(%date, saved = tally.saved, skipped = tally.skipped, failed = tally.failed, "ingested margin rows");
    tally
}
