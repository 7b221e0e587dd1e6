pub mod types;
pub use types::*;
pub mod sqlite;
pub use sqlite::SqliteMarginStore;

use chrono::NaiveDate;

use crate::scrape::types::MarginRecord;

/// Sink and source for normalised margins, keyed by (date, symbol, expiry, file id).
pub trait MarginStore {
    fn upsert(&self, record: &MarginRecord) -> PersistResult<UpsertKind>;

    /// Case-insensitive substring match on symbol, newest first.
    fn by_symbol(&self, symbol: &str) -> PersistResult<Vec<StoredMargin>>;

    fn by_date(&self, date: NaiveDate) -> PersistResult<Vec<StoredMargin>>;

    /// Distinct dates, newest first.
    fn dates(&self) -> PersistResult<Vec<NaiveDate>>;

    fn summary(&self) -> PersistResult<Vec<SymbolSummary>>;

    /// Rows for an export; an empty `symbols` slice means every symbol.
    fn for_export(&self, symbols: &[String]) -> PersistResult<Vec<StoredMargin>>;
}
