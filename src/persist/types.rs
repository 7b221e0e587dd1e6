use chrono::NaiveDate;
use serde::Serialize;

use crate::scrape::types::MarginRecord;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("xlsx error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type PersistResult<T> = Result<T, PersistError>;

/// A margin row as read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMargin {
    pub record: MarginRecord,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SymbolSummary {
    pub symbol: String,
    pub record_count: i64,
    pub earliest_date: NaiveDate,
    pub latest_date: NaiveDate,
    pub avg_initial_margin: Option<f64>,
    pub min_initial_margin: Option<f64>,
    pub max_initial_margin: Option<f64>,
}

/// Whether an upsert created a row or overwrote one with the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertKind {
    Inserted,
    Updated,
}
