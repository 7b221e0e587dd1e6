use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One instrument's margin parameters exactly as the backend sent them.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Normalised margin parameters for one instrument on one date.
/// `None` means "not applicable", never zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarginRecord {
    pub date: NaiveDate,
    pub symbol: String,
    pub expiry: String,
    pub instrument_id: String,
    pub file_id: Option<i64>,
    pub initial_margin_pct: Option<f64>,
    pub elm_pct: Option<f64>,
    pub tender_margin_pct: Option<f64>,
    pub total_margin_pct: Option<f64>,
    pub additional_long_margin_pct: Option<f64>,
    pub additional_short_margin_pct: Option<f64>,
    pub special_long_margin_pct: Option<f64>,
    pub special_short_margin_pct: Option<f64>,
    pub delivery_margin_pct: Option<f64>,
    pub daily_volatility: Option<f64>,
    pub annualized_volatility: Option<f64>,
}

impl MarginRecord {
    pub fn new(date: NaiveDate, symbol: impl Into<String>) -> Self {
        Self {
            date,
            symbol: symbol.into(),
            expiry: String::new(),
            instrument_id: String::new(),
            file_id: None,
            initial_margin_pct: None,
            elm_pct: None,
            tender_margin_pct: None,
            total_margin_pct: None,
            additional_long_margin_pct: None,
            additional_short_margin_pct: None,
            special_long_margin_pct: None,
            special_short_margin_pct: None,
            delivery_margin_pct: None,
            daily_volatility: None,
            annualized_volatility: None,
        }
    }
}

/// The two renderings of a query date the margin form needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateQuery {
    pub date: NaiveDate,
    /// DD/MM/YYYY, typed into the visible date box.
    pub display: String,
    /// YYYYMMDD, read by the page script when it builds the API request.
    pub hidden: String,
}

impl DateQuery {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            display: date.format("%d/%m/%Y").to_string(),
            hidden: date.format("%Y%m%d").to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedAt {
    Homepage,
    TargetPage,
}

impl std::fmt::Display for BlockedAt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockedAt::Homepage => write!(f, "homepage"),
            BlockedAt::TargetPage => write!(f, "margin page"),
        }
    }
}

/// What a single scrape ended with. `into_rows` collapses every non-success to empty.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(Vec<RawRow>),
    NoData,
    Blocked(BlockedAt),
    Timeout,
    ParseError(String),
    Failed(String),
}

impl FetchOutcome {
    pub fn into_rows(self) -> Vec<RawRow> {
        match self {
            FetchOutcome::Success(rows) => rows,
            _ => Vec::new(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FetchOutcome::Success(_) => "success",
            FetchOutcome::NoData => "no_data",
            FetchOutcome::Blocked(_) => "blocked",
            FetchOutcome::Timeout => "timeout",
            FetchOutcome::ParseError(_) => "parse_error",
            FetchOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScrapeError {
    #[error("browser error: {0}")]
    Browser(String),
    #[error("timed out after {millis}ms waiting for {what}")]
    Timeout { what: String, millis: u128 },
    #[error("element not found: {0}")]
    ElementNotFound(String),
    #[error("script evaluation failed: {0}")]
    Script(String),
}

impl From<chromiumoxide::error::CdpError> for ScrapeError {
    fn from(e: chromiumoxide::error::CdpError) -> Self {
        ScrapeError::Browser(e.to_string())
    }
}

pub type ScrapeResult<T> = Result<T, ScrapeError>;

#[derive(Debug, thiserror::Error)]
pub enum ResponseError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unexpected response shape: {0}")]
    UnexpectedShape(String),
}
