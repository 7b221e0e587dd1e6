use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{params_from_iter, Connection, Row, ToSql};
use tracing::{debug, info};

use super::MarginStore;
use crate::persist::types::{PersistResult, StoredMargin, SymbolSummary, UpsertKind};
use crate::scrape::types::MarginRecord;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS margins (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        date TEXT NOT NULL,
        symbol TEXT NOT NULL,
        expiry TEXT NOT NULL DEFAULT '',
        instrument_id TEXT,
        file_id INTEGER,
        initial_margin_pct REAL,
        elm_pct REAL,
        tender_margin_pct REAL,
        total_margin_pct REAL,
        additional_long_margin_pct REAL,
        additional_short_margin_pct REAL,
        special_long_margin_pct REAL,
        special_short_margin_pct REAL,
        delivery_margin_pct REAL,
        daily_volatility REAL,
        annualized_volatility REAL,
        raw_data TEXT,
        created_at TEXT DEFAULT (datetime('now')),
        UNIQUE(date, symbol, expiry, file_id)
    );

    CREATE INDEX IF NOT EXISTS idx_margins_date ON margins(date);
    CREATE INDEX IF NOT EXISTS idx_margins_symbol ON margins(symbol);
    CREATE INDEX IF NOT EXISTS idx_margins_date_symbol ON margins(date, symbol);
"#;

const SELECT_COLUMNS: &str = "date, symbol, expiry, instrument_id, file_id, \
    initial_margin_pct, elm_pct, tender_margin_pct, total_margin_pct, \
    additional_long_margin_pct, additional_short_margin_pct, \
    special_long_margin_pct, special_short_margin_pct, delivery_margin_pct, \
    daily_volatility, annualized_volatility, created_at";

const ORDERING: &str = "ORDER BY date DESC, symbol ASC, expiry ASC";

// `file_id IS ?4` so rows without a file id still match each other; a UNIQUE
// constraint treats NULLs as distinct and would let duplicates through.
const UPDATE_SQL: &str = r#"
    UPDATE margins SET
        instrument_id = ?5,
        initial_margin_pct = ?6,
        elm_pct = ?7,
        tender_margin_pct = ?8,
        total_margin_pct = ?9,
        additional_long_margin_pct = ?10,
        additional_short_margin_pct = ?11,
        special_long_margin_pct = ?12,
        special_short_margin_pct = ?13,
        delivery_margin_pct = ?14,
        daily_volatility = ?15,
        annualized_volatility = ?16,
        raw_data = ?17
    WHERE date = ?1 AND symbol = ?2 AND expiry = ?3 AND file_id IS ?4
"#;

const INSERT_SQL: &str = r#"
    INSERT INTO margins (
        date, symbol, expiry, file_id, instrument_id,
        initial_margin_pct, elm_pct, tender_margin_pct, total_margin_pct,
        additional_long_margin_pct, additional_short_margin_pct,
        special_long_margin_pct, special_short_margin_pct,
        delivery_margin_pct, daily_volatility, annualized_volatility, raw_data
    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
"#;

pub struct SqliteMarginStore {
    conn: Connection,
}

impl SqliteMarginStore {
    /// Open (creating parent directories and schema as needed).
    pub fn open(path: &Path) -> PersistResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        let store = Self::init(conn)?;
        info!(path = %path.display(), "margin store ready");
        Ok(store)
    }

    pub fn in_memory() -> PersistResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> PersistResult<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    fn query_margins<P: rusqlite::Params>(&self, sql: &str, params: P) -> PersistResult<Vec<StoredMargin>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, stored_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

fn stored_from_row(row: &Row<'_>) -> rusqlite::Result<StoredMargin> {
    let record = MarginRecord {
        date: row.get(0)?,
        symbol: row.get(1)?,
        expiry: row.get(2)?,
        instrument_id: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        file_id: row.get(4)?,
        initial_margin_pct: row.get(5)?,
        elm_pct: row.get(6)?,
        tender_margin_pct: row.get(7)?,
        total_margin_pct: row.get(8)?,
        additional_long_margin_pct: row.get(9)?,
        additional_short_margin_pct: row.get(10)?,
        special_long_margin_pct: row.get(11)?,
        special_short_margin_pct: row.get(12)?,
        delivery_margin_pct: row.get(13)?,
        daily_volatility: row.get(14)?,
        annualized_volatility: row.get(15)?,
    };
    Ok(StoredMargin { record, created_at: row.get::<_, Option<String>>(16)?.unwrap_or_default() })
}

impl MarginStore for SqliteMarginStore {
    fn upsert(&self, r: &MarginRecord) -> PersistResult<UpsertKind> {
        let raw_data = serde_json::to_string(r)?;
        let values: [&dyn ToSql; 17] = [
            &r.date,
            &r.symbol,
            &r.expiry,
            &r.file_id,
            &r.instrument_id,
            &r.initial_margin_pct,
            &r.elm_pct,
            &r.tender_margin_pct,
            &r.total_margin_pct,
            &r.additional_long_margin_pct,
            &r.additional_short_margin_pct,
            &r.special_long_margin_pct,
            &r.special_short_margin_pct,
            &r.delivery_margin_pct,
            &r.daily_volatility,
            &r.annualized_volatility,
            &raw_data,
        ];

        let tx = self.conn.unchecked_transaction()?;
        let kind = if tx.execute(UPDATE_SQL, &values[..])? > 0 {
            UpsertKind::Updated
        } else {
            tx.execute(INSERT_SQL, &values[..])?;
            UpsertKind::Inserted
        };
        tx.commit()?;
        debug!(symbol = %r.symbol, expiry = %r.expiry, date = %r.date, ?kind, "upserted margin");
        Ok(kind)
    }

    fn by_symbol(&self, symbol: &str) -> PersistResult<Vec<StoredMargin>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM margins WHERE UPPER(symbol) LIKE UPPER(?1) {ORDERING}"
        );
        self.query_margins(&sql, [format!("%{symbol}%")])
    }

    fn by_date(&self, date: NaiveDate) -> PersistResult<Vec<StoredMargin>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM margins WHERE date = ?1 {ORDERING}");
        self.query_margins(&sql, [date])
    }

    fn dates(&self) -> PersistResult<Vec<NaiveDate>> {
        let mut stmt = self.conn.prepare("SELECT DISTINCT date FROM margins ORDER BY date DESC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn summary(&self) -> PersistResult<Vec<SymbolSummary>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT
                symbol,
                COUNT(*),
                MIN(date),
                MAX(date),
                AVG(initial_margin_pct),
                MIN(initial_margin_pct),
                MAX(initial_margin_pct)
            FROM margins
            WHERE initial_margin_pct IS NOT NULL
            GROUP BY symbol
            ORDER BY symbol ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(SymbolSummary {
                symbol: row.get(0)?,
                record_count: row.get(1)?,
                earliest_date: row.get(2)?,
                latest_date: row.get(3)?,
                avg_initial_margin: row.get(4)?,
                min_initial_margin: row.get(5)?,
                max_initial_margin: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    fn for_export(&self, symbols: &[String]) -> PersistResult<Vec<StoredMargin>> {
        if symbols.is_empty() {
            let sql = format!("SELECT {SELECT_COLUMNS} FROM margins {ORDERING}");
            return self.query_margins(&sql, []);
        }
        let placeholders = vec!["?"; symbols.len()].join(", ");
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM margins WHERE symbol IN ({placeholders}) {ORDERING}"
        );
        self.query_margins(&sql, params_from_iter(symbols.iter()))
    }
}
