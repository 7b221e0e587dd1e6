// Convert raw backend rows into MarginRecords.
// Field mapping is one static table so a renamed upstream key is a one-line change.

use chrono::NaiveDate;
use serde_json::Value;

use crate::scrape::types::{MarginRecord, RawRow};

const SYMBOL_KEY: &str = "Symbol";
const EXPIRY_KEY: &str = "ExpiryDate";
const INSTRUMENT_KEY: &str = "InstrumentID";
const FILE_ID_KEY: &str = "FileID";

/// Header or label rows the site sometimes mixes into the data.
const PLACEHOLDER_SYMBOLS: [&str; 3] = ["symbol", "contract", "commodity"];

type Assign = fn(&mut MarginRecord, Option<f64>);

/// One numeric column: candidate source keys in priority order, the coercion, the target.
pub struct FieldRule {
    pub sources: &'static [&'static str],
    pub column: &'static str,
    pub coerce: fn(&Value) -> Option<f64>,
    assign: Assign,
}

pub static FIELD_RULES: &[FieldRule] = &[
    FieldRule {
        sources: &["InitialMargin"],
        column: "initial_margin_pct",
        coerce: parse_pct,
        assign: |r, v| r.initial_margin_pct = v,
    },
    // ELMShort mirrors ELMLong on nearly every row; it only fills in when long is absent.
    FieldRule {
        sources: &["ELMLong", "ELMShort"],
        column: "elm_pct",
        coerce: parse_pct,
        assign: |r, v| r.elm_pct = v,
    },
    FieldRule {
        sources: &["TenderMargin"],
        column: "tender_margin_pct",
        coerce: parse_pct,
        assign: |r, v| r.tender_margin_pct = v,
    },
    FieldRule {
        sources: &["TotalMargin"],
        column: "total_margin_pct",
        coerce: parse_pct,
        assign: |r, v| r.total_margin_pct = v,
    },
    FieldRule {
        sources: &["AdditionalLongMargin"],
        column: "additional_long_margin_pct",
        coerce: parse_pct,
        assign: |r, v| r.additional_long_margin_pct = v,
    },
    FieldRule {
        sources: &["AdditionalShortMargin"],
        column: "additional_short_margin_pct",
        coerce: parse_pct,
        assign: |r, v| r.additional_short_margin_pct = v,
    },
    FieldRule {
        sources: &["SpecialLongMargin"],
        column: "special_long_margin_pct",
        coerce: parse_pct,
        assign: |r, v| r.special_long_margin_pct = v,
    },
    FieldRule {
        sources: &["SpecialShortMargin"],
        column: "special_short_margin_pct",
        coerce: parse_pct,
        assign: |r, v| r.special_short_margin_pct = v,
    },
    FieldRule {
        sources: &["DeliveryMargin"],
        column: "delivery_margin_pct",
        coerce: parse_pct,
        assign: |r, v| r.delivery_margin_pct = v,
    },
    FieldRule {
        sources: &["DailyVolatility"],
        column: "daily_volatility",
        coerce: parse_pct,
        assign: |r, v| r.daily_volatility = v,
    },
    FieldRule {
        sources: &["AnnualizedVolatility"],
        column: "annualized_volatility",
        coerce: parse_pct,
        assign: |r, v| r.annualized_volatility = v,
    },
];

impl FieldRule {
    /// First source key carrying a value; null and blank strings count as absent.
    fn pick<'a>(&self, raw: &'a RawRow) -> Option<&'a Value> {
        self.sources
            .iter()
            .filter_map(|key| raw.get(*key))
            .find(|v| match v {
                Value::Null => false,
                Value::String(s) => !s.trim().is_empty(),
                _ => true,
            })
    }

    pub fn apply(&self, raw: &RawRow, record: &mut MarginRecord) {
        let value = self.pick(raw).and_then(self.coerce);
        (self.assign)(record, value);
    }
}

/// Returns `None` for rows that are not instrument data.
pub fn normalise_row(raw: &RawRow, date: NaiveDate) -> Option<MarginRecord> {
    let symbol = raw.get(SYMBOL_KEY)?.as_str()?.trim();
    if symbol.is_empty() || is_placeholder(symbol) {
        return None;
    }

    let mut record = MarginRecord::new(date, symbol);
    record.expiry = text_field(raw, EXPIRY_KEY).unwrap_or_default();
    record.instrument_id = text_field(raw, INSTRUMENT_KEY).unwrap_or_default();
    record.file_id = raw.get(FILE_ID_KEY).and_then(integer_field);

    for rule in FIELD_RULES {
        rule.apply(raw, &mut record);
    }
    Some(record)
}

fn is_placeholder(symbol: &str) -> bool {
    let lowered = symbol.to_lowercase();
    PLACEHOLDER_SYMBOLS.contains(&lowered.as_str())
}

fn text_field(raw: &RawRow, key: &str) -> Option<String> {
    match raw.get(key)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn integer_field(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numbers pass through; strings lose `%` and `,`; "-", "n/a" and junk become `None`.
pub fn parse_pct(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|f| f.is_finite()),
        Value::String(s) => pct_from_str(s),
        _ => None,
    }
}

pub fn pct_from_str(s: &str) -> Option<f64> {
    let cleaned: String = s.chars().filter(|c| *c != '%' && *c != ',').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "-" || cleaned.eq_ignore_ascii_case("n/a") {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|f| f.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn row(value: Value) -> RawRow {
        match value {
            Value::Object(map) => map,
            _ => panic!("test rows must be objects"),
        }
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
    }

    #[test]
    fn test_natural_gas_row() {
        let raw = row(json!({
            "Symbol": "NATURALGAS",
            "ExpiryDate": "",
            "InitialMargin": 5.25,
            "ELMLong": 1.1
        }));
        let rec = normalise_row(&raw, day()).unwrap();

        assert_eq!(rec.date, day());
        assert_eq!(rec.symbol, "NATURALGAS");
        assert_eq!(rec.expiry, "");
        assert_eq!(rec.initial_margin_pct, Some(5.25));
        assert_eq!(rec.elm_pct, Some(1.1));
        assert_eq!(rec.tender_margin_pct, None);
        assert_eq!(rec.total_margin_pct, None);
        assert_eq!(rec.additional_long_margin_pct, None);
        assert_eq!(rec.additional_short_margin_pct, None);
        assert_eq!(rec.special_long_margin_pct, None);
        assert_eq!(rec.special_short_margin_pct, None);
        assert_eq!(rec.delivery_margin_pct, None);
        assert_eq!(rec.daily_volatility, None);
        assert_eq!(rec.annualized_volatility, None);
        assert_eq!(rec.file_id, None);
    }

    #[test]
    fn test_identity_fields() {
        let raw = row(json!({
            "Symbol": "  GOLD ",
            "ExpiryDate": " 05FEB2025 ",
            "InstrumentID": "FUTCOM",
            "FileID": "17",
            "TotalMargin": "12.50%"
        }));
        let rec = normalise_row(&raw, day()).unwrap();
        assert_eq!(rec.symbol, "GOLD");
        assert_eq!(rec.expiry, "05FEB2025");
        assert_eq!(rec.instrument_id, "FUTCOM");
        assert_eq!(rec.file_id, Some(17));
        assert_eq!(rec.total_margin_pct, Some(12.5));
    }

    #[test]
    fn test_skips_non_data_rows() {
        for raw in [
            json!({}),
            json!({"Symbol": ""}),
            json!({"Symbol": "   "}),
            json!({"Symbol": null}),
            json!({"Symbol": 12}),
            json!({"Symbol": "Symbol", "InitialMargin": 1}),
            json!({"Symbol": " CONTRACT "}),
            json!({"Symbol": "commodity"}),
        ] {
            assert_eq!(normalise_row(&row(raw.clone()), day()), None, "{raw}");
        }
    }

    #[test]
    fn test_elm_falls_back_to_short() {
        let rec = normalise_row(&row(json!({"Symbol": "ZINC", "ELMShort": "2%"})), day()).unwrap();
        assert_eq!(rec.elm_pct, Some(2.0));

        let rec = normalise_row(
            &row(json!({"Symbol": "ZINC", "ELMLong": null, "ELMShort": 3})),
            day(),
        )
        .unwrap();
        assert_eq!(rec.elm_pct, Some(3.0));
    }

    #[test]
    fn test_zero_is_a_value() {
        let rec = normalise_row(
            &row(json!({"Symbol": "ZINC", "ELMLong": 0, "ELMShort": 1, "TenderMargin": 0})),
            day(),
        )
        .unwrap();
        assert_eq!(rec.elm_pct, Some(0.0));
        assert_eq!(rec.tender_margin_pct, Some(0.0));
    }

    #[test]
    fn test_parse_pct_strings() {
        assert_eq!(pct_from_str("5.25%"), Some(5.25));
        assert_eq!(pct_from_str("1,234.5"), Some(1234.5));
        assert_eq!(pct_from_str(" -3 "), Some(-3.0));
        assert_eq!(pct_from_str("-"), None);
        assert_eq!(pct_from_str(""), None);
        assert_eq!(pct_from_str("%"), None);
        assert_eq!(pct_from_str("n/a"), None);
        assert_eq!(pct_from_str("N/A"), None);
        assert_eq!(pct_from_str("abc"), None);
        assert_eq!(pct_from_str("inf"), None);
        assert_eq!(pct_from_str("NaN"), None);
    }

    #[test]
    fn test_parse_pct_values() {
        assert_eq!(parse_pct(&json!(4)), Some(4.0));
        assert_eq!(parse_pct(&json!(0.75)), Some(0.75));
        assert_eq!(parse_pct(&json!(true)), None);
        assert_eq!(parse_pct(&json!(null)), None);
        assert_eq!(parse_pct(&json!([1])), None);
    }

    #[test]
    fn test_rule_columns_unique() {
        let mut columns: Vec<_> = FIELD_RULES.iter().map(|r| r.column).collect();
        columns.sort();
        columns.dedup();
        assert_eq!(columns.len(), FIELD_RULES.len());
    }

    proptest! {
        #[test]
        fn prop_placeholder_symbols_skip(
            idx in 0usize..3,
            upper in any::<bool>(),
            pad in "[ \t]{0,3}",
            y in 2000i32..2040, o in 1u32..366,
        ) {
            let base = PLACEHOLDER_SYMBOLS[idx];
            let sym = if upper { base.to_uppercase() } else { base.to_string() };
            let date = NaiveDate::from_yo_opt(y, o).unwrap();
            let raw = row(json!({"Symbol": format!("{pad}{sym}{pad}"), "InitialMargin": 5}));
            prop_assert_eq!(normalise_row(&raw, date), None);
            prop_assert_eq!(normalise_row(&row(json!({"InitialMargin": 5})), date), None);
        }

        #[test]
        fn prop_long_elm_wins(long in -1.0e6f64..1.0e6, short in proptest::option::of(-1.0e6f64..1.0e6)) {
            let mut raw = row(json!({"Symbol": "CRUDEOIL", "ELMLong": long}));
            if let Some(s) = short {
                raw.insert("ELMShort".into(), json!(s));
            }
            let rec = normalise_row(&raw, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).unwrap();
            prop_assert_eq!(rec.elm_pct, Some(long));
        }

        #[test]
        fn prop_short_elm_when_long_absent(short in -1.0e6f64..1.0e6) {
            let raw = row(json!({"Symbol": "CRUDEOIL", "ELMShort": short}));
            let rec = normalise_row(&raw, NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()).unwrap();
            prop_assert_eq!(rec.elm_pct, Some(short));
        }

        #[test]
        fn prop_numeric_strings_parse(s in "-?[0-9]{1,3}(,[0-9]{3}){0,2}(\\.[0-9]{1,4})?%?") {
            let expected: f64 = s.replace([',', '%'], "").parse().unwrap();
            prop_assert_eq!(pct_from_str(&s), Some(expected));
        }

        #[test]
        fn prop_garbage_never_panics(s in "\\PC*") {
            let _ = pct_from_str(&s);
        }

        #[test]
        fn prop_normalise_is_pure(im in proptest::option::of(-100.0f64..100.0), sym in "[A-Z]{3,12}") {
            let mut raw = row(json!({"Symbol": sym, "ExpiryDate": "28MAR2024"}));
            if let Some(v) = im {
                raw.insert("InitialMargin".into(), json!(v));
            }
            let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
            prop_assert_eq!(normalise_row(&raw, date), normalise_row(&raw, date));
        }
    }
}
