//! Argument normalization and validation for the managed market tools
//!
//! Every check fails with a descriptive [`Error::Validation`]; nothing is
//! silently coerced.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use crate::{Error, Result};

static SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9.\-]{1,20}$").expect("valid symbol regex"));

static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid date regex"));

/// Earliest fiscal year the data source carries
pub const MIN_STATEMENT_YEAR: i64 = 1990;

/// Normalize a ticker symbol: trim, uppercase, then require
/// `^[A-Z0-9.\-]{1,20}$` with at least one character other than `.`.
/// Symbols become upstream path segments, so `.` and `..` are refused.
///
/// # Errors
///
/// Returns [`Error::Validation`] for non-strings and strings that do not
/// match after normalization.
pub fn normalize_symbol(value: &Value) -> Result<String> {
    let Value::String(raw) = value else {
        return Err(Error::Validation(format!(
            "symbol must be a string (got {})",
            type_name(value)
        )));
    };
    let symbol = raw.trim().to_uppercase();
    if !SYMBOL_RE.is_match(&symbol) {
        return Err(Error::Validation(format!(
            "symbol must be 1-20 characters of A-Z, 0-9, '.' or '-' (got {raw:?})"
        )));
    }
    if symbol.chars().all(|c| c == '.') {
        return Err(Error::Validation(format!(
            "symbol must contain a letter, digit or '-' (got {raw:?})"
        )));
    }
    Ok(symbol)
}

/// Reporting frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frequency {
    /// Annual reports
    Annual,
    /// Quarterly reports
    Quarterly,
}

impl Frequency {
    /// Canonical values, in schema order
    pub const ALLOWED: &'static [&'static str] = &["Annual", "Quarterly"];

    /// Canonical spelling
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Annual => "Annual",
            Self::Quarterly => "Quarterly",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "annual" => Some(Self::Annual),
            "quarterly" => Some(Self::Quarterly),
            _ => None,
        }
    }
}

/// Financial statement kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    /// Income statement
    Income,
    /// Balance sheet
    Balance,
    /// Cash flow statement
    CashFlow,
}

impl StatementType {
    /// Canonical values, in schema order
    pub const ALLOWED: &'static [&'static str] = &["IS", "BS", "CF"];

    /// Canonical code
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Income => "IS",
            Self::Balance => "BS",
            Self::CashFlow => "CF",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "IS" => Some(Self::Income),
            "BS" => Some(Self::Balance),
            "CF" => Some(Self::CashFlow),
            _ => None,
        }
    }
}

/// Strict view over a tool's `arguments` object
pub struct ToolArgs<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> ToolArgs<'a> {
    /// Wrap `arguments`, rejecting non-objects and fields outside `allowed`
    ///
    /// # Errors
    ///
    /// Returns [`Error::Validation`] naming the unexpected field.
    pub fn new(arguments: &'a Value, allowed: &[&str]) -> Result<Self> {
        let Value::Object(map) = arguments else {
            return Err(Error::Validation(format!(
                "arguments must be an object (got {})",
                type_name(arguments)
            )));
        };
        let mut unknown: Vec<&str> = map
            .keys()
            .map(String::as_str)
            .filter(|k| !allowed.contains(k))
            .collect();
        if !unknown.is_empty() {
            unknown.sort_unstable();
            return Err(Error::Validation(format!(
                "unexpected argument(s): {}; allowed: {}",
                unknown.join(", "),
                allowed.join(", ")
            )));
        }
        Ok(Self { map })
    }

    /// Present and non-null value for `key`
    fn get(&self, key: &str) -> Option<&'a Value> {
        self.map.get(key).filter(|v| !v.is_null())
    }

    fn required(&self, key: &str) -> Result<&'a Value> {
        self.get(key)
            .ok_or_else(|| Error::Validation(format!("missing required argument '{key}'")))
    }

    /// Required ticker symbol
    pub fn symbol(&self) -> Result<String> {
        normalize_symbol(self.required("symbol")?)
    }

    /// Required frequency (case-insensitive)
    pub fn frequency(&self) -> Result<Frequency> {
        let raw = self.required_str("frequency")?;
        Frequency::parse(raw).ok_or_else(|| enum_error("frequency", Frequency::ALLOWED, raw))
    }

    /// Required statement type (case-insensitive)
    pub fn statement_type(&self) -> Result<StatementType> {
        let raw = self.required_str("statement_type")?;
        StatementType::parse(raw)
            .ok_or_else(|| enum_error("statement_type", StatementType::ALLOWED, raw))
    }

    /// Optional integer within `[min, max]`
    pub fn int_in_range(&self, key: &str, min: i64, max: i64) -> Result<Option<i64>> {
        let Some(value) = self.get(key) else {
            return Ok(None);
        };
        match value.as_i64() {
            Some(n) if (min..=max).contains(&n) => Ok(Some(n)),
            _ => Err(Error::Validation(format!(
                "{key} must be an integer between {min} and {max} (got {value})"
            ))),
        }
    }

    /// Optional fiscal year between 1990 and next year
    pub fn year(&self) -> Result<Option<i64>> {
        let max_year = i64::from(Utc::now().year()) + 1;
        self.int_in_range("year", MIN_STATEMENT_YEAR, max_year)
    }

    /// Required `YYYY-MM-DD` calendar date
    pub fn date(&self, key: &str) -> Result<NaiveDate> {
        let raw = self.required_str(key)?;
        parse_iso_date(key, raw)
    }

    fn required_str(&self, key: &str) -> Result<&'a str> {
        let value = self.required(key)?;
        value.as_str().ok_or_else(|| {
            Error::Validation(format!("{key} must be a string (got {})", type_name(value)))
        })
    }
}

/// Parse an exact `YYYY-MM-DD` date that exists on the calendar
///
/// # Errors
///
/// Returns [`Error::Validation`] for other formats or impossible dates.
pub fn parse_iso_date(key: &str, raw: &str) -> Result<NaiveDate> {
    if !DATE_RE.is_match(raw) {
        return Err(Error::Validation(format!(
            "{key} must be a date in YYYY-MM-DD format (got {raw:?})"
        )));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
        Error::Validation(format!("{key} must be a valid calendar date (got {raw:?})"))
    })
}

fn enum_error(key: &str, allowed: &[&str], raw: &str) -> Error {
    Error::Validation(format!(
        "{key} must be one of {} (got {raw:?})",
        allowed.join(", ")
    ))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
